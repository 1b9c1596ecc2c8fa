//! In-process store with keyspace notifications.
//!
//! Behaves like a single Redis database with `notify-keyspace-events` enabled
//! for generic, string and set events. Every successful write publishes
//! `__keyspace@<db>__:<key>` with the command name as payload.

use super::{
    glob_match, keyspace_channel, ChangeFeed, Command, Notification, Reply, StoreGateway,
    Subscription,
};
use crate::config::{TagsyncConfig, DEFAULT_NOTIFICATION_CAPACITY};
use anyhow::{bail, Result};
use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Event {
    channel: String,
    payload: String,
}

#[derive(Debug, Clone)]
enum Matcher {
    Channel(String),
    Pattern(String),
}

impl Matcher {
    fn matches(&self, channel: &str) -> bool {
        match self {
            Matcher::Channel(name) => name == channel,
            Matcher::Pattern(pattern) => glob_match(pattern, channel),
        }
    }
}

struct Shared {
    data: Mutex<HashMap<String, Value>>,
    subscribers: Mutex<HashMap<u64, Matcher>>,
    next_subscriber: AtomicU64,
    events: broadcast::Sender<Event>,
    db: u32,
}

impl Shared {
    fn emit(&self, events: Vec<Event>) {
        for event in events {
            // No receivers is fine: nobody is watching yet.
            let _ = self.events.send(event);
        }
    }

    fn count_subscribers(&self, channel: &str) -> i64 {
        self.subscribers
            .lock()
            .values()
            .filter(|matcher| matcher.matches(channel))
            .count() as i64
    }
}

/// Handle onto an in-process key space. Clones share data.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store emitting notifications for database 0.
    pub fn new() -> Self {
        Self::with_options(0, DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Create an empty store for database `db` whose subscribers buffer up to
    /// `capacity` undelivered messages before lagging.
    pub fn with_options(db: u32, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                data: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(0),
                events,
                db,
            }),
        }
    }

    /// Create an empty store using the configured keyspace database and
    /// notification buffer size.
    pub fn from_config(config: &TagsyncConfig) -> Self {
        Self::with_options(
            config.store.keyspace_db,
            config.reconcile.notification_capacity,
        )
    }

    pub fn keyspace_db(&self) -> u32 {
        self.shared.db
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.shared.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.lock().is_empty()
    }

    fn run(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        let mut events = Vec::new();
        let replies = {
            let mut data = self.shared.data.lock();
            let mut undo: Vec<(String, Option<Value>)> = Vec::new();
            let mut replies = Vec::with_capacity(commands.len());

            for command in &commands {
                match self.apply(&mut data, command, &mut undo, &mut events) {
                    Ok(reply) => replies.push(reply),
                    Err(err) => {
                        for (key, previous) in undo.into_iter().rev() {
                            match previous {
                                Some(value) => data.insert(key, value),
                                None => data.remove(&key),
                            };
                        }
                        return Err(err.context(format!("{} failed", command.name())));
                    }
                }
            }
            replies
        };

        self.shared.emit(events);
        Ok(replies)
    }

    fn apply(
        &self,
        data: &mut HashMap<String, Value>,
        command: &Command,
        undo: &mut Vec<(String, Option<Value>)>,
        events: &mut Vec<Event>,
    ) -> Result<Reply> {
        let db = self.shared.db;
        let mut touch = |key: &str, event: &str, undo_value: Option<Value>| {
            undo.push((key.to_string(), undo_value));
            events.push(Event {
                channel: keyspace_channel(db, key),
                payload: event.to_string(),
            });
        };

        match command {
            Command::Get { key } => match data.get(key) {
                None => Ok(Reply::Nil),
                Some(Value::Text(text)) => Ok(Reply::Text(text.clone())),
                Some(Value::Set(_)) => bail!(wrong_type(key)),
            },
            Command::Set { key, value } => {
                let previous = data.insert(key.clone(), Value::Text(value.clone()));
                touch(key, "set", previous);
                Ok(Reply::Ok)
            }
            Command::Keys { pattern } => {
                let mut keys: Vec<String> = data
                    .keys()
                    .filter(|key| glob_match(pattern, key))
                    .cloned()
                    .collect();
                keys.sort();
                Ok(Reply::Array(keys.into_iter().map(Reply::Text).collect()))
            }
            Command::SAdd { key, members } => {
                let previous = data.get(key).cloned();
                let set = match data
                    .entry(key.clone())
                    .or_insert_with(|| Value::Set(BTreeSet::new()))
                {
                    Value::Set(set) => set,
                    Value::Text(_) => bail!(wrong_type(key)),
                };
                let added = members
                    .iter()
                    .filter(|member| set.insert((*member).clone()))
                    .count();
                if added > 0 {
                    touch(key, "sadd", previous);
                } else if previous.is_none() {
                    data.remove(key);
                }
                Ok(Reply::Int(added as i64))
            }
            Command::SRem { key, members } => {
                let previous = data.get(key).cloned();
                let (removed, now_empty) = match data.get_mut(key) {
                    None => return Ok(Reply::Int(0)),
                    Some(Value::Text(_)) => bail!(wrong_type(key)),
                    Some(Value::Set(set)) => {
                        let removed = members.iter().filter(|member| set.remove(*member)).count();
                        (removed, set.is_empty())
                    }
                };
                if removed > 0 {
                    touch(key, "srem", previous);
                    if now_empty {
                        data.remove(key);
                        touch(key, "del", None);
                        // The first undo entry already restores the set.
                        undo.pop();
                    }
                }
                Ok(Reply::Int(removed as i64))
            }
            Command::SCard { key } => match data.get(key) {
                None => Ok(Reply::Int(0)),
                Some(Value::Set(set)) => Ok(Reply::Int(set.len() as i64)),
                Some(Value::Text(_)) => bail!(wrong_type(key)),
            },
            Command::SMembers { key } => match data.get(key) {
                None => Ok(Reply::Array(Vec::new())),
                Some(Value::Set(set)) => Ok(Reply::Array(
                    set.iter().cloned().map(Reply::Text).collect(),
                )),
                Some(Value::Text(_)) => bail!(wrong_type(key)),
            },
            Command::Publish { channel, message } => {
                events.push(Event {
                    channel: channel.clone(),
                    payload: message.clone(),
                });
                Ok(Reply::Int(self.shared.count_subscribers(channel)))
            }
        }
    }

    fn subscribe_with(&self, matcher: Matcher) -> Box<dyn Subscription> {
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let rx = self.shared.events.subscribe();
        self.shared.subscribers.lock().insert(id, matcher.clone());
        Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            id,
            matcher,
            rx,
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &str) -> String {
    format!("WRONGTYPE operation against key {key} holding the wrong kind of value")
}

fn single(mut replies: Vec<Reply>) -> Result<Reply> {
    match replies.pop() {
        Some(reply) => Ok(reply),
        None => bail!("missing reply"),
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn get(&self, key: &str) -> Result<Reply> {
        single(self.run(vec![Command::get(key)])?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<Reply> {
        single(self.run(vec![Command::set(key, value)])?)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let reply = single(self.run(vec![Command::Keys {
            pattern: pattern.to_string(),
        }])?)?;
        reply
            .into_elements()
            .iter()
            .map(Reply::as_text)
            .collect()
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<i64> {
        single(self.run(vec![Command::SAdd {
            key: key.to_string(),
            members: members.to_vec(),
        }])?)?
        .as_i64()
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<i64> {
        single(self.run(vec![Command::SRem {
            key: key.to_string(),
            members: members.to_vec(),
        }])?)?
        .as_i64()
    }

    async fn scard(&self, key: &str) -> Result<i64> {
        single(self.run(vec![Command::SCard {
            key: key.to_string(),
        }])?)?
        .as_i64()
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let reply = single(self.run(vec![Command::SMembers {
            key: key.to_string(),
        }])?)?;
        reply
            .into_elements()
            .iter()
            .map(Reply::as_text)
            .collect()
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<i64> {
        single(self.run(vec![Command::Publish {
            channel: channel.to_string(),
            message: message.to_string(),
        }])?)?
        .as_i64()
    }

    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        self.run(commands)
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        Ok(self.subscribe_with(Matcher::Channel(channel.to_string())))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>> {
        Ok(self.subscribe_with(Matcher::Pattern(pattern.to_string())))
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    id: u64,
    matcher: Matcher,
    rx: broadcast::Receiver<Event>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Notification>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return Ok(None),
                Ok(Ok(event)) => {
                    if !self.matcher.matches(&event.channel) {
                        continue;
                    }
                    let pattern = match &self.matcher {
                        Matcher::Pattern(pattern) => Some(pattern.clone()),
                        Matcher::Channel(_) => None,
                    };
                    return Ok(Some(Notification {
                        channel: event.channel,
                        pattern,
                        payload: event.payload,
                    }));
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(skipped, "change feed subscriber lagged behind");
                }
                Ok(Err(RecvError::Closed)) => bail!("change feed closed"),
            }
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.shared.subscribers.lock().remove(&self.id);
    }
}

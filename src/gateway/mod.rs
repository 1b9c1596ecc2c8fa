//! # Gateway Module
//!
//! Seams to the external key-value store and its change-notification feed.
//! Everything above this module talks to [`StoreGateway`] and [`ChangeFeed`]
//! only, so the same tags run against Redis or the in-process [`MemoryStore`].

mod batch;
mod memory;
mod redis_store;

pub use batch::{Batch, PendingReply};
pub use memory::MemoryStore;
pub use redis_store::{RedisChangeFeed, RedisStore};

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A reply returned by the store for a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Text(String),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Interpret the reply as a string.
    pub fn as_text(&self) -> Result<String> {
        match self {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Int(value) => Ok(value.to_string()),
            Reply::Ok => Ok("OK".to_string()),
            Reply::Nil => anyhow::bail!("nil reply"),
            Reply::Array(_) => anyhow::bail!("array reply is not a string"),
        }
    }

    /// Interpret the reply as a 64-bit integer.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Reply::Int(value) => Ok(*value),
            Reply::Text(text) => text
                .trim()
                .parse::<i64>()
                .map_err(|err| anyhow::anyhow!("{text:?} is not an integer: {err}")),
            Reply::Nil => anyhow::bail!("nil reply"),
            other => anyhow::bail!("{other} is not an integer"),
        }
    }

    /// Interpret the reply as a 32-bit integer.
    pub fn as_i32(&self) -> Result<i32> {
        let wide = self.as_i64()?;
        i32::try_from(wide).map_err(|_| anyhow::anyhow!("{wide} does not fit in 32 bits"))
    }

    /// Elements of an array reply; any other reply yields a single element.
    pub fn into_elements(self) -> Vec<Reply> {
        match self {
            Reply::Array(items) => items,
            Reply::Nil => Vec::new(),
            other => vec![other],
        }
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Nil => write!(f, "(nil)"),
            Reply::Ok => write!(f, "OK"),
            Reply::Int(value) => write!(f, "{value}"),
            Reply::Text(text) => write!(f, "{text}"),
            Reply::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A single store command, queued into a [`Batch`] or executed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    Keys { pattern: String },
    SAdd { key: String, members: Vec<String> },
    SRem { key: String, members: Vec<String> },
    SCard { key: String },
    SMembers { key: String },
    Publish { channel: String, message: String },
}

impl Command {
    pub fn get(key: impl Into<String>) -> Self {
        Command::Get { key: key.into() }
    }

    pub fn set(key: impl Into<String>, value: impl ToString) -> Self {
        Command::Set {
            key: key.into(),
            value: value.to_string(),
        }
    }

    /// Upper-case command name as sent on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Keys { .. } => "KEYS",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SCard { .. } => "SCARD",
            Command::SMembers { .. } => "SMEMBERS",
            Command::Publish { .. } => "PUBLISH",
        }
    }
}

/// A message delivered by the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the message was published on, e.g. `__keyspace@0__:a:b:value`.
    pub channel: String,
    /// Pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    /// Message body; for keyspace events this is the command name.
    pub payload: String,
}

/// Key-value store operations consumed by the core.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn get(&self, key: &str) -> Result<Reply>;

    async fn set(&self, key: &str, value: &str) -> Result<Reply>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn sadd(&self, key: &str, members: &[String]) -> Result<i64>;

    async fn srem(&self, key: &str, members: &[String]) -> Result<i64>;

    async fn scard(&self, key: &str) -> Result<i64>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Returns the number of subscribers that received the message.
    async fn publish(&self, channel: &str, message: &str) -> Result<i64>;

    /// Execute all commands as one atomic transaction.
    ///
    /// Either every command runs and one reply per command is returned in
    /// submission order, or none of them takes effect.
    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<Reply>>;
}

/// A live subscription on the change feed.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `Ok(None)` means the timeout elapsed.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Notification>>;
}

/// Change-notification subscriptions consumed by the reconciliation loop.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;

    async fn psubscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>>;
}

/// Channel the store publishes on for writes to `key` in database `db`.
pub fn keyspace_channel(db: u32, key: &str) -> String {
    format!("__keyspace@{db}__:{key}")
}

/// Redis-style glob match supporting `*`, `?` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    star = Some(p);
                    mark = t;
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '\\' if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                    p += 2;
                    t += 1;
                    continue;
                }
                c if c != '\\' && c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some(s) => {
                p = s + 1;
                mark += 1;
                t = mark;
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

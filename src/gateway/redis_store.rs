//! Redis backend for both gateways.
//!
//! Commands share one multiplexed connection; transactions are sent as
//! atomic MULTI/EXEC pipelines so concurrent callers never interleave inside
//! a transaction. Each subscription owns a dedicated pub/sub connection.

use super::{ChangeFeed, Command, Notification, Reply, StoreGateway, Subscription};
use crate::config::StoreConfig;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

/// Command connection to a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect using `config.url`, failing after `config.connect_timeout_secs`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .with_context(|| format!("invalid redis url {}", config.url))?;
        let conn = tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| anyhow!("timed out connecting to {}", config.url))?
        .with_context(|| format!("connect to {}", config.url))?;

        let store = Self { conn };
        if config.configure_notifications {
            store.enable_keyspace_events().await?;
        }
        info!(url = %config.url, "connected to redis");
        Ok(store)
    }

    /// Turn on keyspace notifications for all key events.
    pub async fn enable_keyspace_events(&self) -> Result<()> {
        let mut cmd = redis::cmd("CONFIG");
        cmd.arg("SET").arg("notify-keyspace-events").arg("KA");
        self.query(cmd).await.context("enable keyspace events")?;
        Ok(())
    }

    async fn query(&self, cmd: redis::Cmd) -> Result<Reply> {
        let mut conn = self.conn.clone();
        let value: redis::Value = cmd.query_async(&mut conn).await?;
        Ok(to_reply(value))
    }

    async fn query_strings(&self, cmd: redis::Cmd) -> Result<Vec<String>> {
        self.query(cmd)
            .await?
            .into_elements()
            .iter()
            .map(Reply::as_text)
            .collect()
    }
}

fn to_cmd(command: &Command) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name());
    match command {
        Command::Get { key } | Command::SCard { key } | Command::SMembers { key } => {
            cmd.arg(key);
        }
        Command::Set { key, value } => {
            cmd.arg(key).arg(value);
        }
        Command::Keys { pattern } => {
            cmd.arg(pattern);
        }
        Command::SAdd { key, members } | Command::SRem { key, members } => {
            cmd.arg(key).arg(members);
        }
        Command::Publish { channel, message } => {
            cmd.arg(channel).arg(message);
        }
    }
    cmd
}

fn to_reply(value: redis::Value) -> Reply {
    match value {
        redis::Value::Nil => Reply::Nil,
        redis::Value::Okay => Reply::Ok,
        redis::Value::Int(value) => Reply::Int(value),
        redis::Value::BulkString(bytes) => {
            Reply::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        redis::Value::SimpleString(text) => Reply::Text(text),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Reply::Array(items.into_iter().map(to_reply).collect())
        }
        other => Reply::Text(format!("{other:?}")),
    }
}

#[async_trait]
impl StoreGateway for RedisStore {
    async fn get(&self, key: &str) -> Result<Reply> {
        self.query(to_cmd(&Command::get(key))).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<Reply> {
        self.query(to_cmd(&Command::set(key, value))).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.query_strings(to_cmd(&Command::Keys {
            pattern: pattern.to_string(),
        }))
        .await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<i64> {
        self.query(to_cmd(&Command::SAdd {
            key: key.to_string(),
            members: members.to_vec(),
        }))
        .await?
        .as_i64()
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<i64> {
        self.query(to_cmd(&Command::SRem {
            key: key.to_string(),
            members: members.to_vec(),
        }))
        .await?
        .as_i64()
    }

    async fn scard(&self, key: &str) -> Result<i64> {
        self.query(to_cmd(&Command::SCard {
            key: key.to_string(),
        }))
        .await?
        .as_i64()
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.query_strings(to_cmd(&Command::SMembers {
            key: key.to_string(),
        }))
        .await
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<i64> {
        self.query(to_cmd(&Command::Publish {
            channel: channel.to_string(),
            message: message.to_string(),
        }))
        .await?
        .as_i64()
    }

    async fn exec(&self, commands: Vec<Command>) -> Result<Vec<Reply>> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            pipe.add_command(to_cmd(command));
        }
        let mut conn = self.conn.clone();
        let values: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .context("transaction failed")?;
        Ok(values.into_iter().map(to_reply).collect())
    }
}

/// Change-feed client; opens one pub/sub connection per subscription.
#[derive(Clone)]
pub struct RedisChangeFeed {
    client: redis::Client,
    connect_timeout: Duration,
}

impl RedisChangeFeed {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .with_context(|| format!("invalid redis url {}", config.url))?;
        Ok(Self {
            client,
            connect_timeout: config.connect_timeout(),
        })
    }

    async fn open(&self) -> Result<redis::aio::PubSub> {
        tokio::time::timeout(self.connect_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| anyhow!("timed out opening pub/sub connection"))?
            .context("open pub/sub connection")
    }
}

#[async_trait]
impl ChangeFeed for RedisChangeFeed {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self.open().await?;
        pubsub
            .subscribe(channel)
            .await
            .with_context(|| format!("subscribe {channel}"))?;
        debug!(channel, "subscribed");
        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>> {
        let mut pubsub = self.open().await?;
        pubsub
            .psubscribe(pattern)
            .await
            .with_context(|| format!("psubscribe {pattern}"))?;
        debug!(pattern, "pattern subscribed");
        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }
}

struct RedisSubscription {
    messages: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Notification>> {
        let msg = match tokio::time::timeout(timeout, self.messages.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => bail!("pub/sub connection closed"),
            Ok(Some(msg)) => msg,
        };
        let pattern = if msg.from_pattern() {
            msg.get_pattern::<String>().ok()
        } else {
            None
        };
        Ok(Some(Notification {
            channel: msg.get_channel_name().to_string(),
            pattern,
            payload: msg.get_payload::<String>().context("decode payload")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_mapping() {
        assert_eq!(to_reply(redis::Value::Nil), Reply::Nil);
        assert_eq!(to_reply(redis::Value::Okay), Reply::Ok);
        assert_eq!(
            to_reply(redis::Value::BulkString(b"50".to_vec())),
            Reply::Text("50".to_string())
        );
        assert_eq!(
            to_reply(redis::Value::Array(vec![
                redis::Value::Int(1),
                redis::Value::SimpleString("OK".to_string()),
            ])),
            Reply::Array(vec![Reply::Int(1), Reply::Text("OK".to_string())])
        );
    }

    #[test]
    fn test_command_names_reach_the_wire() {
        let packed = to_cmd(&Command::set("@pressure:tank-0:value", 50)).get_packed_command();
        let wire = String::from_utf8_lossy(&packed);
        assert!(wire.contains("SET"));
        assert!(wire.contains("@pressure:tank-0:value"));
        assert!(wire.contains("50"));
    }
}

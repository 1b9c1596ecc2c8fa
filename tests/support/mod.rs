use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tagsync_rs::{
    Command, ManualClock, MemoryStore, ReconcileSettings, Reply, StoreGateway, TagContext,
};

pub const START: i64 = 1_700_000_000;

/// Reconciliation pacing short enough for tests.
#[allow(dead_code)]
pub fn fast_settings() -> ReconcileSettings {
    ReconcileSettings {
        backoff: Duration::from_millis(5),
        receive_timeout: Duration::from_millis(50),
        keyspace_db: 0,
    }
}

/// In-memory context with a manual clock and fast reconciliation.
#[allow(dead_code)]
pub fn memory_context() -> (MemoryStore, TagContext, Arc<ManualClock>) {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(START));
    let ctx = TagContext::in_memory(&store)
        .with_clock(clock.clone())
        .with_settings(fast_settings());
    (store, ctx, clock)
}

/// Poll `check` until it holds or two seconds pass.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Store whose transactions always fail; plain commands pass through.
#[allow(dead_code)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub attempts: AtomicUsize,
}

#[allow(dead_code)]
impl FailingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreGateway for FailingStore {
    async fn get(&self, key: &str) -> anyhow::Result<Reply> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<Reply> {
        self.inner.set(key, value).await
    }

    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        self.inner.keys(pattern).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> anyhow::Result<i64> {
        self.inner.sadd(key, members).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> anyhow::Result<i64> {
        self.inner.srem(key, members).await
    }

    async fn scard(&self, key: &str) -> anyhow::Result<i64> {
        self.inner.scard(key).await
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        self.inner.smembers(key).await
    }

    async fn publish(&self, channel: &str, message: &str) -> anyhow::Result<i64> {
        self.inner.publish(channel, message).await
    }

    async fn exec(&self, _commands: Vec<Command>) -> anyhow::Result<Vec<Reply>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        bail!("EXECABORT Transaction discarded because of previous errors")
    }
}

/// Store where another writer lands `key = value` right after the first
/// transaction commits, before the caller regains control.
#[allow(dead_code)]
pub struct RacingWriterStore {
    pub inner: MemoryStore,
    key: String,
    value: String,
    fired: AtomicBool,
}

#[allow(dead_code)]
impl RacingWriterStore {
    pub fn new(inner: MemoryStore, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            inner,
            key: key.into(),
            value: value.into(),
            fired: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StoreGateway for RacingWriterStore {
    async fn get(&self, key: &str) -> anyhow::Result<Reply> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<Reply> {
        self.inner.set(key, value).await
    }

    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        self.inner.keys(pattern).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> anyhow::Result<i64> {
        self.inner.sadd(key, members).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> anyhow::Result<i64> {
        self.inner.srem(key, members).await
    }

    async fn scard(&self, key: &str) -> anyhow::Result<i64> {
        self.inner.scard(key).await
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        self.inner.smembers(key).await
    }

    async fn publish(&self, channel: &str, message: &str) -> anyhow::Result<i64> {
        self.inner.publish(channel, message).await
    }

    async fn exec(&self, commands: Vec<Command>) -> anyhow::Result<Vec<Reply>> {
        let replies = self.inner.exec(commands).await?;
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.inner.set(&self.key, &self.value).await?;
        }
        Ok(replies)
    }
}

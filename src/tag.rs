//! # Tag Module
//!
//! Named, typed records persisted as one key per field under
//! `<name>:<field>`, plus the [`Entity`] capability set shared by every kind
//! of entity a registry can hold.

use crate::clock::{Clock, SystemClock};
use crate::config::TagsyncConfig;
use crate::error::{Result, TagError};
use crate::gateway::{
    Batch, ChangeFeed, Command, MemoryStore, Notification, RedisChangeFeed, RedisStore, Reply,
    StoreGateway,
};
use crate::property::{FieldKind, FieldValue, Property, PropertyTable};
use crate::reconcile::{self, AppliedChange, ReconcileHandle, ReconcileSettings};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Capability set of anything a registry can admit.
#[async_trait]
pub trait Entity: fmt::Display + Send + Sync {
    /// Read a field from memory by name.
    fn property(&self, property: &str) -> Result<FieldValue>;

    /// Write a field in memory by name. Internal update path: protected
    /// fields such as `name` are writable here.
    fn assign(&mut self, property: &str, value: FieldValue) -> Result<()>;

    /// Persist the entity and start whatever keeps it live.
    async fn initialize(&mut self) -> Result<()>;

    /// Read `<path>:<property>`.
    async fn get(&self, path: &str, property: &str) -> Result<Reply>;

    /// Write `<path>:<property>`.
    async fn set(&self, path: &str, property: &str, value: FieldValue) -> Result<()>;

    /// Stop any background work owned by the entity.
    async fn shutdown(&mut self) {}

    /// The entity's current name.
    fn name(&self) -> String {
        match self.property("name") {
            Ok(FieldValue::Text(name)) => name,
            _ => String::new(),
        }
    }
}

/// In-memory fields of a [`Tag`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFields {
    pub name: String,
    pub description: String,
    pub value: i32,
    pub quality: i32,
    pub timestamp: i64,
}

/// Fields shared between a tag and its reconciliation loop.
pub type SharedFields = Arc<Mutex<TagFields>>;

fn text_of(value: FieldValue) -> String {
    match value {
        FieldValue::Text(text) => text,
        other => other.to_string(),
    }
}

fn int_of(value: FieldValue) -> i32 {
    match value {
        FieldValue::Int(value) => value,
        _ => 0,
    }
}

/// Field table for tags, in persistence order.
pub static TAG_PROPERTIES: PropertyTable<TagFields> = PropertyTable {
    entity: "Tag",
    properties: &[
        Property {
            name: "name",
            kind: FieldKind::Text,
            get: |t| FieldValue::Text(t.name.clone()),
            set: |t, v| t.name = text_of(v),
        },
        Property {
            name: "description",
            kind: FieldKind::Text,
            get: |t| FieldValue::Text(t.description.clone()),
            set: |t, v| t.description = text_of(v),
        },
        Property {
            name: "value",
            kind: FieldKind::Int,
            get: |t| FieldValue::Int(t.value),
            set: |t, v| t.value = int_of(v),
        },
        Property {
            name: "quality",
            kind: FieldKind::Int,
            get: |t| FieldValue::Int(t.quality),
            set: |t, v| t.quality = int_of(v),
        },
        Property {
            name: "timestamp",
            kind: FieldKind::Int64,
            get: |t| FieldValue::Int64(t.timestamp),
            set: |t, v| {
                if let FieldValue::Int64(seconds) = v {
                    t.timestamp = seconds;
                }
            },
        },
    ],
};

/// Properties only internal update paths may change.
const PROTECTED: [&str; 2] = ["name", "timestamp"];

/// Backend handles shared by every tag created against one store.
#[derive(Clone)]
pub struct TagContext {
    pub store: Arc<dyn StoreGateway>,
    pub feed: Arc<dyn ChangeFeed>,
    pub clock: Arc<dyn Clock>,
    pub settings: ReconcileSettings,
}

impl TagContext {
    pub fn new(store: Arc<dyn StoreGateway>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            store,
            feed,
            clock: Arc::new(SystemClock),
            settings: ReconcileSettings::default(),
        }
    }

    /// Context backed by an in-process store.
    pub fn in_memory(store: &MemoryStore) -> Self {
        let shared = Arc::new(store.clone());
        let mut ctx = Self::new(shared.clone(), shared);
        ctx.settings.keyspace_db = store.keyspace_db();
        ctx
    }

    /// Context backed by Redis as described by `config`.
    pub async fn connect(config: &TagsyncConfig) -> anyhow::Result<Self> {
        let store = RedisStore::connect(&config.store).await?;
        let feed = RedisChangeFeed::new(&config.store)?;
        Ok(Self::new(Arc::new(store), Arc::new(feed)).with_settings(config.reconcile_settings()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: ReconcileSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// A named record persisted under `<name>:<field>` keys.
///
/// A tag is detached until [`Entity::initialize`] persists it; from then on a
/// reconciliation loop folds every write to its keys back into memory.
pub struct Tag {
    ctx: TagContext,
    fields: SharedFields,
    reconcile: Option<ReconcileHandle>,
    /// Last timestamp this tag wrote.
    last_stamp: AtomicI64,
}

impl Tag {
    /// Create a detached tag stamped with the context clock. No store I/O.
    pub fn new(
        ctx: &TagContext,
        name: impl Into<String>,
        description: impl Into<String>,
        value: i32,
        quality: i32,
    ) -> Self {
        let fields = TagFields {
            name: name.into(),
            description: description.into(),
            value,
            quality,
            timestamp: ctx.clock.now(),
        };
        Self {
            ctx: ctx.clone(),
            last_stamp: AtomicI64::new(fields.timestamp),
            fields: Arc::new(Mutex::new(fields)),
            reconcile: None,
        }
    }

    /// Copy of the current in-memory fields.
    pub fn snapshot(&self) -> TagFields {
        self.fields.lock().clone()
    }

    /// Whether the reconciliation loop is running.
    pub fn is_live(&self) -> bool {
        self.reconcile
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one reconciliation step for `notification` against this tag.
    /// `Ok(None)` when the notification is for another entity's key.
    pub async fn reconcile(&self, notification: &Notification) -> Result<Option<AppliedChange>> {
        reconcile::apply_notification(self.ctx.store.as_ref(), &self.fields, notification).await
    }

    fn key(path: &str, property: &str) -> String {
        format!("{path}:{property}")
    }

    /// Clock time, bumped past every timestamp seen so far. Two writes
    /// within one clock second still get strictly increasing stamps.
    fn next_timestamp(&self) -> i64 {
        let now = self.ctx.clock.now();
        let floor = self.fields.lock().timestamp;
        let advance = |last: i64| now.max(last.max(floor) + 1);
        match self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(advance(last)))
        {
            Ok(previous) | Err(previous) => advance(previous),
        }
    }
}

#[async_trait]
impl Entity for Tag {
    fn property(&self, property: &str) -> Result<FieldValue> {
        TAG_PROPERTIES.read(&self.fields.lock(), property)
    }

    fn assign(&mut self, property: &str, value: FieldValue) -> Result<()> {
        TAG_PROPERTIES.write(&mut self.fields.lock(), property, value)
    }

    /// Subscribes before persisting so no write landing right after the
    /// commit is missed. A failed commit drops the subscription.
    async fn initialize(&mut self) -> Result<()> {
        let fields = self.snapshot();

        let subscription = match self.reconcile {
            Some(_) => None,
            None => Some(
                self.ctx
                    .feed
                    .psubscribe(&self.ctx.settings.pattern_for(&fields.name))
                    .await
                    .map_err(TagError::Store)?,
            ),
        };

        let mut batch = Batch::new();
        for property in TAG_PROPERTIES.properties {
            batch.queue(Command::set(
                Self::key(&fields.name, property.name),
                (property.get)(&fields),
            ));
        }
        batch.commit(self.ctx.store.as_ref()).await?;

        if let Some(subscription) = subscription {
            self.reconcile = Some(reconcile::spawn(
                fields.name.clone(),
                Arc::clone(&self.ctx.store),
                subscription,
                Arc::clone(&self.fields),
                self.ctx.settings,
            ));
        }
        Ok(())
    }

    async fn get(&self, path: &str, property: &str) -> Result<Reply> {
        self.ctx
            .store
            .get(&Self::key(path, property))
            .await
            .map_err(TagError::Store)
    }

    /// Write-through update. The in-memory field changes only once the
    /// reconciliation loop observes the resulting notification.
    async fn set(&self, path: &str, property: &str, value: FieldValue) -> Result<()> {
        if PROTECTED
            .iter()
            .any(|protected| protected.eq_ignore_ascii_case(property))
        {
            return Err(TagError::NotEditable {
                property: property.to_string(),
            });
        }
        let field = TAG_PROPERTIES.check(property, &value)?;

        let mut batch = Batch::new();
        batch.queue(Command::set(Self::key(path, field.name), value));
        batch.queue(Command::set(Self::key(path, "timestamp"), self.next_timestamp()));
        batch.commit(self.ctx.store.as_ref()).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.reconcile.take() {
            handle.join().await;
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.fields.lock();
        write!(
            f,
            "Tag{{Name: {}, Description: {}, Value: {}, Quality: {}, Timestamp: {}}}",
            t.name, t.description, t.value, t.quality, t.timestamp
        )
    }
}

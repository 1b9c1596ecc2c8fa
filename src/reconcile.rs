//! # Reconciliation Module
//!
//! Background task that keeps a tag's in-memory fields eventually consistent
//! with every write to its key namespace, whatever the origin of the write.
//!
//! ```text
//!  psubscribe __keyspace@<db>__:<tag>:*      (once)
//!        │
//!        ▼
//!  receive(timeout) ──timeout──▶ log ─────────────┐
//!        │                                       │
//!        ▼                                       │
//!  parse channel → GET key → convert → apply     │
//!        │                                       │
//!        ▼                                       ▼
//!     sleep(backoff) ◀────────────────────────────┘
//! ```
//!
//! A step re-reads the current value instead of applying a delta, so
//! replaying a notification is idempotent.

use crate::config::{DEFAULT_KEYSPACE_DB, DEFAULT_RECEIVE_TIMEOUT_MS, DEFAULT_RECONCILE_BACKOFF_MS};
use crate::error::{Result, TagError};
use crate::gateway::{keyspace_channel, Notification, StoreGateway, Subscription};
use crate::property::{convert, FieldValue};
use crate::tag::{SharedFields, TAG_PROPERTIES};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Pacing of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Pause after every step, successful or not
    pub backoff: Duration,
    /// Upper bound on one wait for a notification
    pub receive_timeout: Duration,
    /// Database whose keyspace channels are watched
    pub keyspace_db: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(DEFAULT_RECONCILE_BACKOFF_MS),
            receive_timeout: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS),
            keyspace_db: DEFAULT_KEYSPACE_DB,
        }
    }
}

impl ReconcileSettings {
    /// Pattern matching every keyspace channel under `name`. Glob
    /// metacharacters in the name match only themselves.
    pub fn pattern_for(&self, name: &str) -> String {
        keyspace_channel(self.keyspace_db, &format!("{}:*", escape_glob(name)))
    }
}

fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A key recovered from a keyspace channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedKey<'a> {
    /// The full store key, `<namespace>:<local>:<property>`
    pub key: &'a str,
    /// The entity part, `<namespace>:<local>`
    pub entity: &'a str,
    /// The trailing property segment
    pub property: &'a str,
}

/// Split `__keyspace@<db>__:<entity>:<property>` into its parts.
pub fn parse_keyspace_channel(channel: &str) -> Option<ChangedKey<'_>> {
    let (prefix, key) = channel.split_once(':')?;
    if !prefix.starts_with("__keyspace@") || !prefix.ends_with("__") {
        return None;
    }
    let (entity, property) = key.rsplit_once(':')?;
    if entity.is_empty() || property.is_empty() {
        return None;
    }
    Some(ChangedKey {
        key,
        entity,
        property,
    })
}

/// The result of one successful reconciliation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub entity: String,
    pub property: &'static str,
    pub value: FieldValue,
}

/// Fold one notification back into `fields`: re-read the changed key,
/// convert it to the property's declared kind and assign it.
///
/// Returns `Ok(None)` when the key belongs to another entity, e.g. `a:b`
/// whose keys also match the subscription of `a`.
pub async fn apply_notification(
    store: &dyn StoreGateway,
    fields: &SharedFields,
    notification: &Notification,
) -> Result<Option<AppliedChange>> {
    let changed =
        parse_keyspace_channel(&notification.channel).ok_or_else(|| TagError::Conversion {
            property: notification.channel.clone(),
            reason: "not a keyspace channel".to_string(),
        })?;

    if fields.lock().name != changed.entity {
        return Ok(None);
    }

    let property = TAG_PROPERTIES
        .lookup(changed.property)
        .map_err(|_| TagError::Conversion {
            property: changed.property.to_string(),
            reason: "missing case for property".to_string(),
        })?;

    let reply = store.get(changed.key).await.map_err(TagError::Store)?;
    let value = convert(property.name, property.kind, &reply)?;

    TAG_PROPERTIES.write(&mut fields.lock(), property.name, value.clone())?;

    Ok(Some(AppliedChange {
        entity: changed.entity.to_string(),
        property: property.name,
        value,
    }))
}

/// Owner of a running reconciliation loop. Dropping it cancels the loop.
pub struct ReconcileHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ReconcileHandle {
    /// Ask the loop to stop at its next suspension point.
    pub fn cancel(&self) {
        // Fails only when the loop already exited.
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn join(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "reconciliation task ended abnormally");
            }
        }
    }
}

impl Drop for ReconcileHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Start the loop on an already established subscription.
pub fn spawn(
    name: String,
    store: Arc<dyn StoreGateway>,
    subscription: Box<dyn Subscription>,
    fields: SharedFields,
    settings: ReconcileSettings,
) -> ReconcileHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run(name, store, subscription, fields, settings, shutdown_rx));
    ReconcileHandle {
        shutdown,
        task: Some(task),
    }
}

async fn run(
    name: String,
    store: Arc<dyn StoreGateway>,
    mut subscription: Box<dyn Subscription>,
    fields: SharedFields,
    settings: ReconcileSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(tag = %name, "reconciliation started");
    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = subscription.receive(settings.receive_timeout) => received,
        };

        match received {
            Ok(None) => debug!(tag = %name, "timed out waiting for update"),
            Ok(Some(notification)) => {
                match apply_notification(store.as_ref(), &fields, &notification).await {
                    Ok(Some(change)) => debug!(
                        tag = %name,
                        property = change.property,
                        value = %change.value,
                        "applied external write"
                    ),
                    Ok(None) => debug!(
                        tag = %name,
                        channel = %notification.channel,
                        "ignored write to another entity"
                    ),
                    Err(err) => warn!(
                        tag = %name,
                        channel = %notification.channel,
                        error = %err,
                        "could not apply update"
                    ),
                }
            }
            Err(err) => warn!(tag = %name, error = %err, "change feed receive failed"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(settings.backoff) => {}
        }
    }
    debug!(tag = %name, "reconciliation stopped");
}

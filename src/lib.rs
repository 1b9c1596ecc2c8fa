//! # Tagsync
//!
//! Named, typed tag entities persisted in an external key-value store and kept
//! live-synchronized with out-of-band writes to that store.
//!
//! A [`Tag`] is created detached, admitted into a [`TagManager`] which
//! namespaces and persists it in one transaction, and from then on a
//! per-tag reconciliation loop folds every change notification for its keys
//! back into memory. Writes through the API are write-through: memory only
//! changes once the store reports the write.
//!
//! ```no_run
//! use tagsync_rs::{FieldValue, MemoryStore, Tag, TagContext, TagManager};
//!
//! # async fn demo() -> Result<(), tagsync_rs::TagError> {
//! let store = MemoryStore::new();
//! let ctx = TagContext::in_memory(&store);
//! let mut manager = TagManager::new("@pressure");
//! manager.admit(Tag::new(&ctx, "tank-0", "tank 0", 0, 100)).await?;
//! manager.set("@pressure:tank-0", "value", FieldValue::Int(50)).await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod property;
pub mod reconcile;
pub mod registry;
pub mod tag;
pub mod vector;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigOverrides, TagsyncConfig};
pub use error::TagError;
pub use gateway::{
    Batch, ChangeFeed, Command, MemoryStore, Notification, PendingReply, RedisChangeFeed,
    RedisStore, Reply, StoreGateway, Subscription,
};
pub use property::{FieldKind, FieldValue};
pub use reconcile::{ReconcileHandle, ReconcileSettings};
pub use registry::TagManager;
pub use tag::{Entity, Tag, TagContext, TagFields};
pub use vector::Vector;

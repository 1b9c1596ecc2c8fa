//! Default constants for tagsync configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Store Defaults
// =============================================================================

/// Default store endpoint
pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";

/// Default connect timeout (seconds) for command and pub/sub connections
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Database whose keyspace channels are watched
pub const DEFAULT_KEYSPACE_DB: u32 = 0;

// =============================================================================
// Reconciliation Defaults
// =============================================================================

/// Pause after every reconciliation step (milliseconds)
/// Rate-limits churn when a key is rewritten in a tight loop.
pub const DEFAULT_RECONCILE_BACKOFF_MS: u64 = 500;

/// How long one receive waits for a change notification (milliseconds)
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 10_000;

/// Undelivered notifications buffered per in-process subscriber
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 4096;

// =============================================================================
// Registry Defaults
// =============================================================================

/// Namespace used when no registry name is configured
pub const DEFAULT_REGISTRY_NAME: &str = "@pressure";

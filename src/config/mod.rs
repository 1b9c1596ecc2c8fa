//! Unified configuration for tagsync components.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (tagsync.toml)
//! ```toml
//! [store]
//! url = "redis://127.0.0.1:6379"
//! connect_timeout_secs = 10
//! configure_notifications = true
//!
//! [reconcile]
//! backoff_ms = 500
//! receive_timeout_ms = 10000
//!
//! [registry]
//! name = "@pressure"
//! ```

mod defaults;

pub use defaults::*;

use crate::reconcile::ReconcileSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsyncConfig {
    /// Store and change-feed endpoint
    pub store: StoreConfig,
    /// Reconciliation loop pacing
    pub reconcile: ReconcileConfig,
    /// Registry naming
    pub registry: RegistryConfig,
}

impl TagsyncConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - CLI overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(TagsyncConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Environment variables with TAGSYNC_ prefix, sections separated by a
        // double underscore, e.g. TAGSYNC_STORE__CONNECT_TIMEOUT_SECS
        figment = figment.merge(Env::prefixed("TAGSYNC_").split("__"));

        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// Reconciliation settings for tags created under this configuration.
    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            backoff: Duration::from_millis(self.reconcile.backoff_ms),
            receive_timeout: Duration::from_millis(self.reconcile.receive_timeout_ms),
            keyspace_db: self.store.keyspace_db,
        }
    }
}

/// Store endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection URL, e.g. `redis://host:6379/0`
    pub url: String,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Database whose keyspace notifications are consumed
    pub keyspace_db: u32,
    /// Issue `CONFIG SET notify-keyspace-events KA` on connect
    pub configure_notifications: bool,
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STORE_URL.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            keyspace_db: DEFAULT_KEYSPACE_DB,
            configure_notifications: false,
        }
    }
}

/// Reconciliation loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Pause after each step (milliseconds)
    pub backoff_ms: u64,
    /// Receive timeout (milliseconds)
    pub receive_timeout_ms: u64,
    /// Per-subscriber buffer for the in-process store
    pub notification_capacity: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            backoff_ms: DEFAULT_RECONCILE_BACKOFF_MS,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Namespace prefix for admitted tags
    pub name: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_REGISTRY_NAME.to_string(),
        }
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configure_notifications: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TagsyncConfig::default();
        assert_eq!(config.store.url, DEFAULT_STORE_URL);
        assert_eq!(config.registry.name, DEFAULT_REGISTRY_NAME);
        let settings = config.reconcile_settings();
        assert_eq!(settings.backoff, Duration::from_millis(500));
        assert_eq!(settings.keyspace_db, 0);
    }

    #[test]
    fn test_file_and_overrides_layering() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[store]\nurl = \"redis://cache:6380\"\nkeyspace_db = 2\n\n[registry]\nname = \"@flow\""
        )
        .unwrap();

        let overrides = ConfigOverrides {
            registry: Some(RegistryOverrides {
                name: Some("@level".to_string()),
            }),
            ..Default::default()
        };
        let path = file.path().to_str().unwrap().to_string();
        let config = TagsyncConfig::load(Some(&path), overrides).unwrap();

        assert_eq!(config.store.url, "redis://cache:6380");
        assert_eq!(config.store.keyspace_db, 2);
        assert_eq!(config.registry.name, "@level");
        assert_eq!(config.reconcile.backoff_ms, DEFAULT_RECONCILE_BACKOFF_MS);
    }

    #[test]
    fn test_env_reaches_underscored_fields() {
        std::env::set_var("TAGSYNC_STORE__CONNECT_TIMEOUT_SECS", "3");
        std::env::set_var("TAGSYNC_RECONCILE__NOTIFICATION_CAPACITY", "64");
        let config = TagsyncConfig::from_env(None);
        std::env::remove_var("TAGSYNC_STORE__CONNECT_TIMEOUT_SECS");
        std::env::remove_var("TAGSYNC_RECONCILE__NOTIFICATION_CAPACITY");

        let config = config.unwrap();
        assert_eq!(config.store.connect_timeout_secs, 3);
        assert_eq!(config.reconcile.notification_capacity, 64);
    }

    #[test]
    fn test_config_serde() {
        let json = serde_json::to_string(&RegistryConfig::default()).unwrap();
        assert_eq!(json, "{\"name\":\"@pressure\"}");

        let store: StoreConfig = serde_json::from_str("{\"url\":\"redis://other\"}").unwrap();
        assert_eq!(store.url, "redis://other");
        assert_eq!(store.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
    }
}

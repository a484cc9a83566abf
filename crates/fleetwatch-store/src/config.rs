//! Store configuration.

use std::time::Duration;

use serde::Deserialize;

/// Pool and connection settings for [`crate::SqlStore`].
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Connection URL, e.g. `sqlite://fleetwatch.db`.
    #[serde(default = "StoreConfig::default_url")]
    pub database_url: String,

    /// Connections kept open while idle.
    #[serde(default = "StoreConfig::default_min_connections")]
    pub min_connections: u32,

    /// Upper bound on pooled connections.
    #[serde(default = "StoreConfig::default_max_connections")]
    pub max_connections: u32,

    /// Bound on acquiring a connection and on lock waits, in milliseconds.
    #[serde(default = "StoreConfig::default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl StoreConfig {
    fn default_url() -> String {
        "sqlite://fleetwatch.db".to_string()
    }

    const fn default_min_connections() -> u32 {
        1
    }

    const fn default_max_connections() -> u32 {
        10
    }

    const fn default_command_timeout_ms() -> u64 {
        60_000
    }

    /// Create a config for the given URL with default pool sizing.
    #[must_use]
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    /// The command timeout as a `Duration`.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: Self::default_url(),
            min_connections: Self::default_min_connections(),
            max_connections: Self::default_max_connections(),
            command_timeout_ms: Self::default_command_timeout_ms(),
        }
    }
}

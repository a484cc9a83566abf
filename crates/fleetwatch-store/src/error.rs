//! Error types for the storage layer.

use fleetwatch_core::AgentId;
use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced agent is not registered.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// No pooled connection became available within the command timeout.
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    /// The pool has been closed.
    #[error("connection pool is closed")]
    Closed,

    /// The store could not be initialized.
    #[error("store initialization failed: {0}")]
    Init(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns true if the next work cycle may succeed where this one failed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::PoolTimeout | Self::Database(_) | Self::Closed)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::Closed,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<fleetwatch_core::CoreError> for StoreError {
    fn from(err: fleetwatch_core::CoreError) -> Self {
        Self::Serialization(err.to_string())
    }
}

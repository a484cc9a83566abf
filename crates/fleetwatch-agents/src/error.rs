//! Error types for the orchestrating agents.

use fleetwatch_core::IdError;
use fleetwatch_recovery::RecoveryError;
use fleetwatch_store::StoreError;
use thiserror::Error;

/// A result type using `AgentError`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised inside an agent work cycle or during startup.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Storage operation failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Detection or recovery failed.
    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    /// An agent identifier failed validation.
    #[error("invalid agent id: {0}")]
    InvalidId(#[from] IdError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// The cycle exceeded its watchdog deadline.
    #[error("cycle exceeded watchdog timeout of {0:?}")]
    Watchdog(std::time::Duration),
}

impl AgentError {
    /// Returns true if the next cycle may succeed where this one failed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retriable(),
            Self::Recovery(e) => e.is_retriable(),
            Self::Watchdog(_) => true,
            Self::Config(_) | Self::InvalidId(_) => false,
        }
    }
}

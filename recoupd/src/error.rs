//! Daemon error types.

use recoup_collect::CollectError;
use recoup_domain::{AdvanceId, DomainError};
use recoup_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Collection execution error
    #[error("Collection error: {0}")]
    Collect(#[from] CollectError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Advance not found
    #[error("Advance not found: {0}")]
    AdvanceNotFound(AdvanceId),

    /// Message bus error
    #[error("Message bus error: {0}")]
    Bus(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

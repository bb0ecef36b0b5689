//! Error types for the agent poller

use poller_store::StoreError;
use thiserror::Error;

/// Errors surfaced to callers of the poller
///
/// Task-level failures never appear here; they are recorded on the task.
#[derive(Debug, Error)]
pub enum PollerError {
    /// The store could not be reached or a store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The configuration is invalid
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PollerError>;

//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Port already exposed, or an identity field clashes.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no node has {cpu} cpu and {memory} bytes available")]
    InsufficientResources { cpu: f64, memory: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid application: {0}")]
    Invalid(String),

    #[error("state store error: {0}")]
    State(#[from] squall_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

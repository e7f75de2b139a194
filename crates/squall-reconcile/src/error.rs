use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures talking to the container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn {binary}: {reason}")]
    Spawn { binary: String, reason: String },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected engine output: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

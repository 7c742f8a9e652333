use thiserror::Error;

/// Errors surfaced by the command layer and the simulation core.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("not initialized")]
    NotInitialized,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("process '{0}' not found")]
    NotFound(String),

    #[error("scheduler already running")]
    AlreadyRunning,

    #[error("scheduler not running")]
    NotRunning,

    #[error("{0}")]
    MemoryFault(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub fn invalid(message: impl Into<String>) -> SimError {
        SimError::InvalidArgument(message.into())
    }

    pub fn fault(message: impl Into<String>) -> SimError {
        SimError::MemoryFault(message.into())
    }
}

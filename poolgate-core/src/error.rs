use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("Pool already exists: {0}")]
    PoolExists(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Completion allocation failed on slot {slot}: {reason}")]
    CompletionAlloc { slot: usize, reason: String },

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Wake channel closed on slot {0}")]
    WakeChannelClosed(usize),

    #[error("Short read on {key}: expected {expected} more bytes")]
    ShortRead { key: String, expected: u64 },

    #[error("Request body error: {0}")]
    Body(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GateError::ObjectNotFound(_))
    }
}

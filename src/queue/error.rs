use crate::error::{AppError, AppErrorKind, InfrastructureError};
use thiserror::Error;

/// Result type for broker operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[cfg(feature = "cache")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Queue error: {0}")]
    Other(String),
}

#[cfg(feature = "cache")]
impl From<bb8::RunError<redis::RedisError>> for QueueError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        QueueError::Pool(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Queue {
            message: err.to_string(),
        }))
    }
}

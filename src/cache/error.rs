//! Redis pool error types

use std::fmt;

/// Redis pool and command errors
#[derive(Debug)]
pub enum CacheError {
    /// Redis unavailable, pool exhausted, network issues
    ConnectionError(String),
    /// Payload could not be encoded or decoded
    SerializationError(String),
    /// Command executed but Redis rejected it
    OperationError(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::ConnectionError(msg) => write!(f, "Redis connection error: {}", msg),
            CacheError::SerializationError(msg) => write!(f, "Redis serialization error: {}", msg),
            CacheError::OperationError(msg) => write!(f, "Redis operation error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            CacheError::ConnectionError(err.to_string())
        } else {
            CacheError::OperationError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<bb8::RunError<redis::RedisError>> for CacheError {
    fn from(err: bb8::RunError<redis::RedisError>) -> Self {
        CacheError::ConnectionError(format!("Pool error: {}", err))
    }
}

/// Result type alias for Redis operations
pub type CacheResult<T> = Result<T, CacheError>;

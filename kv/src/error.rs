//! Error type for KV store operations.

use thiserror::Error;

/// Errors from the Redis-backed (or in-memory) stores.
#[derive(Error, Debug, Clone)]
pub enum KvError {
    /// The backing store rejected or failed the operation.
    #[error("kv backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

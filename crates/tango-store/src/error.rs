//! Error type for state store operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis-backend")]
    #[error("redis backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

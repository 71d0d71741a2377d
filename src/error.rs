//! Error types for Slidewin.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Slidewin operations.
///
/// No variant carries a fallback decision: callers pick fail-open or
/// fail-closed themselves.
#[derive(Error, Debug)]
pub enum SlidewinError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Window or bucket interval that cannot form a bucket grid
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// The sliding window script could not be registered with the store
    #[error("Script setup failed: {0}")]
    Setup(#[source] redis::RedisError),

    /// Connection or execution failure against Redis
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store did not answer within the command timeout
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with a reply of the wrong shape or type
    #[error("Malformed store reply: {0}")]
    Decode(String),

    /// The system clock is before the Unix epoch
    #[error("Clock error: {0}")]
    Clock(#[from] std::time::SystemTimeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for SlidewinError {
    fn from(err: ::config::ConfigError) -> Self {
        SlidewinError::Config(err.to_string())
    }
}

/// Result type alias for Slidewin operations.
pub type Result<T> = std::result::Result<T, SlidewinError>;

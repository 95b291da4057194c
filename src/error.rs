//! Error types for tollgate.

use thiserror::Error;

/// Main error type for tollgate operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Rejected constructor or dispatcher settings
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller's wait was cancelled before it was admitted
    #[error("Acquire cancelled before admission")]
    Cancelled,

    /// Configuration file or environment errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dispatcher worker failed to finish
    #[error("Worker error: {0}")]
    Worker(String),
}

impl From<config::ConfigError> for ThrottleError {
    fn from(err: config::ConfigError) -> Self {
        ThrottleError::Config(err.to_string())
    }
}

/// Result type alias for tollgate operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;

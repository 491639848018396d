//! Error types for Lodestar

use thiserror::Error;

/// Result type alias using LodestarError
pub type Result<T> = std::result::Result<T, LodestarError>;

/// Main error type shared by the Lodestar crates
#[derive(Debug, Error)]
pub enum LodestarError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Cache lifetime string could not be parsed
    #[error("Invalid cache lifetime '{0}', expected e.g. \"7 days\" or \"24 hours\"")]
    InvalidLifetime(String),
}

impl LodestarError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

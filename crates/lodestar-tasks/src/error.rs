//! Error types for hashing, caching, execution and pipeline setup

use std::path::PathBuf;
use std::time::Duration;

use lodestar_core::LodestarError;
use lodestar_project::ResolveError;

/// Fingerprint computation errors
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Input glob could not be parsed
    #[error("Invalid input glob '{glob}': {message}")]
    Glob { glob: String, message: String },

    /// Input file could not be read
    #[error("Failed to read input '{}': {error}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Manifest serialization failed
    #[error("Failed to serialize hash manifest: {0}")]
    Json(#[from] serde_json::Error),
}

/// Artifact cache and hash store errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Same fingerprint, different content: inputs changed without the hash
    /// changing
    #[error("Cache consistency violation for {hash}: {message}")]
    Consistency { hash: String, message: String },

    #[error("Hash prefix '{prefix}' is ambiguous, candidates: {}", .candidates.join(", "))]
    AmbiguousHash {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("No hash manifest found for '{0}'")]
    HashNotFound(String),
}

impl CacheError {
    pub fn is_consistency(&self) -> bool {
        matches!(self, Self::Consistency { .. })
    }
}

/// Errors from running a single attempt
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to spawn '{command}': {error}")]
    Spawn {
        command: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Failed while waiting on process: {0}")]
    Wait(#[from] std::io::Error),

    #[error("Timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// Errors that stop a run before any action executes
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] LodestarError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

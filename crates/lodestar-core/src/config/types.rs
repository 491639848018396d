//! Configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lifetime::parse_lifetime;

use super::defaults::{DEFAULT_CACHE_DIR, DEFAULT_CACHE_LIFETIME};

/// Configuration for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Maximum concurrent actions
    pub concurrency: usize,

    /// Abort the whole run on the first task failure
    pub fail_fast: bool,

    /// Retry count applied to tasks that don't set their own
    pub retry_count: u8,

    /// Walk the graph without hashing or executing anything
    pub dry_run: bool,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Hasher configuration
    pub hasher: HasherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: super::defaults::default_concurrency(),
            fail_fast: false,
            retry_count: 0,
            dry_run: false,
            cache: CacheConfig::default(),
            hasher: HasherConfig::default(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Cache directory, relative to the workspace root
    pub dir: PathBuf,

    /// How long entries stay valid, e.g. "7 days"
    pub lifetime: String,
}

impl CacheConfig {
    /// Parsed [`CacheConfig::lifetime`]
    pub fn lifetime(&self) -> Result<Duration> {
        Ok(parse_lifetime(&self.lifetime)?)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            lifetime: DEFAULT_CACHE_LIFETIME.to_string(),
        }
    }
}

/// Hasher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HasherConfig {
    /// Trade-off between hash accuracy and speed
    pub optimization: HashOptimization,
}

/// How input files are fingerprinted.
///
/// `Accuracy` hashes file contents byte for byte. `Performance` uses the
/// file's size and modification time, which is much cheaper but misses
/// edits that preserve both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashOptimization {
    #[default]
    Accuracy,
    Performance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.concurrency > 0);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.lifetime, "7 days");
        assert_eq!(config.hasher.optimization, HashOptimization::Accuracy);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{ "concurrency": 2, "cache": { "lifetime": "24 hours" }, "hasher": { "optimization": "performance" } }"#,
        )
        .unwrap();

        assert_eq!(config.concurrency, 2);
        assert!(config.cache.enabled);
        assert_eq!(
            config.cache.lifetime().unwrap(),
            Duration::from_secs(24 * 60 * 60)
        );
        assert_eq!(config.hasher.optimization, HashOptimization::Performance);
    }
}

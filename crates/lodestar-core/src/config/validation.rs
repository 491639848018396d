//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::lifetime::parse_lifetime;

use super::types::PipelineConfig;

/// Validate configuration
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    debug!("validating configuration");
    validate_pipeline(config)?;
    validate_cache(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_pipeline(config: &PipelineConfig) -> Result<()> {
    if config.concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "concurrency".to_string(),
            message: "must be greater than 0".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_cache(config: &PipelineConfig) -> Result<()> {
    if config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "cache.dir".to_string(),
            message: "cache directory cannot be empty".to_string(),
        }
        .into());
    }

    if let Err(e) = parse_lifetime(&config.cache.lifetime) {
        return Err(ConfigError::InvalidValue {
            field: "cache.lifetime".to_string(),
            message: e.to_string(),
        }
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = PipelineConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let config = PipelineConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bad_lifetime() {
        let mut config = PipelineConfig::default();
        config.cache.lifetime = "forever".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cache.lifetime"));
    }
}

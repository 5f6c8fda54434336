use crate::circuit_breaker::BreakerConfig;
use crate::error::{ResilienceError, Result};
use crate::recovery::RecoverySettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Config for breakers without an entry in `breakers`
    #[serde(default)]
    pub defaults: BreakerConfig,
    /// Per-dependency overrides, keyed by breaker name.
    ///
    /// An override replaces `defaults` as a whole; fields it leaves out take the built-in
    /// defaults.
    #[serde(default)]
    pub breakers: HashMap<String, BreakerConfig>,
    /// Failure logging
    #[serde(default)]
    pub recovery: RecoverySettings,
}

impl ResilienceConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ResilienceError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ResilienceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_breaker("defaults", &self.defaults)?;

        for (name, breaker) in &self.breakers {
            if name.trim().is_empty() {
                return Err(ResilienceError::Config(
                    "Breaker name cannot be empty".to_string(),
                ));
            }
            validate_breaker(name, breaker)?;
        }

        if self.recovery.log_interval_ms == 0 {
            return Err(ResilienceError::Config(
                "Recovery log interval must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self::default()
    }
}

fn validate_breaker(name: &str, config: &BreakerConfig) -> Result<()> {
    if !config.error_threshold.is_finite() || !(0.0..=1.0).contains(&config.error_threshold) {
        return Err(ResilienceError::Config(format!(
            "Error threshold must be between 0 and 1 for breaker: {}",
            name
        )));
    }

    if config.volume_threshold == 0 {
        return Err(ResilienceError::Config(format!(
            "Volume threshold must be > 0 for breaker: {}",
            name
        )));
    }

    if config.sleep_window_ms == 0 {
        return Err(ResilienceError::Config(format!(
            "Sleep window must be > 0 for breaker: {}",
            name
        )));
    }

    Ok(())
}

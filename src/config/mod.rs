// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{Result, VaultError};
use config::{Config, Environment, File};
use std::path::PathBuf;

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest), e.g. `GENVAULT_CACHE__FAST__CAPACITY`
    /// 2. Config file (`path`, or `~/.genvault/config.toml`)
    /// 3. Defaults (lowest)
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path
            .map(str::to_string)
            .unwrap_or_else(Self::default_config_path);

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            // Load from config file if it exists
            .add_source(File::with_name(&file).required(path.is_some()))
            .add_source(
                Environment::with_prefix("GENVAULT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| VaultError::Config(e.to_string()))?;

        let loaded: AppConfig = config
            .try_deserialize()
            .map_err(|e| VaultError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings that would make a component misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.cache.similarity.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(VaultError::Config(format!(
                "cache.similarity.threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }
        let weight = self.cache.fast.eviction.frequency_weight;
        if !(0.0..=1.0).contains(&weight) {
            return Err(VaultError::Config(format!(
                "cache.fast.eviction.frequency_weight must be within 0.0..=1.0, got {}",
                weight
            )));
        }
        if self.rate_limit.refill_per_second <= 0.0 || !self.rate_limit.refill_per_second.is_finite() {
            return Err(VaultError::Config(
                "rate_limit.refill_per_second must be positive".to_string(),
            ));
        }
        if self.cache.fast.shards == 0 || self.cache.fast.capacity == 0 {
            return Err(VaultError::Config(
                "cache.fast needs at least one shard and non-zero capacity".to_string(),
            ));
        }
        if self.audit.max_events_per_segment == 0 {
            return Err(VaultError::Config(
                "audit.max_events_per_segment must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".genvault")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}

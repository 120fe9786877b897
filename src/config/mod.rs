//! Configuration management for the conditions engine.
//!
//! Provides layered configuration loading with priority:
//! 1. Default values (hardcoded)
//! 2. Main config file
//! 3. Local overrides
//! 4. Environment variables (highest priority)

mod manager;
mod run_change;
pub use manager::*;
pub use run_change::*;


//---
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::constants::DEFAULT_CONFIG_FILE;
use crate::constants::ENV_PREFIX;
use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    /// Update manager and IOV lock settings
    pub manager: ManagerConfig,
    /// Run-change file invalidation settings
    pub run_change: RunChangeConfig,
}

impl Settings {
    /// Load configuration from multiple sources with priority:
    /// 1. Main config file (or the default `config/conditions`)
    /// 2. Local overrides
    /// 3. Environment variables (prefix `COND`, separator `__`)
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a job-specific configuration file
    ///
    /// # Returns
    /// Merged and validated configuration
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        match config_path {
            Some(path) => {
                config = config.add_source(File::with_name(path).required(true));
            }
            None => {
                config = config.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));
            }
        }

        // Local overrides
        config = config.add_source(File::with_name("config/local").required(false));

        // Environment variables (highest priority)
        config = config.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Settings = config.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.manager.validate()?;
        self.run_change.validate()?;
        Ok(())
    }
}

use std::path::PathBuf;

use serde::Deserialize;

use crate::constants::DEFAULT_DATA_PROVIDER;
use crate::constants::DEFAULT_IOV_LOCK_LOCATION;
use config::ConfigError;

use crate::OverrideEntry;
use crate::Result;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ManagerConfig {
    /// Name of the detector data provider service
    pub data_provider: String,

    /// Whether the event loop delivers `BeginEvent` incidents; when false
    /// the embedding loop must call `new_event` explicitly
    pub begin_event_incidents: bool,

    /// Transient-store location under which the IOV lock is published
    pub iov_lock_location: String,

    /// String-encoded condition overrides, `"path := type name = value"`
    pub condition_overrides: Vec<String>,

    /// Destination of the dot-format dependency graph dump
    pub dump_path: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            data_provider: DEFAULT_DATA_PROVIDER.to_string(),
            begin_event_incidents: true,
            iov_lock_location: DEFAULT_IOV_LOCK_LOCATION.to_string(),
            condition_overrides: Vec::new(),
            dump_path: None,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.data_provider.trim().is_empty() {
            return Err(ConfigError::Message("data_provider must not be empty".into()).into());
        }
        if self.iov_lock_location.trim().is_empty() {
            return Err(
                ConfigError::Message("iov_lock_location must not be empty".into()).into(),
            );
        }
        for entry in &self.condition_overrides {
            OverrideEntry::parse(entry)?;
        }
        Ok(())
    }
}

//! Service configuration

use core_types::StorageId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MOUNT_ROOT: &str = "/data/incremental";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Service configuration
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    /// Directory under which storage roots are created
    pub mount_root: PathBuf,
    /// Where permanent mounts are persisted; persistence is off when unset
    pub state_dir: Option<PathBuf>,
    /// Only accept loaders from privileged providers
    pub require_privileged_loaders: bool,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            state_dir: None,
            require_privileged_loaders: false,
        }
    }
}

impl IncrementalConfig {
    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let config: IncrementalConfig =
            serde_json::from_str(data).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path.as_ref()).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.mount_root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "mount_root must be absolute: {}",
                self.mount_root.display()
            )));
        }
        Ok(())
    }

    /// Root directory of a storage: `<mount_root>/MT_<id>`
    pub fn storage_root(&self, id: StorageId) -> PathBuf {
        self.mount_root.join(format!("MT_{}", id.get()))
    }
}

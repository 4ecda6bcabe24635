//! Persistence of permanent mounts
//!
//! The state file holds every storage that owns a permanent mount (plus the
//! bases those storages link to) and the permanent mounts themselves. It is
//! rewritten whole on every change:
//! - The document carries a format version and a CRC32 over its contents
//! - Writes go to a temporary file in the same directory, then replace the
//!   old file in one rename
//! - A document with an unknown version or a bad checksum is rejected

use core_types::{CreateMode, DataLoaderParams, FileId, MountId, StorageId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

pub const STATE_FILE_NAME: &str = "incremental_state.json";
pub const STATE_VERSION: u32 = 1;

/// Errors reading or writing the state file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Failed to access state file: {0}")]
    Io(String),

    #[error("Failed to parse state file: {0}")]
    Parse(String),

    #[error("Unsupported state version: {0}")]
    UnsupportedVersion(u32),

    #[error("State checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

/// A storage to re-register on restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStorage {
    pub id: StorageId,
    pub root: PathBuf,
    pub mode: CreateMode,
    pub base: Option<StorageId>,
    /// Loader to rebind on restore
    #[serde(default)]
    pub loader: Option<DataLoaderParams>,
    /// Files that read their content from a span of another file
    #[serde(default)]
    pub aliases: Vec<PersistedAlias>,
}

impl PersistedStorage {
    pub fn alias(&self, file: FileId) -> Option<&PersistedAlias> {
        self.aliases.iter().find(|alias| alias.file == file)
    }
}

/// A file of a persisted storage backed by a span of another file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAlias {
    pub file: FileId,
    pub owner_storage: StorageId,
    pub owner_file: FileId,
    pub offset: u64,
    pub len: u64,
}

/// A permanent mount to re-apply on restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMount {
    pub id: MountId,
    pub storage: StorageId,
    pub path: String,
    pub target: PathBuf,
}

/// The state file document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    /// Bases come before the storages linked to them
    pub storages: Vec<PersistedStorage>,
    pub mounts: Vec<PersistedMount>,
    /// CRC32 of the document with this field zeroed
    pub checksum: u32,
}

impl PersistedState {
    pub fn new(storages: Vec<PersistedStorage>, mounts: Vec<PersistedMount>) -> Self {
        let mut state = Self {
            version: STATE_VERSION,
            storages,
            mounts,
            checksum: 0,
        };
        state.checksum = state.compute_checksum();
        state
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty() && self.mounts.is_empty()
    }

    fn compute_checksum(&self) -> u32 {
        let mut temp = self.clone();
        temp.checksum = 0;
        let data = serde_json::to_vec(&temp).unwrap_or_default();
        crc32fast::hash(&data)
    }

    /// Checks version and checksum.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.version != STATE_VERSION {
            return Err(PersistenceError::UnsupportedVersion(self.version));
        }
        let computed = self.compute_checksum();
        if computed != self.checksum {
            return Err(PersistenceError::ChecksumMismatch {
                stored: self.checksum,
                computed,
            });
        }
        Ok(())
    }
}

/// Reads and writes the state file in one directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }

    /// Loads and validates the state file; `None` if there is none.
    pub fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path).map_err(|err| PersistenceError::Io(err.to_string()))?;
        let state: PersistedState =
            serde_json::from_str(&data).map_err(|err| PersistenceError::Parse(err.to_string()))?;
        state.validate()?;
        debug!(
            path = %path.display(),
            storages = state.storages.len(),
            mounts = state.mounts.len(),
            "loaded persisted state"
        );
        Ok(Some(state))
    }

    /// Atomically replaces the state file.
    pub fn save(&self, state: &PersistedState) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|err| PersistenceError::Io(err.to_string()))?;
        let data = serde_json::to_vec_pretty(state)
            .map_err(|err| PersistenceError::Parse(err.to_string()))?;

        let mut file =
            NamedTempFile::new_in(&self.dir).map_err(|err| PersistenceError::Io(err.to_string()))?;
        file.write_all(&data)
            .map_err(|err| PersistenceError::Io(err.to_string()))?;
        file.as_file()
            .sync_all()
            .map_err(|err| PersistenceError::Io(err.to_string()))?;
        file.persist(self.path())
            .map_err(|err| PersistenceError::Io(err.error.to_string()))?;
        Ok(())
    }

    /// Removes the state file if present.
    pub fn clear(&self) -> Result<(), PersistenceError> {
        remove_if_exists(&self.path())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), PersistenceError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(PersistenceError::Io(err.to_string())),
    }
}

//! Storage creation modes and bind kinds

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of bind mount
///
/// Adding a kind here forces every match site to decide how it is torn
/// down and whether it survives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindKind {
    /// Removed on service or storage teardown; never persisted
    Temporary,
    /// Persisted and re-applied when the system reports ready
    Permanent,
}

impl BindKind {
    /// Returns true if mounts of this kind survive a restart
    pub fn is_persistent(&self) -> bool {
        match self {
            BindKind::Temporary => false,
            BindKind::Permanent => true,
        }
    }
}

impl fmt::Display for BindKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindKind::Temporary => write!(f, "temporary"),
            BindKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// How a storage relates to other storages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Owns its content outright
    Standalone,
    /// Resolves content it does not have through a base storage
    Linked,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Standalone => write!(f, "standalone"),
            StorageKind::Linked => write!(f, "linked"),
        }
    }
}

/// Flags controlling `create_storage` / `create_linked_storage`
///
/// At least one of `create` and `open_existing` must be set for the call to
/// do anything useful. `bind` selects the kind of the storage's initial mount
/// at the requested path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMode {
    /// Allocate a new storage if none is mounted at the path
    pub create: bool,
    /// Return the storage already mounted at the path, if any
    pub open_existing: bool,
    /// Kind of the initial bind mount
    pub bind: BindKind,
}

impl CreateMode {
    /// Create a new storage with a temporary initial mount
    pub fn create_temporary() -> Self {
        Self {
            create: true,
            open_existing: false,
            bind: BindKind::Temporary,
        }
    }

    /// Create a new storage with a permanent initial mount
    pub fn create_permanent() -> Self {
        Self {
            create: true,
            open_existing: false,
            bind: BindKind::Permanent,
        }
    }

    /// Also accept a storage already mounted at the path
    pub fn or_open_existing(mut self) -> Self {
        self.open_existing = true;
        self
    }
}

impl Default for CreateMode {
    fn default() -> Self {
        Self::create_temporary()
    }
}

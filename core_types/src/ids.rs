//! Unique identifiers for storage entities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a storage instance
///
/// Storage ids are small integers handed out in strictly increasing order by
/// the storage registry. An id is never handed out twice within a process,
/// so a stale id can only ever miss, never alias a newer storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageId(u32);

impl StorageId {
    /// The first id handed out by a fresh registry
    pub const FIRST: StorageId = StorageId(1);

    /// Wraps a raw storage id
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw integer value
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage({})", self.0)
    }
}

/// Identifier of a bind mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MountId(Uuid);

impl MountId {
    /// Creates a new random mount ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a mount ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mount({})", self.0)
    }
}

/// Identifier of file content on the backing filesystem
///
/// Hard links share a `FileId`; the loader addresses content by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    /// Creates a new random file ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a file ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({})", self.0.simple())
    }
}

//! # Storage Registry
//!
//! This crate owns the set of live storages.
//!
//! ## Philosophy
//!
//! The registry is the single source of truth for whether a storage exists,
//! where its root is and what it depends on. It enforces the removal
//! invariant (no live mounts, no linked children) but never cascades:
//! tearing dependents down is the caller's job.
//!
//! Ids come from a strictly increasing counter and are never handed out
//! twice, not even after a failed creation.

mod handle;

pub use handle::{StorageHandle, StorageSummary};

use core_types::{CreateMode, StorageId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Error types for registry operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Storage not found
    #[error("Storage not found: {0}")]
    NotFound(StorageId),

    /// Id already registered
    #[error("Storage already registered: {0}")]
    AlreadyRegistered(StorageId),

    /// Bind mounts or linked storages still reference the storage
    #[error("{id} has dependents: {mounts} mounts, {children} linked storages")]
    HasDependents {
        id: StorageId,
        mounts: usize,
        children: usize,
    },

    /// The id space is used up
    #[error("Storage ids exhausted")]
    Exhausted,
}

/// Storage registry
pub struct StorageRegistry {
    next_id: AtomicU32,
    storages: RwLock<HashMap<StorageId, Arc<StorageHandle>>>,
}

impl StorageRegistry {
    /// Creates an empty registry; the first id handed out is 1
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(StorageId::FIRST.get()),
            storages: RwLock::new(HashMap::new()),
        }
    }

    /// Reserves a fresh id
    ///
    /// The id is consumed even if it is never registered.
    pub fn allocate(&self) -> Result<StorageId, RegistryError> {
        self.next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                next.checked_add(1)
            })
            .map(StorageId::new)
            .map_err(|_| RegistryError::Exhausted)
    }

    /// Peeks at the id the next `allocate` will return
    pub fn next_id(&self) -> StorageId {
        StorageId::new(self.next_id.load(Ordering::Acquire))
    }

    /// Registers a standalone storage under an allocated id
    pub fn register(
        &self,
        id: StorageId,
        root: PathBuf,
        mode: CreateMode,
    ) -> Result<Arc<StorageHandle>, RegistryError> {
        self.insert(StorageHandle::new(id, root, mode, None))
    }

    /// Registers a storage linked to `base`
    ///
    /// The base must be registered and not invalidated. The edge is recorded
    /// on the base so it cannot be removed while this storage lives.
    pub fn register_linked(
        &self,
        id: StorageId,
        root: PathBuf,
        mode: CreateMode,
        base: StorageId,
    ) -> Result<Arc<StorageHandle>, RegistryError> {
        self.insert(StorageHandle::new(id, root, mode, Some(base)))
    }

    /// Re-registers a storage recovered from persisted state
    ///
    /// The counter is moved past `id` so it is never allocated again.
    pub fn restore(
        &self,
        id: StorageId,
        root: PathBuf,
        mode: CreateMode,
        base: Option<StorageId>,
    ) -> Result<Arc<StorageHandle>, RegistryError> {
        let floor = id.get().checked_add(1).ok_or(RegistryError::Exhausted)?;
        self.next_id.fetch_max(floor, Ordering::AcqRel);
        self.insert(StorageHandle::new(id, root, mode, base))
    }

    fn insert(&self, handle: StorageHandle) -> Result<Arc<StorageHandle>, RegistryError> {
        let id = handle.id();
        let mut storages = self.storages.write();
        if storages.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        if let Some(base) = handle.base() {
            let parent = storages
                .get(&base)
                .filter(|parent| !parent.is_invalidated())
                .ok_or(RegistryError::NotFound(base))?;
            parent.dependents.lock().children.insert(id);
        }

        let handle = Arc::new(handle);
        storages.insert(id, handle.clone());
        debug!(storage = %id, root = %handle.root().display(), kind = %handle.kind(), "registered storage");
        Ok(handle)
    }

    /// Looks up a live storage
    pub fn lookup(&self, id: StorageId) -> Result<Arc<StorageHandle>, RegistryError> {
        self.storages
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    pub fn contains(&self, id: StorageId) -> bool {
        self.storages.read().contains_key(&id)
    }

    /// Removes a storage
    ///
    /// Fails with `HasDependents` while mounts or linked children remain.
    /// On success the edge to the base, if any, is detached.
    pub fn remove(&self, id: StorageId) -> Result<Arc<StorageHandle>, RegistryError> {
        let mut storages = self.storages.write();
        let handle = storages.get(&id).ok_or(RegistryError::NotFound(id))?;
        {
            let dependents = handle.dependents.lock();
            if dependents.mounts > 0 || !dependents.children.is_empty() {
                return Err(RegistryError::HasDependents {
                    id,
                    mounts: dependents.mounts,
                    children: dependents.children.len(),
                });
            }
        }

        let handle = storages.remove(&id).ok_or(RegistryError::NotFound(id))?;
        if let Some(base) = handle.base() {
            match storages.get(&base) {
                Some(parent) => {
                    parent.dependents.lock().children.remove(&id);
                }
                None => warn!(storage = %id, %base, "base vanished before its dependent"),
            }
        }
        debug!(storage = %id, "removed storage");
        Ok(handle)
    }

    /// Records a new bind mount against a storage
    pub fn retain_mount(&self, id: StorageId) -> Result<(), RegistryError> {
        let handle = self.lookup(id)?;
        handle.dependents.lock().mounts += 1;
        Ok(())
    }

    /// Forgets `count` bind mounts of a storage
    pub fn release_mounts(&self, id: StorageId, count: usize) -> Result<(), RegistryError> {
        let handle = self.lookup(id)?;
        let mut dependents = handle.dependents.lock();
        if count > dependents.mounts {
            warn!(storage = %id, count, recorded = dependents.mounts, "releasing more mounts than recorded");
        }
        dependents.mounts = dependents.mounts.saturating_sub(count);
        Ok(())
    }

    /// Flags a storage as unusable
    ///
    /// Returns false if it was already invalidated.
    pub fn mark_invalidated(&self, id: StorageId) -> Result<bool, RegistryError> {
        let handle = self.lookup(id)?;
        let changed = handle.invalidate();
        if changed {
            debug!(storage = %id, "storage invalidated");
        }
        Ok(changed)
    }

    /// Ids of all live storages, ascending
    pub fn ids(&self) -> Vec<StorageId> {
        let mut ids: Vec<_> = self.storages.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Returns the number of live storages
    pub fn count(&self) -> usize {
        self.storages.read().len()
    }

    /// Describes every live storage, ascending by id
    pub fn snapshot(&self) -> Vec<StorageSummary> {
        let mut handles: Vec<_> = self.storages.read().values().cloned().collect();
        handles.sort_by_key(|handle| handle.id());
        handles.iter().map(|handle| handle.summary()).collect()
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Live storage handles

use core_types::{CreateMode, StorageId, StorageKind};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Dependents {
    pub(crate) mounts: usize,
    pub(crate) children: BTreeSet<StorageId>,
}

/// A registered storage
///
/// Handles are shared out as `Arc<StorageHandle>`; a handle stays readable
/// after its storage is removed, but the registry no longer answers for it.
#[derive(Debug)]
pub struct StorageHandle {
    id: StorageId,
    root: PathBuf,
    mode: CreateMode,
    base: Option<StorageId>,
    op_lock: Mutex<()>,
    pub(crate) dependents: Mutex<Dependents>,
    invalidated: AtomicBool,
}

impl StorageHandle {
    pub(crate) fn new(
        id: StorageId,
        root: PathBuf,
        mode: CreateMode,
        base: Option<StorageId>,
    ) -> Self {
        Self {
            id,
            root,
            mode,
            base,
            op_lock: Mutex::new(()),
            dependents: Mutex::new(Dependents::default()),
            invalidated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    /// Root directory on the backing filesystem
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> CreateMode {
        self.mode
    }

    /// Base storage, for linked storages
    pub fn base(&self) -> Option<StorageId> {
        self.base
    }

    pub fn kind(&self) -> StorageKind {
        match self.base {
            Some(_) => StorageKind::Linked,
            None => StorageKind::Standalone,
        }
    }

    /// Serializes operations on this storage
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) -> bool {
        !self.invalidated.swap(true, Ordering::AcqRel)
    }

    /// Linked storages using this one as their base
    pub fn children(&self) -> Vec<StorageId> {
        self.dependents.lock().children.iter().copied().collect()
    }

    pub fn has_children(&self) -> bool {
        !self.dependents.lock().children.is_empty()
    }

    pub fn summary(&self) -> StorageSummary {
        let dependents = self.dependents.lock();
        StorageSummary {
            id: self.id,
            root: self.root.clone(),
            kind: self.kind(),
            base: self.base,
            mode: self.mode,
            mounts: dependents.mounts,
            children: dependents.children.iter().copied().collect(),
            invalidated: self.is_invalidated(),
        }
    }
}

/// Point-in-time description of a storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageSummary {
    pub id: StorageId,
    pub root: PathBuf,
    pub kind: StorageKind,
    pub base: Option<StorageId>,
    pub mode: CreateMode,
    pub mounts: usize,
    pub children: Vec<StorageId>,
    pub invalidated: bool,
}

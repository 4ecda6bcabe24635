//! Active bind mount bookkeeping

use core_types::{BindKind, MountId, StorageId};
use incfs::{IncFs, IncFsError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bind mount errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindMountError {
    /// Another live mount already occludes the target
    #[error("Target already bound: {}", .0.display())]
    AlreadyBound(PathBuf),

    /// No mount of this storage at the target
    #[error("Mount not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The mount or unmount call failed
    #[error("Mount failure: {0}")]
    Io(#[from] IncFsError),
}

/// One active bind mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindMount {
    pub id: MountId,
    pub storage: StorageId,
    /// Normalized path under the storage root
    pub path: String,
    /// Absolute source on the backing filesystem
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: BindKind,
    #[serde(skip)]
    seq: u64,
}

/// What a storage teardown did
#[derive(Debug, Default)]
pub struct Teardown {
    /// Records dropped, in teardown order
    pub removed: Vec<BindMount>,
    /// First unmount failure, if any
    pub first_error: Option<BindMountError>,
}

#[derive(Default)]
struct TableState {
    mounts: BTreeMap<PathBuf, BindMount>,
    next_seq: u64,
}

/// Bind mount table
///
/// Keyed by target path, so a target can be occluded by one mount at most.
pub struct BindMountTable {
    fs: Arc<dyn IncFs>,
    state: Mutex<TableState>,
}

impl BindMountTable {
    pub fn new(fs: Arc<dyn IncFs>) -> Self {
        Self {
            fs,
            state: Mutex::new(TableState::default()),
        }
    }

    /// Mounts `source` onto `target` and records it
    ///
    /// `path` is the normalized storage-relative form of `source`, kept for
    /// diagnostics and persistence.
    pub fn bind(
        &self,
        storage: StorageId,
        path: &str,
        source: &Path,
        target: &Path,
        kind: BindKind,
    ) -> Result<MountId, BindMountError> {
        self.bind_as(MountId::new(), storage, path, source, target, kind)
    }

    /// Like [`bind`](Self::bind), but keeps a known mount id
    pub fn bind_as(
        &self,
        id: MountId,
        storage: StorageId,
        path: &str,
        source: &Path,
        target: &Path,
        kind: BindKind,
    ) -> Result<MountId, BindMountError> {
        let mut state = self.state.lock();
        if state.mounts.contains_key(target) {
            return Err(BindMountError::AlreadyBound(target.to_path_buf()));
        }

        self.fs.bind_mount(source, target)?;

        let seq = state.next_seq;
        state.next_seq += 1;
        state.mounts.insert(
            target.to_path_buf(),
            BindMount {
                id,
                storage,
                path: path.to_string(),
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                kind,
                seq,
            },
        );
        info!(%storage, mount = %id, target = %target.display(), %kind, "bind mount created");
        Ok(id)
    }

    /// Unmounts `target` and drops its record
    ///
    /// If the unmount fails the record is kept and the error returned.
    pub fn unbind(&self, storage: StorageId, target: &Path) -> Result<BindMount, BindMountError> {
        let mut state = self.state.lock();
        match state.mounts.get(target) {
            Some(mount) if mount.storage == storage => {}
            _ => return Err(BindMountError::NotFound(target.to_path_buf())),
        }

        self.fs.unmount(target)?;

        let mount = state
            .mounts
            .remove(target)
            .ok_or_else(|| BindMountError::NotFound(target.to_path_buf()))?;
        info!(%storage, mount = %mount.id, target = %target.display(), "bind mount removed");
        Ok(mount)
    }

    /// Tears down every mount of `storage`, newest first
    ///
    /// Failures are logged and the teardown continues. Records are dropped
    /// even when their unmount failed.
    pub fn unbind_all(&self, storage: StorageId) -> Teardown {
        let mut state = self.state.lock();
        let mut mounts: Vec<BindMount> = state
            .mounts
            .values()
            .filter(|mount| mount.storage == storage)
            .cloned()
            .collect();
        mounts.sort_by(|a, b| b.seq.cmp(&a.seq));

        let mut teardown = Teardown::default();
        for mount in mounts {
            if let Err(err) = self.fs.unmount(&mount.target) {
                warn!(%storage, target = %mount.target.display(), error = %err, "unmount failed during teardown");
                teardown.first_error.get_or_insert(BindMountError::Io(err));
            }
            state.mounts.remove(&mount.target);
            teardown.removed.push(mount);
        }

        if !teardown.removed.is_empty() {
            debug!(%storage, count = teardown.removed.len(), "tore down bind mounts");
        }
        teardown
    }

    pub fn get(&self, target: &Path) -> Option<BindMount> {
        self.state.lock().mounts.get(target).cloned()
    }

    /// The mount whose target is the longest prefix of `path`
    pub fn find_containing(&self, path: &Path) -> Option<BindMount> {
        let state = self.state.lock();
        state
            .mounts
            .values()
            .filter(|mount| path.starts_with(&mount.target))
            .max_by_key(|mount| mount.target.components().count())
            .cloned()
    }

    /// Every mount, oldest first
    pub fn snapshot(&self) -> Vec<BindMount> {
        let state = self.state.lock();
        let mut mounts: Vec<_> = state.mounts.values().cloned().collect();
        mounts.sort_by_key(|mount| mount.seq);
        mounts
    }

    pub fn count(&self) -> usize {
        self.state.lock().mounts.len()
    }
}

//! In-memory filesystem driver
//!
//! `SimIncFs` keeps the whole namespace in memory. It behaves like the real
//! driver for everything the storage service observes: roots, directories,
//! files with shared content ids, and a mount table. Content bytes are not
//! stored; fill state is tracked by the service, not the driver.

use crate::{FileInfo, IncFs, IncFsError, NewFile, NodeInfo, NodeKind};
use core_types::FileId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
enum SimNode {
    Directory,
    File(FileId),
}

#[derive(Debug)]
struct SimFile {
    size: u64,
    metadata: Vec<u8>,
    links: usize,
}

#[derive(Debug, Default)]
struct SimState {
    roots: BTreeSet<PathBuf>,
    nodes: BTreeMap<PathBuf, SimNode>,
    files: HashMap<FileId, SimFile>,
    /// target -> source
    mounts: BTreeMap<PathBuf, PathBuf>,
}

impl SimState {
    fn root_of(&self, path: &Path) -> Option<&PathBuf> {
        self.roots.iter().find(|root| path.starts_with(root))
    }

    fn require_parent_dir(&self, path: &Path) -> Result<(), IncFsError> {
        let parent = path
            .parent()
            .ok_or_else(|| IncFsError::NotFound(path.to_path_buf()))?;
        if self.root_of(parent).is_none() {
            return Err(IncFsError::NotFound(parent.to_path_buf()));
        }
        match self.nodes.get(parent) {
            Some(SimNode::Directory) => Ok(()),
            Some(SimNode::File(_)) => Err(IncFsError::NotADirectory(parent.to_path_buf())),
            None => Err(IncFsError::NotFound(parent.to_path_buf())),
        }
    }

    fn require_vacant(&self, path: &Path) -> Result<(), IncFsError> {
        if self.nodes.contains_key(path) {
            return Err(IncFsError::AlreadyExists(path.to_path_buf()));
        }
        Ok(())
    }

    fn has_children(&self, path: &Path) -> bool {
        self.nodes
            .range::<Path, _>((Bound::Excluded(path), Bound::Unbounded))
            .next()
            .is_some_and(|(candidate, _)| candidate.starts_with(path))
    }

    fn is_mounted_from(&self, path: &Path) -> bool {
        self.mounts.values().any(|source| source.starts_with(path))
    }

    fn release_file(&mut self, id: FileId) {
        if let Some(file) = self.files.get_mut(&id) {
            file.links = file.links.saturating_sub(1);
            if file.links == 0 {
                self.files.remove(&id);
            }
        }
    }
}

/// In-memory driver
#[derive(Debug, Default)]
pub struct SimIncFs {
    state: Mutex<SimState>,
}

impl SimIncFs {
    /// Creates an empty driver with no roots and no mounts
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the source of the mount at `target`, if mounted
    pub fn mount_source(&self, target: &Path) -> Option<PathBuf> {
        self.state.lock().mounts.get(target).cloned()
    }

    /// Returns the number of active mounts
    pub fn mount_count(&self) -> usize {
        self.state.lock().mounts.len()
    }

    /// Returns true if a node exists at `path`
    pub fn exists(&self, path: &Path) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    /// Returns the number of distinct file contents alive
    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }
}

impl IncFs for SimIncFs {
    fn is_incfs_path(&self, path: &Path) -> bool {
        let state = self.state.lock();
        if state.root_of(path).is_some() {
            return true;
        }
        state
            .mounts
            .iter()
            .any(|(target, source)| path.starts_with(target) && state.root_of(source).is_some())
    }

    fn create_root(&self, root: &Path) -> Result<(), IncFsError> {
        let mut state = self.state.lock();
        if state.roots.contains(root) || state.nodes.contains_key(root) {
            return Err(IncFsError::AlreadyExists(root.to_path_buf()));
        }
        state.roots.insert(root.to_path_buf());
        state.nodes.insert(root.to_path_buf(), SimNode::Directory);
        trace!(root = %root.display(), "sim_incfs: root created");
        Ok(())
    }

    fn root_exists(&self, root: &Path) -> bool {
        self.state.lock().roots.contains(root)
    }

    fn remove_root(&self, root: &Path) -> Result<(), IncFsError> {
        let mut state = self.state.lock();
        if !state.roots.contains(root) {
            return Err(IncFsError::NotFound(root.to_path_buf()));
        }
        if state.is_mounted_from(root) {
            return Err(IncFsError::Busy(root.to_path_buf()));
        }

        let doomed: Vec<PathBuf> = state
            .nodes
            .keys()
            .filter(|path| path.starts_with(root))
            .cloned()
            .collect();
        for path in doomed {
            if let Some(SimNode::File(id)) = state.nodes.remove(&path) {
                state.release_file(id);
            }
        }
        state.roots.remove(root);
        trace!(root = %root.display(), "sim_incfs: root removed");
        Ok(())
    }

    fn make_dir(&self, path: &Path) -> Result<(), IncFsError> {
        let mut state = self.state.lock();
        state.require_parent_dir(path)?;
        state.require_vacant(path)?;
        state.nodes.insert(path.to_path_buf(), SimNode::Directory);
        Ok(())
    }

    fn make_file(&self, path: &Path, file: NewFile) -> Result<(), IncFsError> {
        let mut state = self.state.lock();
        state.require_parent_dir(path)?;
        state.require_vacant(path)?;
        if state.files.contains_key(&file.id) {
            return Err(IncFsError::AlreadyExists(path.to_path_buf()));
        }
        state.files.insert(
            file.id,
            SimFile {
                size: file.size,
                metadata: file.metadata,
                links: 1,
            },
        );
        state.nodes.insert(path.to_path_buf(), SimNode::File(file.id));
        Ok(())
    }

    fn link(&self, source: &Path, dest: &Path) -> Result<(), IncFsError> {
        let mut state = self.state.lock();
        let id = match state.nodes.get(source) {
            Some(SimNode::File(id)) => *id,
            Some(SimNode::Directory) => return Err(IncFsError::NotAFile(source.to_path_buf())),
            None => return Err(IncFsError::NotFound(source.to_path_buf())),
        };
        state.require_parent_dir(dest)?;
        state.require_vacant(dest)?;
        if let Some(file) = state.files.get_mut(&id) {
            file.links += 1;
        }
        state.nodes.insert(dest.to_path_buf(), SimNode::File(id));
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<(), IncFsError> {
        let mut state = self.state.lock();
        if state.roots.contains(path) {
            return Err(IncFsError::Busy(path.to_path_buf()));
        }
        match state.nodes.get(path).copied() {
            None => Err(IncFsError::NotFound(path.to_path_buf())),
            Some(SimNode::Directory) => {
                if state.has_children(path) {
                    return Err(IncFsError::DirectoryNotEmpty(path.to_path_buf()));
                }
                if state.is_mounted_from(path) {
                    return Err(IncFsError::Busy(path.to_path_buf()));
                }
                state.nodes.remove(path);
                Ok(())
            }
            Some(SimNode::File(id)) => {
                if state.is_mounted_from(path) {
                    return Err(IncFsError::Busy(path.to_path_buf()));
                }
                state.nodes.remove(path);
                state.release_file(id);
                Ok(())
            }
        }
    }

    fn stat(&self, path: &Path) -> Result<NodeInfo, IncFsError> {
        let state = self.state.lock();
        match state.nodes.get(path) {
            None => Err(IncFsError::NotFound(path.to_path_buf())),
            Some(SimNode::Directory) => Ok(NodeInfo {
                kind: NodeKind::Directory,
                file: None,
            }),
            Some(SimNode::File(id)) => {
                let file = state
                    .files
                    .get(id)
                    .ok_or_else(|| IncFsError::Io(format!("dangling content {}", id)))?;
                Ok(NodeInfo {
                    kind: NodeKind::File,
                    file: Some(FileInfo {
                        id: *id,
                        size: file.size,
                    }),
                })
            }
        }
    }

    fn metadata(&self, path: &Path) -> Result<Vec<u8>, IncFsError> {
        let state = self.state.lock();
        match state.nodes.get(path) {
            None => Err(IncFsError::NotFound(path.to_path_buf())),
            Some(SimNode::Directory) => Err(IncFsError::NotAFile(path.to_path_buf())),
            Some(SimNode::File(id)) => state
                .files
                .get(id)
                .map(|file| file.metadata.clone())
                .ok_or_else(|| IncFsError::Io(format!("dangling content {}", id))),
        }
    }

    fn list_files(&self, root: &Path) -> Result<Vec<(PathBuf, FileInfo)>, IncFsError> {
        let state = self.state.lock();
        if !state.roots.contains(root) {
            return Err(IncFsError::NotFound(root.to_path_buf()));
        }

        let mut listed = Vec::new();
        let under_root = state
            .nodes
            .range::<Path, _>((Bound::Excluded(root), Bound::Unbounded))
            .take_while(|(path, _)| path.starts_with(root));
        for (path, node) in under_root {
            let SimNode::File(id) = node else {
                continue;
            };
            let file = state
                .files
                .get(id)
                .ok_or_else(|| IncFsError::Io(format!("dangling content {}", id)))?;
            listed.push((
                path.clone(),
                FileInfo {
                    id: *id,
                    size: file.size,
                },
            ));
        }
        Ok(listed)
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> Result<(), IncFsError> {
        let mut state = self.state.lock();
        if !state.nodes.contains_key(source) {
            return Err(IncFsError::NotFound(source.to_path_buf()));
        }
        if state.mounts.contains_key(target) {
            return Err(IncFsError::Busy(target.to_path_buf()));
        }
        state
            .mounts
            .insert(target.to_path_buf(), source.to_path_buf());
        trace!(
            source = %source.display(),
            target = %target.display(),
            "sim_incfs: bind mounted"
        );
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), IncFsError> {
        let mut state = self.state.lock();
        state
            .mounts
            .remove(target)
            .map(|_| ())
            .ok_or_else(|| IncFsError::NotFound(target.to_path_buf()))
    }
}

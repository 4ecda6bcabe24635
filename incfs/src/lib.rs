//! # Incremental Filesystem Abstraction
//!
//! This crate defines the interface the storage service uses to talk to the
//! backing streaming filesystem driver.
//!
//! ## Philosophy
//!
//! **The driver is a collaborator, not part of the core.**
//!
//! Page-fault delivery and the on-disk format live in the driver. The
//! service only needs a narrow surface: storage roots, node
//! materialization, and mount primitives.
//!
//! ## Design Principles
//!
//! 1. **Trait-based**: All driver operations go through [`IncFs`]
//! 2. **Absolute paths**: Callers resolve and validate paths before calling in
//! 3. **Testable**: [`SimIncFs`] is a complete in-memory driver, and
//!    [`FailingIncFs`] injects failures into any driver

pub mod failing;
pub mod sim;

use core_types::FileId;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use failing::{FailingIncFs, FailurePolicy};
pub use sim::SimIncFs;

/// Driver errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IncFsError {
    /// Path does not exist
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Path already exists
    #[error("Already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// A path component is not a directory
    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Operation needs a regular file
    #[error("Not a file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Directory still has entries
    #[error("Directory not empty: {}", .0.display())]
    DirectoryNotEmpty(PathBuf),

    /// Path is still in use (mounted or a storage root)
    #[error("Busy: {}", .0.display())]
    Busy(PathBuf),

    /// Underlying I/O or syscall failure
    #[error("I/O error: {0}")]
    Io(String),
}

/// Kind of a materialized node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Directory
    Directory,
    /// Regular file with streamed content
    File,
}

/// File content description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// Content identifier, shared by hard links
    pub id: FileId,
    /// Declared size in bytes
    pub size: u64,
}

/// Result of `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node kind
    pub kind: NodeKind,
    /// Present for files
    pub file: Option<FileInfo>,
}

impl NodeInfo {
    /// Returns the file description, or `NotAFile` for directories
    pub fn expect_file(&self, path: &Path) -> Result<FileInfo, IncFsError> {
        self.file.ok_or_else(|| IncFsError::NotAFile(path.to_path_buf()))
    }
}

/// Parameters for a new file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    /// Content identifier
    pub id: FileId,
    /// Declared size in bytes
    pub size: u64,
    /// Opaque blob the loader uses to find the content source
    pub metadata: Vec<u8>,
}

/// Backing filesystem driver
///
/// All paths are absolute. Implementations must be safe to call from many
/// threads at once.
pub trait IncFs: Send + Sync {
    /// Returns true if the path lives on this filesystem, directly or through
    /// a bind mount
    fn is_incfs_path(&self, path: &Path) -> bool;

    /// Creates a fresh filesystem instance rooted at `root`
    fn create_root(&self, root: &Path) -> Result<(), IncFsError>;

    /// Returns true if an instance is rooted at `root`
    fn root_exists(&self, root: &Path) -> bool;

    /// Destroys the instance rooted at `root`, with everything under it
    ///
    /// Fails with `Busy` while anything under the root is bind mounted.
    fn remove_root(&self, root: &Path) -> Result<(), IncFsError>;

    /// Creates a single directory; the parent must exist
    fn make_dir(&self, path: &Path) -> Result<(), IncFsError>;

    /// Creates a file whose content will be streamed in later
    fn make_file(&self, path: &Path, file: NewFile) -> Result<(), IncFsError>;

    /// Creates a hard link at `dest` to the file at `source`
    fn link(&self, source: &Path, dest: &Path) -> Result<(), IncFsError>;

    /// Removes a file, link or empty directory
    fn unlink(&self, path: &Path) -> Result<(), IncFsError>;

    /// Describes the node at `path`
    fn stat(&self, path: &Path) -> Result<NodeInfo, IncFsError>;

    /// Returns the metadata blob of the file at `path`
    fn metadata(&self, path: &Path) -> Result<Vec<u8>, IncFsError>;

    /// Lists every file under the instance rooted at `root`, in path order
    ///
    /// Each hard link is listed; links to one content share a [`FileId`].
    fn list_files(&self, root: &Path) -> Result<Vec<(PathBuf, FileInfo)>, IncFsError>;

    /// Bind mounts `source` onto `target`
    fn bind_mount(&self, source: &Path, target: &Path) -> Result<(), IncFsError>;

    /// Removes the mount at `target`
    fn unmount(&self, target: &Path) -> Result<(), IncFsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_file() {
        let path = Path::new("/r/dir");
        let dir = NodeInfo {
            kind: NodeKind::Directory,
            file: None,
        };
        assert_eq!(
            dir.expect_file(path),
            Err(IncFsError::NotAFile(path.to_path_buf()))
        );

        let info = FileInfo {
            id: FileId::new(),
            size: 10,
        };
        let file = NodeInfo {
            kind: NodeKind::File,
            file: Some(info),
        };
        assert_eq!(file.expect_file(path), Ok(info));
    }

    #[test]
    fn test_error_display() {
        let err = IncFsError::NotFound(PathBuf::from("/r/a.bin"));
        assert_eq!(err.to_string(), "Not found: /r/a.bin");
    }
}

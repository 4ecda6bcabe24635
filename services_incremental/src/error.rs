//! Service-level errors

use core_types::StorageId;
use fs_view::PathError;
use incfs::IncFsError;
use loading_status::TrackerError;
use services_bind_mounts::{BindMountError, PersistenceError};
use services_dataloader::DataLoaderError;
use services_registry::RegistryError;
use thiserror::Error;

/// Every failure a public operation can report
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IncrementalError {
    /// Storage, path or mount does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate creation
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Target already occluded by a live mount
    #[error("Already bound: {0}")]
    AlreadyBound(String),

    /// Traversal attempt or malformed path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Range outside the file or empty
    #[error("Invalid range: [{start}, {end}) for size {size}")]
    InvalidRange { start: u64, end: u64, size: u64 },

    /// Bad loader parameters or creation flags
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Deletion blocked by live mounts or linked storages
    #[error("Has dependents: {0}")]
    HasDependents(String),

    /// Loading requested before the loader is ready
    #[error("Data loader not ready for {0}")]
    DataLoaderNotReady(StorageId),

    /// The backing system declared the storage unusable
    #[error("Storage invalidated: {0}")]
    Invalidated(StorageId),

    /// Loader refused by policy
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Underlying filesystem or mount call failed
    #[error("I/O failure: {0}")]
    IoFailure(String),
}

impl IncrementalError {
    /// Negative errno-style status for integer transports
    pub fn status(&self) -> i32 {
        match self {
            IncrementalError::PermissionDenied(_) => -1,
            IncrementalError::NotFound(_) => -2,
            IncrementalError::IoFailure(_) => -5,
            IncrementalError::DataLoaderNotReady(_) => -11,
            IncrementalError::AlreadyBound(_) => -16,
            IncrementalError::AlreadyExists(_) => -17,
            IncrementalError::InvalidPath(_) | IncrementalError::InvalidArgument(_) => -22,
            IncrementalError::InvalidRange { .. } => -34,
            IncrementalError::HasDependents(_) => -39,
            IncrementalError::Invalidated(_) => -116,
        }
    }
}

impl From<PathError> for IncrementalError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidPath(msg) => IncrementalError::InvalidPath(msg),
        }
    }
}

impl From<RegistryError> for IncrementalError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => IncrementalError::NotFound(id.to_string()),
            RegistryError::AlreadyRegistered(id) => IncrementalError::AlreadyExists(id.to_string()),
            RegistryError::HasDependents { .. } => IncrementalError::HasDependents(err.to_string()),
            RegistryError::Exhausted => IncrementalError::IoFailure(err.to_string()),
        }
    }
}

impl From<IncFsError> for IncrementalError {
    fn from(err: IncFsError) -> Self {
        match err {
            IncFsError::NotFound(path) => IncrementalError::NotFound(path.display().to_string()),
            IncFsError::AlreadyExists(path) => {
                IncrementalError::AlreadyExists(path.display().to_string())
            }
            IncFsError::NotADirectory(_) | IncFsError::NotAFile(_) => {
                IncrementalError::InvalidPath(err.to_string())
            }
            IncFsError::DirectoryNotEmpty(_) | IncFsError::Busy(_) | IncFsError::Io(_) => {
                IncrementalError::IoFailure(err.to_string())
            }
        }
    }
}

impl From<TrackerError> for IncrementalError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::StorageNotFound(_) | TrackerError::FileNotFound { .. } => {
                IncrementalError::NotFound(err.to_string())
            }
            TrackerError::InvalidRange { start, end, size } => {
                IncrementalError::InvalidRange { start, end, size }
            }
        }
    }
}

impl From<DataLoaderError> for IncrementalError {
    fn from(err: DataLoaderError) -> Self {
        match err {
            DataLoaderError::InvalidParams(msg) => IncrementalError::InvalidArgument(msg),
            DataLoaderError::ProviderAlreadyRegistered(_)
            | DataLoaderError::AlreadyInitialized(_) => {
                IncrementalError::AlreadyExists(err.to_string())
            }
            DataLoaderError::ProviderNotFound(_) => IncrementalError::NotFound(err.to_string()),
            DataLoaderError::NotPrivileged(_) => IncrementalError::PermissionDenied(err.to_string()),
            DataLoaderError::SessionNotFound(id) | DataLoaderError::NotReady(id) => {
                IncrementalError::DataLoaderNotReady(id)
            }
            DataLoaderError::Invalidated(id) => IncrementalError::Invalidated(id),
            DataLoaderError::Loader(msg) => IncrementalError::IoFailure(msg),
        }
    }
}

impl From<BindMountError> for IncrementalError {
    fn from(err: BindMountError) -> Self {
        match err {
            BindMountError::AlreadyBound(target) => {
                IncrementalError::AlreadyBound(target.display().to_string())
            }
            BindMountError::NotFound(target) => {
                IncrementalError::NotFound(target.display().to_string())
            }
            BindMountError::Io(err) => IncrementalError::IoFailure(err.to_string()),
        }
    }
}

impl From<PersistenceError> for IncrementalError {
    fn from(err: PersistenceError) -> Self {
        IncrementalError::IoFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_status_codes() {
        assert_eq!(IncrementalError::NotFound("x".into()).status(), -2);
        assert_eq!(
            IncrementalError::InvalidRange {
                start: 60,
                end: 50,
                size: 100
            }
            .status(),
            -34
        );
        assert_eq!(
            IncrementalError::DataLoaderNotReady(StorageId::new(1)).status(),
            -11
        );
    }

    #[test]
    fn test_conversions_keep_kind() {
        let err: IncrementalError = RegistryError::NotFound(StorageId::new(4)).into();
        assert!(matches!(err, IncrementalError::NotFound(_)));

        let err: IncrementalError =
            BindMountError::AlreadyBound(PathBuf::from("/data/app/pkg")).into();
        assert_eq!(err, IncrementalError::AlreadyBound("/data/app/pkg".into()));

        let err: IncrementalError = IncFsError::NotFound(PathBuf::from("/r/a")).into();
        assert_eq!(err, IncrementalError::NotFound("/r/a".into()));

        let err: IncrementalError = DataLoaderError::NotReady(StorageId::new(2)).into();
        assert_eq!(err, IncrementalError::DataLoaderNotReady(StorageId::new(2)));

        let err: IncrementalError = PathError::InvalidPath("..".into()).into();
        assert!(matches!(err, IncrementalError::InvalidPath(_)));
    }
}

//! # Failing Driver
//!
//! An `IncFs` wrapper that can simulate mount and materialization failures.
//! Useful for exercising rollback and best-effort teardown without a real
//! kernel refusing an unmount.

use crate::{FileInfo, IncFs, IncFsError, NewFile, NodeInfo};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Policy for when failures should occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Never fail (passthrough)
    Never,
    /// Fail unmounting any of these targets
    UnmountOf(Vec<PathBuf>),
    /// Fail bind mounting onto any of these targets
    BindOnto(Vec<PathBuf>),
    /// Fail every mutating call after N successful ones
    AfterMutations(usize),
}

/// Wrapper around an `IncFs` that can simulate failures
pub struct FailingIncFs<F: IncFs> {
    inner: F,
    policy: Mutex<FailurePolicy>,
    mutations: Mutex<usize>,
}

impl<F: IncFs> FailingIncFs<F> {
    /// Create a new failing driver with the given policy
    pub fn new(inner: F, policy: FailurePolicy) -> Self {
        Self {
            inner,
            policy: Mutex::new(policy),
            mutations: Mutex::new(0),
        }
    }

    /// Get the underlying driver (for inspection)
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Replace the failure policy and reset counters
    pub fn set_policy(&self, policy: FailurePolicy) {
        *self.policy.lock() = policy;
        *self.mutations.lock() = 0;
    }

    /// Counts a mutation, failing it if the policy says so
    fn mutation(&self) -> Result<(), IncFsError> {
        let mut count = self.mutations.lock();
        if let FailurePolicy::AfterMutations(limit) = *self.policy.lock() {
            if *count >= limit {
                return Err(IncFsError::Io("injected failure".to_string()));
            }
        }
        *count += 1;
        Ok(())
    }
}

impl<F: IncFs> IncFs for FailingIncFs<F> {
    fn is_incfs_path(&self, path: &Path) -> bool {
        self.inner.is_incfs_path(path)
    }

    fn create_root(&self, root: &Path) -> Result<(), IncFsError> {
        self.mutation()?;
        self.inner.create_root(root)
    }

    fn root_exists(&self, root: &Path) -> bool {
        self.inner.root_exists(root)
    }

    fn remove_root(&self, root: &Path) -> Result<(), IncFsError> {
        self.mutation()?;
        self.inner.remove_root(root)
    }

    fn make_dir(&self, path: &Path) -> Result<(), IncFsError> {
        self.mutation()?;
        self.inner.make_dir(path)
    }

    fn make_file(&self, path: &Path, file: NewFile) -> Result<(), IncFsError> {
        self.mutation()?;
        self.inner.make_file(path, file)
    }

    fn link(&self, source: &Path, dest: &Path) -> Result<(), IncFsError> {
        self.mutation()?;
        self.inner.link(source, dest)
    }

    fn unlink(&self, path: &Path) -> Result<(), IncFsError> {
        self.mutation()?;
        self.inner.unlink(path)
    }

    fn stat(&self, path: &Path) -> Result<NodeInfo, IncFsError> {
        self.inner.stat(path)
    }

    fn metadata(&self, path: &Path) -> Result<Vec<u8>, IncFsError> {
        self.inner.metadata(path)
    }

    fn list_files(&self, root: &Path) -> Result<Vec<(PathBuf, FileInfo)>, IncFsError> {
        self.inner.list_files(root)
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> Result<(), IncFsError> {
        if let FailurePolicy::BindOnto(targets) = &*self.policy.lock() {
            if targets.iter().any(|t| t == target) {
                return Err(IncFsError::Io(format!(
                    "injected bind failure onto {}",
                    target.display()
                )));
            }
        }
        self.mutation()?;
        self.inner.bind_mount(source, target)
    }

    fn unmount(&self, target: &Path) -> Result<(), IncFsError> {
        if let FailurePolicy::UnmountOf(targets) = &*self.policy.lock() {
            if targets.iter().any(|t| t == target) {
                return Err(IncFsError::Io(format!(
                    "injected unmount failure of {}",
                    target.display()
                )));
            }
        }
        self.mutation()?;
        self.inner.unmount(target)
    }
}

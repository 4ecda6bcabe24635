//! Loader collaborator interfaces

use crate::{DataLoaderError, DataLoaderStatus};
use core_types::{DataLoaderParams, StorageId};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::trace;

/// A status report tagged with the session it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub storage: StorageId,
    pub generation: u64,
    pub status: DataLoaderStatus,
}

/// Where loader status reports are delivered
pub trait StatusSink: Send + Sync {
    fn deliver(&self, report: StatusReport);
}

impl<T> StatusSink for Sender<T>
where
    T: From<StatusReport> + Send,
{
    fn deliver(&self, report: StatusReport) {
        // The receiver is gone only while the service shuts down.
        if self.send(T::from(report)).is_err() {
            trace!(storage = %report.storage, "status report dropped, receiver closed");
        }
    }
}

/// Handed to a loader so it can report status for one session
#[derive(Clone)]
pub struct StatusListener {
    storage: StorageId,
    generation: u64,
    sink: Arc<dyn StatusSink>,
}

impl StatusListener {
    pub fn new(storage: StorageId, generation: u64, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            storage,
            generation,
            sink,
        }
    }

    pub fn storage(&self) -> StorageId {
        self.storage
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn report(&self, status: DataLoaderStatus) {
        self.sink.deliver(StatusReport {
            storage: self.storage,
            generation: self.generation,
            status,
        });
    }
}

impl std::fmt::Debug for StatusListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusListener")
            .field("storage", &self.storage)
            .field("generation", &self.generation)
            .finish()
    }
}

/// One loader instance bound to one storage
///
/// Calls return once the request is accepted; the outcome arrives later
/// through the [`StatusListener`] given to `create`.
pub trait DataLoader: Send + Sync {
    /// Prepares the loader for the storage
    fn create(
        &self,
        params: &DataLoaderParams,
        listener: StatusListener,
    ) -> Result<(), DataLoaderError>;

    /// Begins streaming
    fn start(&self) -> Result<(), DataLoaderError>;

    /// Stops streaming
    fn stop(&self) -> Result<(), DataLoaderError>;

    /// Releases everything the loader holds for the storage
    fn destroy(&self) -> Result<(), DataLoaderError>;
}

/// Source of loader instances, registered by package name
pub trait DataLoaderProvider: Send + Sync {
    fn package_name(&self) -> &str;

    /// Privileged providers are the only ones accepted when the service
    /// requires privileged loaders
    fn is_privileged(&self) -> bool {
        false
    }

    /// Binds a new loader instance for `storage`
    fn bind(
        &self,
        storage: StorageId,
        params: &DataLoaderParams,
    ) -> Result<Arc<dyn DataLoader>, DataLoaderError>;
}

//! Asynchronous inbound messages

use core_types::{FileId, StorageId};
use loading_status::ByteRange;
use services_dataloader::StatusReport;

/// A message from the backing filesystem or a loader
///
/// Delivered through the service's channel and applied by
/// [`IncrementalService::handle_notification`](crate::IncrementalService::handle_notification).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The system finished booting; persisted mounts can be re-applied
    SystemReady,
    /// The backing system declared a storage unusable
    StorageInvalid(StorageId),
    /// A range of a file has been streamed in
    RangeFilled {
        storage: StorageId,
        file: FileId,
        range: ByteRange,
    },
    /// A loader reported its status
    LoaderStatus(StatusReport),
    /// Stops the dispatcher thread
    Shutdown,
}

impl From<StatusReport> for Notification {
    fn from(report: StatusReport) -> Self {
        Notification::LoaderStatus(report)
    }
}

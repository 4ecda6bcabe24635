//! Per-storage fill state.

use crate::range_set::{ByteRange, RangeSet};
use core_types::{FileId, StorageId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Tracker errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Storage not tracked: {0}")]
    StorageNotFound(StorageId),

    #[error("File not tracked: {file} in {storage}")]
    FileNotFound { storage: StorageId, file: FileId },

    #[error("Invalid range: [{start}, {end}) for size {size}")]
    InvalidRange { start: u64, end: u64, size: u64 },
}

/// A span of a file owned by some storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSlice {
    pub storage: StorageId,
    pub file: FileId,
    pub offset: u64,
    pub len: u64,
}

/// Byte totals over the files a storage owns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadingProgress {
    pub files: usize,
    pub total_bytes: u64,
    pub filled_bytes: u64,
}

impl LoadingProgress {
    pub fn is_complete(&self) -> bool {
        self.filled_bytes >= self.total_bytes
    }
}

#[derive(Debug)]
enum FileFill {
    Owned { size: u64, filled: RangeSet },
    /// Always points at an `Owned` entry; chains are collapsed on insert.
    Alias(FileSlice),
}

type Partition = Arc<Mutex<HashMap<FileId, FileFill>>>;

/// Tracks which ranges of which files have been streamed in.
///
/// The outer lock is only held to find or change the set of storages. Each
/// storage's files sit behind their own mutex, so fills for different
/// storages never contend.
#[derive(Debug, Default)]
pub struct LoadingStatusTracker {
    storages: RwLock<HashMap<StorageId, Partition>>,
}

impl LoadingStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a storage. Tracking an existing storage is a no-op.
    pub fn add_storage(&self, storage: StorageId) {
        self.storages.write().entry(storage).or_default();
    }

    /// Drops all fill state of a storage.
    ///
    /// Aliases in other storages that pointed here report their ranges as not
    /// loaded from now on.
    pub fn remove_storage(&self, storage: StorageId) -> bool {
        let removed = self.storages.write().remove(&storage).is_some();
        if removed {
            debug!(%storage, "dropped loading state");
        }
        removed
    }

    /// Tracks a new file owned by `storage`, nothing filled yet.
    ///
    /// Re-tracking a known file (another hard link in the same storage)
    /// keeps the existing state.
    pub fn track_file(
        &self,
        storage: StorageId,
        file: FileId,
        size: u64,
    ) -> Result<(), TrackerError> {
        let partition = self.partition(storage)?;
        partition.lock().entry(file).or_insert_with(|| FileFill::Owned {
            size,
            filled: RangeSet::new(),
        });
        Ok(())
    }

    /// Tracks `file` in `storage` as a view onto `target`.
    ///
    /// If the target is itself an alias, the new entry points straight at
    /// the owning file.
    pub fn track_alias(
        &self,
        storage: StorageId,
        file: FileId,
        target: FileSlice,
    ) -> Result<(), TrackerError> {
        if storage == target.storage && file == target.file {
            return Ok(());
        }

        let owner = {
            let partition = self.partition(target.storage)?;
            let files = partition.lock();
            match files.get(&target.file) {
                Some(FileFill::Owned { .. }) => target,
                Some(FileFill::Alias(inner)) => FileSlice {
                    storage: inner.storage,
                    file: inner.file,
                    offset: inner.offset.saturating_add(target.offset),
                    len: target.len,
                },
                None => {
                    return Err(TrackerError::FileNotFound {
                        storage: target.storage,
                        file: target.file,
                    })
                }
            }
        };

        let partition = self.partition(storage)?;
        partition
            .lock()
            .entry(file)
            .or_insert(FileFill::Alias(owner));
        trace!(%storage, %file, owner = %owner.file, offset = owner.offset, "tracked alias");
        Ok(())
    }

    /// Alias entries of a storage, ordered by file id.
    pub fn aliases(&self, storage: StorageId) -> Vec<(FileId, FileSlice)> {
        let Ok(partition) = self.partition(storage) else {
            return Vec::new();
        };
        let files = partition.lock();
        let mut aliases: Vec<_> = files
            .iter()
            .filter_map(|(file, fill)| match fill {
                FileFill::Alias(owner) => Some((*file, *owner)),
                FileFill::Owned { .. } => None,
            })
            .collect();
        aliases.sort_by_key(|(file, _)| *file);
        aliases
    }

    /// Records that `range` of a file has been streamed in.
    ///
    /// The range is clipped to the file size. Fills reported against an
    /// alias land on the owning file.
    pub fn mark_filled(
        &self,
        storage: StorageId,
        file: FileId,
        range: ByteRange,
    ) -> Result<(), TrackerError> {
        let owner = {
            let partition = self.partition(storage)?;
            let mut files = partition.lock();
            match files.get_mut(&file) {
                Some(FileFill::Owned { size, filled }) => {
                    let clipped = range.clamped(*size);
                    filled.insert(clipped.start, clipped.end);
                    trace!(%storage, %file, range = %clipped, "range filled");
                    return Ok(());
                }
                Some(FileFill::Alias(owner)) => *owner,
                None => return Err(TrackerError::FileNotFound { storage, file }),
            }
        };

        let translated = range.clamped(owner.len).shifted(owner.offset);
        self.mark_filled(owner.storage, owner.file, translated)
    }

    /// Returns true if every byte of `[start, end)` has been filled.
    ///
    /// Fails with `InvalidRange` unless `start < end <= size`.
    pub fn is_range_loaded(
        &self,
        storage: StorageId,
        file: FileId,
        start: u64,
        end: u64,
    ) -> Result<bool, TrackerError> {
        let owner = {
            let partition = self.partition(storage)?;
            let files = partition.lock();
            match files.get(&file) {
                Some(FileFill::Owned { size, filled }) => {
                    check_range(start, end, *size)?;
                    return Ok(filled.contains_range(start, end));
                }
                Some(FileFill::Alias(owner)) => {
                    check_range(start, end, owner.len)?;
                    *owner
                }
                None => return Err(TrackerError::FileNotFound { storage, file }),
            }
        };

        let Ok(partition) = self.partition(owner.storage) else {
            return Ok(false);
        };
        let files = partition.lock();
        match files.get(&owner.file) {
            Some(FileFill::Owned { filled, .. }) => Ok(filled.contains_range(
                start.saturating_add(owner.offset),
                end.saturating_add(owner.offset),
            )),
            _ => Ok(false),
        }
    }

    /// Filled ranges of an owned file.
    pub fn filled_ranges(
        &self,
        storage: StorageId,
        file: FileId,
    ) -> Result<Vec<ByteRange>, TrackerError> {
        let partition = self.partition(storage)?;
        let files = partition.lock();
        match files.get(&file) {
            Some(FileFill::Owned { filled, .. }) => Ok(filled.ranges().to_vec()),
            Some(FileFill::Alias(owner)) => Err(TrackerError::FileNotFound {
                storage: owner.storage,
                file: owner.file,
            }),
            None => Err(TrackerError::FileNotFound { storage, file }),
        }
    }

    /// Totals over the files `storage` owns, or `None` if untracked.
    pub fn progress(&self, storage: StorageId) -> Option<LoadingProgress> {
        let partition = self.partition(storage).ok()?;
        let files = partition.lock();
        let mut progress = LoadingProgress::default();
        for fill in files.values() {
            if let FileFill::Owned { size, filled } = fill {
                progress.files += 1;
                progress.total_bytes += size;
                progress.filled_bytes += filled.total_len();
            }
        }
        Some(progress)
    }

    fn partition(&self, storage: StorageId) -> Result<Partition, TrackerError> {
        self.storages
            .read()
            .get(&storage)
            .cloned()
            .ok_or(TrackerError::StorageNotFound(storage))
    }
}

fn check_range(start: u64, end: u64, size: u64) -> Result<(), TrackerError> {
    if start >= end || end > size {
        return Err(TrackerError::InvalidRange { start, end, size });
    }
    Ok(())
}

//! # Incremental Storage Service
//!
//! This service manages storages backed by a streaming filesystem: content
//! can be laid out (directories, files, links) before it has arrived, and is
//! streamed in later by a data loader.
//!
//! ## Philosophy
//!
//! - Every public call goes through [`IncrementalService`], which composes
//!   the registry, the mount table, the loading tracker and the loader
//!   sessions and enforces the invariants that span them
//! - Callers name content by `(storage, relative path)`; nothing escapes a
//!   storage root
//! - Asynchronous events arrive as [`Notification`] messages on one channel
//!
//! ## Operations
//!
//! - `create_storage` / `create_linked_storage` / `open_storage` /
//!   `delete_storage`
//! - `make_bind_mount` / `delete_bind_mount`
//! - `make_directory` / `make_directories` / `make_file` /
//!   `make_file_from_range` / `make_link` / `unlink`
//! - `is_file_range_loaded` / `get_file_metadata` / `start_loading`
//! - `on_system_ready` / `on_invalid_storage` / `dump`

pub mod config;
pub mod error;
pub mod notification;
pub mod service;
pub mod snapshot;

pub use config::{ConfigError, IncrementalConfig, DEFAULT_MOUNT_ROOT};
pub use error::IncrementalError;
pub use notification::Notification;
pub use service::{IncrementalService, ResolvedFile};
pub use snapshot::{ServiceSnapshot, StorageEntry};

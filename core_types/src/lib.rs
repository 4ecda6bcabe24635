//! # Core Types
//!
//! This crate defines the fundamental types shared by the incremental storage
//! service and its collaborators.
//!
//! ## Philosophy
//!
//! Core types are designed with these principles:
//! - **Explicit over implicit**: Identifiers are typed and cannot be confused.
//! - **Closed sets are enums**: Bind kinds and loader kinds are matched exhaustively.
//! - **No ambient state**: Nothing here owns global state.
//!
//! ## Key Types
//!
//! - [`StorageId`]: Process-unique, monotonically allocated storage identifier
//! - [`MountId`]: Identifier of a single bind mount
//! - [`FileId`]: Identifier of file content on the backing filesystem
//! - [`BindKind`]: Temporary or permanent bind mount
//! - [`CreateMode`]: Flags controlling storage creation
//! - [`DataLoaderParams`]: Parameters handed to an external data loader

pub mod ids;
pub mod loader;
pub mod modes;

pub use ids::{FileId, MountId, StorageId};
pub use loader::{DataLoaderKind, DataLoaderParams};
pub use modes::{BindKind, CreateMode, StorageKind};

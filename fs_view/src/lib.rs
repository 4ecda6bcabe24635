//! # Filesystem View
//!
//! This crate maps storage-relative paths onto the backing filesystem.
//!
//! ## Philosophy
//!
//! - **Paths are views, not authority**: A relative path can never name
//!   anything outside the root it is resolved against
//! - **One gate**: Every materialization and bind goes through [`PathResolver`],
//!   so escape attempts are rejected identically everywhere
//! - **Pure**: No state, no filesystem access
//!
//! ## Design
//!
//! - Relative paths are split into components, with separators normalized
//! - `..`, absolute paths and NUL bytes are rejected
//! - The empty path names the root itself

pub mod path;

pub use path::{PathError, PathResolver};

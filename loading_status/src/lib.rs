//! # Loading Status
//!
//! Tracks which byte ranges of which files have already been streamed in.
//!
//! ## Design
//!
//! - Filled ranges are kept per file as a sorted, disjoint [`RangeSet`]
//! - State is partitioned per storage, each partition behind its own lock
//! - Files created from a range of another file, or linked from another
//!   storage, are aliases onto the owning file's ranges
//! - A range counts as loaded only when every byte of it is covered

pub mod range_set;
pub mod tracker;

pub use range_set::{ByteRange, RangeSet};
pub use tracker::{FileSlice, LoadingProgress, LoadingStatusTracker, TrackerError};

//! # Incremental Storage Daemon
//!
//! This crate hosts the incremental storage service for local runs and
//! demos.
//!
//! ## Philosophy
//!
//! - **Scripts over sessions**: every run is a deterministic command script
//! - **Simulated backends**: the in-memory driver and auto-ready loaders
//!   stand in for the kernel and loader processes
//! - **Output is the dump**: the run ends by printing the service state
//!
//! ## Responsibilities
//!
//! The daemon:
//! - Loads configuration from a JSON file and command-line flags
//! - Installs the log subscriber (`RUST_LOG`, default `info`)
//! - Executes a command script, reporting failures with their status codes
//! - Prints the final service dump as text or JSON

pub mod commands;
pub mod runtime;

pub use commands::{parse_script, CommandError, CommandParser, ScriptCommand};
pub use runtime::{Daemon, DaemonConfig, DaemonError, RunSummary};

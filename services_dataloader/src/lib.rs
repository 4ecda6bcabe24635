//! # Data Loader Service
//!
//! This crate manages the external loaders that stream content into
//! storages.
//!
//! ## Philosophy
//!
//! Loader sessions are managed explicitly with clear lifecycle states.
//! Instead of ad hoc flags flipped from callbacks, we have:
//! - An explicit state machine per storage ([`SessionState`])
//! - Status reports delivered as messages through a [`StatusSink`]
//! - A generation counter that turns late callbacks into no-ops
//!
//! Loaders are resolved from their parameters by the [`DataLoaderManager`],
//! which keeps the providers registered by package name.

pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod session;
pub mod sim;

pub use lifecycle::{DataLoaderStatus, SessionState};
pub use loader::{DataLoader, DataLoaderProvider, StatusListener, StatusReport, StatusSink};
pub use manager::{DataLoaderError, DataLoaderManager};
pub use session::{DataLoaderSessionManager, SessionInfo, StatusOutcome};
pub use sim::{SimDataLoader, SimLoaderCall, SimLoaderProvider};

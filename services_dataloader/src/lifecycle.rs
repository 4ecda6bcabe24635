//! Loader session lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a storage's loader session
///
/// ```text
/// Unbound -> Connecting -> Bound -> Started -> Stopped
///    any non-terminal state -> Invalidated
/// ```
///
/// A live session whose loader disconnects falls back to `Unbound` and
/// reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No loader attached
    Unbound,
    /// Loader is being bound
    Connecting,
    /// Loader is bound but not streaming
    Bound,
    /// Loader is streaming content
    Started,
    /// Session was shut down
    Stopped,
    /// The backing system declared the storage unusable
    Invalidated,
}

impl SessionState {
    /// Checks if the session can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Invalidated)
    }

    /// Checks if a loader is attached
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Bound | SessionState::Started)
    }

    /// Checks whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Unbound, Connecting) => true,
            (Connecting, Bound) | (Connecting, Unbound) => true,
            (Bound, Started) | (Bound, Unbound) => true,
            (Started, Unbound) => true,
            (Stopped, _) | (Invalidated, _) => false,
            (_, Stopped) | (_, Invalidated) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unbound => "unbound",
            SessionState::Connecting => "connecting",
            SessionState::Bound => "bound",
            SessionState::Started => "started",
            SessionState::Stopped => "stopped",
            SessionState::Invalidated => "invalidated",
        };
        f.write_str(name)
    }
}

/// Status a loader reports about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataLoaderStatus {
    /// Loader finished setting up and can be started
    Created,
    /// Loader began streaming
    Started,
    /// Loader stopped streaming
    Stopped,
    /// Loader went away
    Destroyed,
    /// Loader cannot serve this storage any more
    Unrecoverable,
}

impl fmt::Display for DataLoaderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataLoaderStatus::Created => "created",
            DataLoaderStatus::Started => "started",
            DataLoaderStatus::Stopped => "stopped",
            DataLoaderStatus::Destroyed => "destroyed",
            DataLoaderStatus::Unrecoverable => "unrecoverable",
        };
        f.write_str(name)
    }
}

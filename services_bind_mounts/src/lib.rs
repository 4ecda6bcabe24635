//! # Bind Mount Service
//!
//! This crate owns the active bind mounts that project storage content onto
//! other filesystem locations.
//!
//! ## Philosophy
//!
//! A record exists exactly while the mount might be live:
//! - The occlusion check, the mount call and the insert happen under one lock
//! - A failed mount records nothing
//! - A failed unmount keeps its record, except during storage teardown
//!
//! Permanent mounts, and the storages they come from, survive restarts
//! through the versioned state file in [`persistence`].

pub mod persistence;
pub mod table;

pub use persistence::{
    PersistedAlias, PersistedMount, PersistedState, PersistedStorage, PersistenceError, StateStore,
    STATE_FILE_NAME, STATE_VERSION,
};
pub use table::{BindMount, BindMountError, BindMountTable, Teardown};

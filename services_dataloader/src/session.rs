//! Per-storage loader sessions.

use crate::{
    DataLoaderError, DataLoaderManager, DataLoaderStatus, SessionState, StatusListener,
    StatusReport, StatusSink,
};
use core_types::{DataLoaderParams, StorageId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Session {
    params: DataLoaderParams,
    state: SessionState,
    generation: u64,
    ready: bool,
    last_status: Option<DataLoaderStatus>,
}

impl Session {
    fn transition(&mut self, storage: StorageId, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(%storage, from = %self.state, to = %next, "unexpected session transition");
        }
        debug!(%storage, from = %self.state, to = %next, generation = self.generation, "session transition");
        self.state = next;
    }
}

/// Point-in-time view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub storage: StorageId,
    pub package: String,
    pub state: SessionState,
    pub generation: u64,
    pub ready: bool,
    pub last_status: Option<DataLoaderStatus>,
}

/// What handling a status report did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Recorded against the current session
    Applied,
    /// Report was for a gone session or an older generation
    Stale,
    /// Loader went away and the session was rebound
    Reconnected,
    /// Session is now invalidated; the storage must be torn down
    Invalidated,
}

/// Owns the loader session of every storage that has one
pub struct DataLoaderSessionManager {
    loaders: DataLoaderManager,
    sessions: RwLock<HashMap<StorageId, Arc<Mutex<Session>>>>,
    sink: Arc<dyn StatusSink>,
}

impl DataLoaderSessionManager {
    /// Creates a manager whose loaders report into `sink`
    pub fn new(loaders: DataLoaderManager, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            loaders,
            sessions: RwLock::new(HashMap::new()),
            sink,
        }
    }

    pub fn loaders(&self) -> &DataLoaderManager {
        &self.loaders
    }

    /// Creates the session for `storage` and binds its loader
    ///
    /// On success the session is `Bound` and waits for the loader to report
    /// `Created`. On failure no session is left behind.
    pub fn open(
        &self,
        storage: StorageId,
        params: DataLoaderParams,
    ) -> Result<SessionState, DataLoaderError> {
        let session = Arc::new(Mutex::new(Session {
            params,
            state: SessionState::Unbound,
            generation: 0,
            ready: false,
            last_status: None,
        }));

        {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&storage) {
                return Err(DataLoaderError::AlreadyInitialized(storage));
            }
            sessions.insert(storage, session.clone());
        }

        let mut guard = session.lock();
        if let Err(err) = self.connect(storage, &mut guard) {
            drop(guard);
            self.sessions.write().remove(&storage);
            return Err(err);
        }
        info!(%storage, package = %guard.params.package_name, "loader session bound");
        Ok(guard.state)
    }

    fn connect(&self, storage: StorageId, session: &mut Session) -> Result<(), DataLoaderError> {
        session.generation += 1;
        session.ready = false;
        session.transition(storage, SessionState::Connecting);

        let loader = match self.loaders.initialize(storage, &session.params) {
            Ok(loader) => loader,
            Err(err) => {
                session.transition(storage, SessionState::Unbound);
                return Err(err);
            }
        };

        let listener = StatusListener::new(storage, session.generation, self.sink.clone());
        if let Err(err) = loader.create(&session.params, listener) {
            self.loaders.release(storage);
            session.transition(storage, SessionState::Unbound);
            return Err(err);
        }
        session.transition(storage, SessionState::Bound);
        Ok(())
    }

    /// Moves a ready session to `Started`
    ///
    /// Returns true if this call started the loader, false if it was already
    /// running. Fails `NotReady` without a session or before the loader
    /// reported `Created`, and `Invalidated` for an invalidated session.
    pub fn start(&self, storage: StorageId) -> Result<bool, DataLoaderError> {
        let session = self
            .session(storage)
            .ok_or(DataLoaderError::NotReady(storage))?;
        let mut session = session.lock();
        let state = session.state;
        match state {
            SessionState::Started => Ok(false),
            SessionState::Invalidated => Err(DataLoaderError::Invalidated(storage)),
            SessionState::Bound if session.ready => {
                let loader = self
                    .loaders
                    .get(storage)
                    .ok_or(DataLoaderError::NotReady(storage))?;
                loader.start()?;
                session.transition(storage, SessionState::Started);
                Ok(true)
            }
            SessionState::Unbound
            | SessionState::Connecting
            | SessionState::Bound
            | SessionState::Stopped => Err(DataLoaderError::NotReady(storage)),
        }
    }

    /// Stops and releases the session of `storage`
    ///
    /// Every step is attempted; the first error is returned. Closing a
    /// storage without a session is a no-op.
    pub fn close(&self, storage: StorageId) -> Result<(), DataLoaderError> {
        let Some(session) = self.sessions.write().remove(&storage) else {
            return Ok(());
        };
        let mut session = session.lock();
        let mut first_error = None;

        if session.state == SessionState::Started {
            if let Some(loader) = self.loaders.get(storage) {
                if let Err(err) = loader.stop() {
                    warn!(%storage, error = %err, "loader stop failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        if session.state != SessionState::Invalidated {
            session.transition(storage, SessionState::Stopped);
        }

        match self.loaders.destroy(storage) {
            Ok(()) | Err(DataLoaderError::SessionNotFound(_)) => {}
            Err(err) => {
                warn!(%storage, error = %err, "loader destroy failed");
                first_error.get_or_insert(err);
            }
        }

        info!(%storage, "loader session closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Drives the session of `storage` to `Invalidated`
    ///
    /// Returns false if there is no session or it was already terminal.
    pub fn invalidate(&self, storage: StorageId) -> bool {
        let Some(session) = self.session(storage) else {
            return false;
        };
        let mut session = session.lock();
        if session.state.is_terminal() {
            return false;
        }
        session.transition(storage, SessionState::Invalidated);
        true
    }

    /// Applies a status report from a loader
    pub fn handle_status(&self, report: StatusReport) -> StatusOutcome {
        let storage = report.storage;
        let Some(session) = self.session(storage) else {
            debug!(%storage, status = %report.status, "status for unknown session discarded");
            return StatusOutcome::Stale;
        };
        let mut session = session.lock();
        if report.generation != session.generation || session.state.is_terminal() {
            debug!(
                %storage,
                status = %report.status,
                generation = report.generation,
                current = session.generation,
                "stale status discarded"
            );
            return StatusOutcome::Stale;
        }

        session.last_status = Some(report.status);
        match report.status {
            DataLoaderStatus::Created => {
                if session.state == SessionState::Bound {
                    session.ready = true;
                }
                StatusOutcome::Applied
            }
            DataLoaderStatus::Started | DataLoaderStatus::Stopped => StatusOutcome::Applied,
            DataLoaderStatus::Destroyed => {
                warn!(%storage, "loader disconnected, rebinding");
                self.loaders.release(storage);
                session.transition(storage, SessionState::Unbound);
                if let Err(err) = self.connect(storage, &mut session) {
                    warn!(%storage, error = %err, "rebinding loader failed");
                }
                StatusOutcome::Reconnected
            }
            DataLoaderStatus::Unrecoverable => {
                session.transition(storage, SessionState::Invalidated);
                StatusOutcome::Invalidated
            }
        }
    }

    pub fn contains(&self, storage: StorageId) -> bool {
        self.sessions.read().contains_key(&storage)
    }

    /// Parameters the session of `storage` was opened with
    pub fn params(&self, storage: StorageId) -> Option<DataLoaderParams> {
        self.session(storage).map(|session| session.lock().params.clone())
    }

    pub fn state(&self, storage: StorageId) -> Option<SessionState> {
        self.session(storage).map(|session| session.lock().state)
    }

    pub fn info(&self, storage: StorageId) -> Option<SessionInfo> {
        let session = self.session(storage)?;
        let session = session.lock();
        Some(SessionInfo {
            storage,
            package: session.params.package_name.clone(),
            state: session.state,
            generation: session.generation,
            ready: session.ready,
            last_status: session.last_status,
        })
    }

    /// Describes every session, ascending by storage id
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut ids: Vec<_> = self.sessions.read().keys().copied().collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.info(id)).collect()
    }

    fn session(&self, storage: StorageId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().get(&storage).cloned()
    }
}

//! # Simulated Loader
//!
//! An in-process loader for tests and the daemon. It records every call and
//! lets the caller decide when status reports are sent.

use crate::{DataLoader, DataLoaderError, DataLoaderProvider, DataLoaderStatus, StatusListener};
use core_types::{DataLoaderParams, StorageId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A call received by a [`SimDataLoader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimLoaderCall {
    Create,
    Start,
    Stop,
    Destroy,
}

/// Loader that reports status only when told to, unless `auto_ready`
pub struct SimDataLoader {
    storage: StorageId,
    auto_ready: bool,
    fail_create: bool,
    listener: Mutex<Option<StatusListener>>,
    calls: Mutex<Vec<SimLoaderCall>>,
}

impl SimDataLoader {
    pub fn new(storage: StorageId) -> Self {
        Self {
            storage,
            auto_ready: false,
            fail_create: false,
            listener: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> StorageId {
        self.storage
    }

    /// Calls received so far, oldest first
    pub fn calls(&self) -> Vec<SimLoaderCall> {
        self.calls.lock().clone()
    }

    /// Generation of the listener handed over by `create`
    pub fn listener_generation(&self) -> Option<u64> {
        self.listener.lock().as_ref().map(StatusListener::generation)
    }

    /// Sends a status report as if the loader process had
    ///
    /// Returns false if `create` was never called.
    pub fn signal(&self, status: DataLoaderStatus) -> bool {
        match self.listener.lock().as_ref() {
            Some(listener) => {
                listener.report(status);
                true
            }
            None => false,
        }
    }

    fn record(&self, call: SimLoaderCall) {
        self.calls.lock().push(call);
    }
}

impl DataLoader for SimDataLoader {
    fn create(
        &self,
        _params: &DataLoaderParams,
        listener: StatusListener,
    ) -> Result<(), DataLoaderError> {
        self.record(SimLoaderCall::Create);
        if self.fail_create {
            return Err(DataLoaderError::Loader(format!(
                "simulated create failure for {}",
                self.storage
            )));
        }
        if self.auto_ready {
            listener.report(DataLoaderStatus::Created);
        }
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    fn start(&self) -> Result<(), DataLoaderError> {
        self.record(SimLoaderCall::Start);
        self.signal(DataLoaderStatus::Started);
        Ok(())
    }

    fn stop(&self) -> Result<(), DataLoaderError> {
        self.record(SimLoaderCall::Stop);
        self.signal(DataLoaderStatus::Stopped);
        Ok(())
    }

    fn destroy(&self) -> Result<(), DataLoaderError> {
        self.record(SimLoaderCall::Destroy);
        self.signal(DataLoaderStatus::Destroyed);
        Ok(())
    }
}

/// Provider handing out [`SimDataLoader`]s
pub struct SimLoaderProvider {
    package: String,
    privileged: bool,
    auto_ready: bool,
    fail_create: bool,
    loaders: Mutex<HashMap<StorageId, Arc<SimDataLoader>>>,
}

impl SimLoaderProvider {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            privileged: false,
            auto_ready: false,
            fail_create: false,
            loaders: Mutex::new(HashMap::new()),
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Loaders report `Created` as soon as they are created
    pub fn auto_ready(mut self) -> Self {
        self.auto_ready = true;
        self
    }

    /// Loaders fail `create`
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// The loader most recently bound for `storage`
    pub fn loader(&self, storage: StorageId) -> Option<Arc<SimDataLoader>> {
        self.loaders.lock().get(&storage).cloned()
    }
}

impl DataLoaderProvider for SimLoaderProvider {
    fn package_name(&self) -> &str {
        &self.package
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn bind(
        &self,
        storage: StorageId,
        _params: &DataLoaderParams,
    ) -> Result<Arc<dyn DataLoader>, DataLoaderError> {
        let mut loader = SimDataLoader::new(storage);
        loader.auto_ready = self.auto_ready;
        loader.fail_create = self.fail_create;
        let loader = Arc::new(loader);
        self.loaders.lock().insert(storage, loader.clone());
        Ok(loader)
    }
}

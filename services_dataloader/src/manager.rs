//! Loader provider registry and per-storage loader instances.

use crate::{DataLoader, DataLoaderProvider};
use core_types::{DataLoaderParams, StorageId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataLoaderError {
    #[error("Invalid loader parameters: {0}")]
    InvalidParams(String),

    #[error("Provider already registered: {0}")]
    ProviderAlreadyRegistered(String),

    #[error("No loader provider for package: {0}")]
    ProviderNotFound(String),

    #[error("Loader provider is not privileged: {0}")]
    NotPrivileged(String),

    #[error("Loader already initialized for {0}")]
    AlreadyInitialized(StorageId),

    #[error("No loader session for {0}")]
    SessionNotFound(StorageId),

    #[error("Loader not ready for {0}")]
    NotReady(StorageId),

    #[error("Loader session invalidated for {0}")]
    Invalidated(StorageId),

    #[error("Loader failure: {0}")]
    Loader(String),
}

/// Resolves loaders from their parameters and tracks the bound instances.
pub struct DataLoaderManager {
    providers: RwLock<HashMap<String, Arc<dyn DataLoaderProvider>>>,
    loaders: Mutex<HashMap<StorageId, Arc<dyn DataLoader>>>,
    require_privileged: bool,
}

impl DataLoaderManager {
    pub fn new(require_privileged: bool) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            loaders: Mutex::new(HashMap::new()),
            require_privileged,
        }
    }

    /// Registers a provider under its package name.
    pub fn register_provider(
        &self,
        provider: Arc<dyn DataLoaderProvider>,
    ) -> Result<(), DataLoaderError> {
        let package = provider.package_name().to_string();
        if package.is_empty() {
            return Err(DataLoaderError::InvalidParams(
                "provider has no package name".to_string(),
            ));
        }

        let mut providers = self.providers.write();
        if providers.contains_key(&package) {
            return Err(DataLoaderError::ProviderAlreadyRegistered(package));
        }
        info!(package = %package, privileged = provider.is_privileged(), "registered loader provider");
        providers.insert(package, provider);
        Ok(())
    }

    pub fn has_provider(&self, package: &str) -> bool {
        self.providers.read().contains_key(package)
    }

    /// Binds a loader for `storage`.
    ///
    /// Each storage can have at most one loader bound at a time.
    pub fn initialize(
        &self,
        storage: StorageId,
        params: &DataLoaderParams,
    ) -> Result<Arc<dyn DataLoader>, DataLoaderError> {
        if params.package_name.is_empty() {
            return Err(DataLoaderError::InvalidParams(
                "package name is empty".to_string(),
            ));
        }

        let provider = self
            .providers
            .read()
            .get(&params.package_name)
            .cloned()
            .ok_or_else(|| DataLoaderError::ProviderNotFound(params.package_name.clone()))?;
        if self.require_privileged && !provider.is_privileged() {
            warn!(%storage, package = %params.package_name, "rejecting unprivileged loader");
            return Err(DataLoaderError::NotPrivileged(params.package_name.clone()));
        }

        let mut loaders = self.loaders.lock();
        if loaders.contains_key(&storage) {
            return Err(DataLoaderError::AlreadyInitialized(storage));
        }
        let loader = provider.bind(storage, params)?;
        loaders.insert(storage, loader.clone());
        debug!(%storage, package = %params.package_name, "bound loader");
        Ok(loader)
    }

    /// Returns the loader bound for `storage`.
    pub fn get(&self, storage: StorageId) -> Option<Arc<dyn DataLoader>> {
        self.loaders.lock().get(&storage).cloned()
    }

    /// Forgets the loader without calling into it.
    pub fn release(&self, storage: StorageId) -> Option<Arc<dyn DataLoader>> {
        self.loaders.lock().remove(&storage)
    }

    /// Destroys and forgets the loader bound for `storage`.
    ///
    /// The loader is forgotten even if `destroy` fails.
    pub fn destroy(&self, storage: StorageId) -> Result<(), DataLoaderError> {
        let loader = self
            .release(storage)
            .ok_or(DataLoaderError::SessionNotFound(storage))?;
        loader.destroy()?;
        debug!(%storage, "destroyed loader");
        Ok(())
    }

    pub fn loader_count(&self) -> usize {
        self.loaders.lock().len()
    }
}

impl Default for DataLoaderManager {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SimLoaderCall, SimLoaderProvider};
    use core_types::DataLoaderKind;

    fn params(package: &str) -> DataLoaderParams {
        DataLoaderParams::new(DataLoaderKind::Streaming, package)
    }

    #[test]
    fn test_initialize_and_get() {
        let manager = DataLoaderManager::default();
        manager
            .register_provider(Arc::new(SimLoaderProvider::new("com.example.loader")))
            .unwrap();

        let storage = StorageId::new(1);
        manager
            .initialize(storage, &params("com.example.loader"))
            .unwrap();
        assert!(manager.get(storage).is_some());
        assert_eq!(manager.loader_count(), 1);
    }

    #[test]
    fn test_duplicate_initialize_is_rejected() {
        let manager = DataLoaderManager::default();
        manager
            .register_provider(Arc::new(SimLoaderProvider::new("pkg")))
            .unwrap();

        let storage = StorageId::new(1);
        manager.initialize(storage, &params("pkg")).unwrap();
        assert!(matches!(
            manager.initialize(storage, &params("pkg")),
            Err(DataLoaderError::AlreadyInitialized(id)) if id == storage
        ));
    }

    #[test]
    fn test_invalid_params() {
        let manager = DataLoaderManager::default();
        assert!(matches!(
            manager.initialize(StorageId::new(1), &params("")),
            Err(DataLoaderError::InvalidParams(_))
        ));
        assert_eq!(
            manager.initialize(StorageId::new(1), &params("missing")).err(),
            Some(DataLoaderError::ProviderNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_duplicate_provider() {
        let manager = DataLoaderManager::default();
        manager
            .register_provider(Arc::new(SimLoaderProvider::new("pkg")))
            .unwrap();
        assert!(manager
            .register_provider(Arc::new(SimLoaderProvider::new("pkg")))
            .is_err());
        assert!(manager.has_provider("pkg"));
    }

    #[test]
    fn test_privileged_check() {
        let manager = DataLoaderManager::new(true);
        manager
            .register_provider(Arc::new(SimLoaderProvider::new("plain")))
            .unwrap();
        manager
            .register_provider(Arc::new(SimLoaderProvider::new("system").privileged()))
            .unwrap();

        assert_eq!(
            manager.initialize(StorageId::new(1), &params("plain")).err(),
            Some(DataLoaderError::NotPrivileged("plain".to_string()))
        );
        manager
            .initialize(StorageId::new(2), &params("system"))
            .unwrap();
    }

    #[test]
    fn test_destroy_calls_loader() {
        let manager = DataLoaderManager::default();
        let provider = Arc::new(SimLoaderProvider::new("pkg"));
        manager.register_provider(provider.clone()).unwrap();

        let storage = StorageId::new(4);
        manager.initialize(storage, &params("pkg")).unwrap();
        manager.destroy(storage).unwrap();

        assert!(manager.get(storage).is_none());
        let loader = provider.loader(storage).unwrap();
        assert_eq!(loader.calls(), vec![SimLoaderCall::Destroy]);
        assert_eq!(
            manager.destroy(storage),
            Err(DataLoaderError::SessionNotFound(storage))
        );
    }
}

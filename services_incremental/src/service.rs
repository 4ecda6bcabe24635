//! The incremental storage orchestrator

use crate::{IncrementalConfig, IncrementalError, Notification, ServiceSnapshot, StorageEntry};
use core_types::{BindKind, CreateMode, DataLoaderKind, DataLoaderParams, FileId, MountId, StorageId};
use fs_view::PathResolver;
use incfs::{IncFs, IncFsError, NewFile, NodeKind};
use loading_status::{FileSlice, LoadingStatusTracker};
use parking_lot::{Mutex, MutexGuard};
use services_bind_mounts::{
    BindMountTable, PersistedAlias, PersistedMount, PersistedState, PersistedStorage, StateStore,
};
use services_dataloader::{
    DataLoaderManager, DataLoaderProvider, DataLoaderSessionManager, SessionState, StatusOutcome,
};
use services_registry::{StorageHandle, StorageRegistry};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

type Result<T> = std::result::Result<T, IncrementalError>;

/// A file found by path, possibly through a base storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Storage that owns the node
    pub storage: StorageId,
    pub file: FileId,
    pub size: u64,
    /// Absolute path on the backing filesystem
    pub path: PathBuf,
}

/// Incremental storage service
///
/// Owns every piece of service state; nothing lives in statics. Operations
/// on one storage are serialized by that storage's operation lock, while
/// operations on different storages run concurrently.
pub struct IncrementalService {
    config: IncrementalConfig,
    fs: Arc<dyn IncFs>,
    registry: StorageRegistry,
    mounts: BindMountTable,
    tracker: LoadingStatusTracker,
    sessions: DataLoaderSessionManager,
    store: Option<StateStore>,
    persist_lock: Mutex<()>,
    notifier: Sender<Notification>,
    inbox: Mutex<Option<Receiver<Notification>>>,
    system_ready: AtomicBool,
}

impl IncrementalService {
    pub fn new(config: IncrementalConfig, fs: Arc<dyn IncFs>) -> Self {
        let (notifier, inbox) = mpsc::channel();
        let loaders = DataLoaderManager::new(config.require_privileged_loaders);
        let sessions = DataLoaderSessionManager::new(loaders, Arc::new(notifier.clone()));
        let store = config.state_dir.clone().map(StateStore::new);

        info!(
            mount_root = %config.mount_root.display(),
            persistence = store.is_some(),
            "incremental service created"
        );

        Self {
            config,
            mounts: BindMountTable::new(fs.clone()),
            fs,
            registry: StorageRegistry::new(),
            tracker: LoadingStatusTracker::new(),
            sessions,
            store,
            persist_lock: Mutex::new(()),
            notifier,
            inbox: Mutex::new(Some(inbox)),
            system_ready: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &IncrementalConfig {
        &self.config
    }

    /// Makes a loader provider available to `create_storage`
    pub fn register_loader_provider(&self, provider: Arc<dyn DataLoaderProvider>) -> Result<()> {
        Ok(self.sessions.loaders().register_provider(provider)?)
    }

    /// Sender for filesystem and loader events
    pub fn notifier(&self) -> Sender<Notification> {
        self.notifier.clone()
    }

    /// Returns true if `path` lives on the backing filesystem
    pub fn is_incremental_path(&self, path: &str) -> bool {
        self.fs.is_incfs_path(Path::new(path))
    }

    /// Finds the storage that serves `path`
    ///
    /// The longest mount target containing the path wins; storage roots are
    /// checked after mounts.
    pub fn open_storage(&self, path: &str) -> Result<StorageId> {
        let target = PathResolver::absolute_target(path)?;
        if let Some(mount) = self.mounts.find_containing(&target) {
            if self.registry.contains(mount.storage) {
                return Ok(mount.storage);
            }
        }
        self.registry
            .snapshot()
            .into_iter()
            .find(|storage| target.starts_with(&storage.root))
            .map(|storage| storage.id)
            .ok_or_else(|| IncrementalError::NotFound(path.to_string()))
    }

    /// Creates a storage and mounts its root at `path`
    ///
    /// With `open_existing`, a storage already mounted at `path` is
    /// returned as is. Params of kind `None` mean no loader.
    pub fn create_storage(
        &self,
        path: &str,
        params: Option<DataLoaderParams>,
        mode: CreateMode,
    ) -> Result<StorageId> {
        let target = PathResolver::absolute_target(path)?;
        if let Some(existing) = self.existing_at(&target, mode)? {
            debug!(storage = %existing, target = %target.display(), "opened existing storage");
            return Ok(existing);
        }
        let params = params.filter(|params| params.kind != DataLoaderKind::None);
        if let Some(params) = &params {
            self.check_loader(params)?;
        }

        let id = self.registry.allocate()?;
        self.build_storage(id, &target, mode, None, params)?;
        Ok(id)
    }

    /// Creates a storage that resolves missing content through `base`
    pub fn create_linked_storage(
        &self,
        path: &str,
        base: StorageId,
        mode: CreateMode,
    ) -> Result<StorageId> {
        let target = PathResolver::absolute_target(path)?;
        let base_handle = self.registry.lookup(base)?;
        // Held until the child is registered; the child's id is always
        // higher, so the ascending lock order holds.
        let _base_guard = self.lock_live(&base_handle)?;
        if let Some(existing) = self.existing_at(&target, mode)? {
            return Ok(existing);
        }

        let id = self.registry.allocate()?;
        self.build_storage(id, &target, mode, Some(base), None)?;
        Ok(id)
    }

    fn existing_at(&self, target: &Path, mode: CreateMode) -> Result<Option<StorageId>> {
        if !mode.create && !mode.open_existing {
            return Err(IncrementalError::InvalidArgument(
                "create mode allows neither create nor open_existing".to_string(),
            ));
        }
        match self.mounts.get(target) {
            Some(mount) if mode.open_existing => Ok(Some(mount.storage)),
            Some(_) => Err(IncrementalError::AlreadyExists(target.display().to_string())),
            None if mode.create => Ok(None),
            None => Err(IncrementalError::NotFound(target.display().to_string())),
        }
    }

    fn check_loader(&self, params: &DataLoaderParams) -> Result<()> {
        if params.package_name.is_empty() {
            return Err(IncrementalError::InvalidArgument(
                "loader package name is empty".to_string(),
            ));
        }
        if !self.sessions.loaders().has_provider(&params.package_name) {
            return Err(IncrementalError::NotFound(format!(
                "loader provider {}",
                params.package_name
            )));
        }
        Ok(())
    }

    /// Builds an allocated storage, rolling back on failure
    ///
    /// The id stays consumed whether or not this succeeds.
    fn build_storage(
        &self,
        id: StorageId,
        target: &Path,
        mode: CreateMode,
        base: Option<StorageId>,
        params: Option<DataLoaderParams>,
    ) -> Result<()> {
        let root = self.config.storage_root(id);
        self.fs.create_root(&root)?;

        let registered = match base {
            Some(base) => self.registry.register_linked(id, root.clone(), mode, base),
            None => self.registry.register(id, root.clone(), mode),
        };
        let handle = match registered {
            Ok(handle) => handle,
            Err(err) => {
                if let Err(cleanup) = self.fs.remove_root(&root) {
                    warn!(storage = %id, error = %cleanup, "failed to remove orphaned root");
                }
                return Err(err.into());
            }
        };

        let _guard = handle.lock();
        self.tracker.add_storage(id);
        if let Err(err) = self.attach(&handle, target, mode, params) {
            warn!(storage = %id, error = %err, "storage creation failed, rolling back");
            if let Err(cleanup) = self.teardown(&handle) {
                warn!(storage = %id, error = %cleanup, "rollback incomplete");
            }
            return Err(err);
        }

        info!(
            storage = %id,
            root = %root.display(),
            target = %target.display(),
            kind = %handle.kind(),
            "storage created"
        );
        if mode.bind.is_persistent() {
            self.persist_state();
        }
        Ok(())
    }

    fn attach(
        &self,
        handle: &StorageHandle,
        target: &Path,
        mode: CreateMode,
        params: Option<DataLoaderParams>,
    ) -> Result<()> {
        let id = handle.id();
        self.mounts.bind(id, "", handle.root(), target, mode.bind)?;
        self.registry.retain_mount(id)?;
        if let Some(params) = params {
            self.sessions.open(id, params)?;
        }
        Ok(())
    }

    /// Tears a storage down; the caller holds its operation lock
    ///
    /// Every step runs even after a failure and the first error is returned.
    /// Only a registry refusal (`HasDependents`) keeps the storage alive.
    fn teardown(&self, handle: &StorageHandle) -> Result<()> {
        let id = handle.id();
        let mut first_error: Option<IncrementalError> = None;

        let unbound = self.mounts.unbind_all(id);
        let removed = unbound.removed.len();
        let had_permanent = unbound.removed.iter().any(|mount| mount.kind.is_persistent());
        if let Some(err) = unbound.first_error {
            first_error.get_or_insert(err.into());
        }
        if let Err(err) = self.registry.release_mounts(id, removed) {
            first_error.get_or_insert(err.into());
        }
        if let Err(err) = self.sessions.close(id) {
            warn!(storage = %id, error = %err, "loader session did not close cleanly");
            first_error.get_or_insert(err.into());
        }

        self.registry.remove(id)?;
        self.tracker.remove_storage(id);
        if let Err(err) = self.fs.remove_root(handle.root()) {
            warn!(storage = %id, error = %err, "failed to remove storage root");
            first_error.get_or_insert(err.into());
        }
        if had_permanent {
            self.persist_state();
        }

        info!(storage = %id, mounts = removed, "storage deleted");
        first_error.map_or(Ok(()), Err)
    }

    /// Deletes a storage with all its mounts, session and loading state
    ///
    /// Fails `HasDependents` while linked storages use it as their base.
    pub fn delete_storage(&self, id: StorageId) -> Result<()> {
        let handle = self.registry.lookup(id)?;
        let _guard = handle.lock();
        if !self.registry.contains(id) {
            return Err(IncrementalError::NotFound(id.to_string()));
        }
        if handle.has_children() {
            let children: Vec<String> =
                handle.children().iter().map(|child| child.to_string()).collect();
            return Err(IncrementalError::HasDependents(format!(
                "{} is the base of [{}]",
                id,
                children.join(", ")
            )));
        }
        self.teardown(&handle)
    }

    /// Projects `path` of a storage onto `target`
    pub fn make_bind_mount(
        &self,
        id: StorageId,
        path: &str,
        target: &str,
        kind: BindKind,
    ) -> Result<MountId> {
        let handle = self.registry.lookup(id)?;
        let relative = PathResolver::normalize(path)?;
        let target = PathResolver::absolute_target(target)?;
        let _guard = self.lock_live(&handle)?;

        let source = PathResolver::resolve(handle.root(), &relative)?;
        self.fs.stat(&source)?;
        let mount = self.mounts.bind(id, &relative, &source, &target, kind)?;
        self.registry.retain_mount(id)?;
        if kind.is_persistent() {
            self.persist_state();
        }
        Ok(mount)
    }

    /// Removes the mount of storage `id` at `target`
    pub fn delete_bind_mount(&self, id: StorageId, target: &str) -> Result<()> {
        let handle = self.registry.lookup(id)?;
        let target = PathResolver::absolute_target(target)?;
        let _guard = handle.lock();
        if !self.registry.contains(id) {
            return Err(IncrementalError::NotFound(id.to_string()));
        }

        let mount = self.mounts.unbind(id, &target)?;
        self.registry.release_mounts(id, 1)?;
        if mount.kind.is_persistent() {
            self.persist_state();
        }
        Ok(())
    }

    pub fn make_directory(&self, id: StorageId, path: &str) -> Result<()> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;
        if PathResolver::split_parent(path)?.is_none() {
            return Err(IncrementalError::AlreadyExists(handle.root().display().to_string()));
        }
        let abs = PathResolver::resolve(handle.root(), path)?;
        self.fs.make_dir(&abs)?;
        debug!(storage = %id, path = %abs.display(), "directory created");
        Ok(())
    }

    /// Creates `path` and any missing parents; existing directories are fine
    pub fn make_directories(&self, id: StorageId, path: &str) -> Result<()> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;

        let mut current = handle.root().to_path_buf();
        for component in PathResolver::split_path(path)? {
            current.push(component);
            match self.fs.stat(&current) {
                Ok(node) if node.kind == NodeKind::Directory => {}
                Ok(_) => return Err(IncFsError::NotADirectory(current).into()),
                Err(IncFsError::NotFound(_)) => match self.fs.make_dir(&current) {
                    Ok(()) | Err(IncFsError::AlreadyExists(_)) => {}
                    Err(err) => return Err(err.into()),
                },
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Creates a file whose content will be streamed in later
    pub fn make_file(
        &self,
        id: StorageId,
        path: &str,
        size: u64,
        metadata: &[u8],
    ) -> Result<FileId> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;
        if PathResolver::split_parent(path)?.is_none() {
            return Err(IncrementalError::InvalidPath("file path is empty".to_string()));
        }

        let abs = PathResolver::resolve(handle.root(), path)?;
        let file = FileId::new();
        self.fs.make_file(
            &abs,
            NewFile {
                id: file,
                size,
                metadata: metadata.to_vec(),
            },
        )?;
        self.tracker.track_file(id, file, size)?;
        debug!(storage = %id, %file, path = %abs.display(), size, "file created");
        Ok(file)
    }

    /// Creates a file whose content is bytes `[start, end)` of another file
    pub fn make_file_from_range(
        &self,
        id: StorageId,
        path: &str,
        source_path: &str,
        start: u64,
        end: u64,
    ) -> Result<FileId> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;
        if PathResolver::split_parent(path)?.is_none() {
            return Err(IncrementalError::InvalidPath("file path is empty".to_string()));
        }

        let source = self.locate_file(&handle, source_path)?;
        if start >= end || end > source.size {
            return Err(IncrementalError::InvalidRange {
                start,
                end,
                size: source.size,
            });
        }

        let dest = PathResolver::resolve(handle.root(), path)?;
        let metadata = self.fs.metadata(&source.path)?;
        let file = FileId::new();
        let len = end - start;
        self.fs.make_file(
            &dest,
            NewFile {
                id: file,
                size: len,
                metadata,
            },
        )?;
        self.tracker.track_alias(
            id,
            file,
            FileSlice {
                storage: source.storage,
                file: source.file,
                offset: start,
                len,
            },
        )?;
        debug!(
            storage = %id,
            %file,
            source = %source.file,
            start,
            end,
            "file created from range"
        );
        self.persist_if_restorable(id);
        Ok(file)
    }

    /// Hard-links a file into a storage, possibly a different one
    pub fn make_link(
        &self,
        source_id: StorageId,
        source_path: &str,
        dest_id: StorageId,
        dest_path: &str,
    ) -> Result<()> {
        let source_handle = self.registry.lookup(source_id)?;
        let dest_handle = self.registry.lookup(dest_id)?;
        let _guards = lock_pair(&source_handle, &dest_handle);
        self.ensure_live(&source_handle)?;
        self.ensure_live(&dest_handle)?;
        if PathResolver::split_parent(dest_path)?.is_none() {
            return Err(IncrementalError::InvalidPath("link path is empty".to_string()));
        }

        let source = self.locate_file(&source_handle, source_path)?;
        let dest = PathResolver::resolve(dest_handle.root(), dest_path)?;
        self.fs.link(&source.path, &dest)?;
        if source.storage != dest_id {
            self.tracker.track_alias(
                dest_id,
                source.file,
                FileSlice {
                    storage: source.storage,
                    file: source.file,
                    offset: 0,
                    len: source.size,
                },
            )?;
            self.persist_if_restorable(dest_id);
        }
        debug!(
            from = %source.path.display(),
            to = %dest.display(),
            file = %source.file,
            "link created"
        );
        Ok(())
    }

    /// Removes a file, link or empty directory
    ///
    /// Loading state is kept: other links may still name the content.
    pub fn unlink(&self, id: StorageId, path: &str) -> Result<()> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;
        if PathResolver::split_parent(path)?.is_none() {
            return Err(IncrementalError::InvalidPath(
                "cannot unlink the storage root".to_string(),
            ));
        }
        let abs = PathResolver::resolve(handle.root(), path)?;
        self.fs.unlink(&abs)?;
        debug!(storage = %id, path = %abs.display(), "unlinked");
        Ok(())
    }

    /// Returns true once every byte of `[start, end)` has been streamed in
    pub fn is_file_range_loaded(
        &self,
        id: StorageId,
        path: &str,
        start: u64,
        end: u64,
    ) -> Result<bool> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;
        let file = self.locate_file(&handle, path)?;
        Ok(self
            .tracker
            .is_range_loaded(file.storage, file.file, start, end)?)
    }

    pub fn get_file_metadata(&self, id: StorageId, path: &str) -> Result<Vec<u8>> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;
        let file = self.locate_file(&handle, path)?;
        Ok(self.fs.metadata(&file.path)?)
    }

    /// Looks a file up by path, falling back through base storages
    pub fn resolve_file(&self, id: StorageId, path: &str) -> Result<ResolvedFile> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;
        self.locate_file(&handle, path)
    }

    /// Starts streaming for a storage
    ///
    /// Returns true if this call started the loader and false if it was
    /// already streaming. A linked storage without its own loader starts its
    /// base's loader. Fails `DataLoaderNotReady` until the loader reported
    /// `Created`.
    pub fn start_loading(&self, id: StorageId) -> Result<bool> {
        let handle = self.registry.lookup(id)?;
        let _guard = self.lock_live(&handle)?;
        let owner = self.loader_owner(&handle)?;
        Ok(self.sessions.start(owner)?)
    }

    fn loader_owner(&self, handle: &StorageHandle) -> Result<StorageId> {
        let mut id = handle.id();
        let mut base = handle.base();
        while !self.sessions.contains(id) {
            let Some(next) = base else {
                break;
            };
            id = next;
            base = self.registry.lookup(next)?.base();
        }
        Ok(id)
    }

    fn locate_file(&self, handle: &StorageHandle, path: &str) -> Result<ResolvedFile> {
        let relative = PathResolver::normalize(path)?;
        if relative.is_empty() {
            return Err(IncrementalError::InvalidPath("file path is empty".to_string()));
        }

        let mut storage = handle.id();
        let mut root = handle.root().to_path_buf();
        let mut base = handle.base();
        loop {
            let abs = PathResolver::resolve(&root, &relative)?;
            match self.fs.stat(&abs) {
                Ok(node) => {
                    let info = node.expect_file(&abs)?;
                    return Ok(ResolvedFile {
                        storage,
                        file: info.id,
                        size: info.size,
                        path: abs,
                    });
                }
                Err(IncFsError::NotFound(_)) => {
                    let Some(next) = base else {
                        return Err(IncrementalError::NotFound(format!(
                            "{} in {}",
                            relative,
                            handle.id()
                        )));
                    };
                    let next_handle = self.registry.lookup(next)?;
                    storage = next;
                    root = next_handle.root().to_path_buf();
                    base = next_handle.base();
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn lock_live<'a>(&self, handle: &'a StorageHandle) -> Result<MutexGuard<'a, ()>> {
        let guard = handle.lock();
        self.ensure_live(handle)?;
        Ok(guard)
    }

    fn ensure_live(&self, handle: &StorageHandle) -> Result<()> {
        if !self.registry.contains(handle.id()) {
            return Err(IncrementalError::NotFound(handle.id().to_string()));
        }
        if handle.is_invalidated() {
            return Err(IncrementalError::Invalidated(handle.id()));
        }
        Ok(())
    }

    /// Re-applies persisted permanent mounts
    ///
    /// Returns the number of mounts re-applied. Unreadable state is logged
    /// and ignored; individual restore failures are logged and the first
    /// one returned after every entry has been tried.
    pub fn on_system_ready(&self) -> Result<usize> {
        self.system_ready.store(true, Ordering::Release);
        let Some(store) = &self.store else {
            info!("system ready, persistence disabled");
            return Ok(0);
        };
        let state = match store.load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                info!("system ready, no persisted mounts");
                return Ok(0);
            }
            Err(err) => {
                warn!(path = %store.path().display(), error = %err, "ignoring persisted state");
                return Ok(0);
            }
        };

        let mut first_error: Option<IncrementalError> = None;
        let mut restored = Vec::new();
        for storage in &state.storages {
            match self.restore_storage(storage) {
                Ok(Some(files)) => restored.push((storage, files)),
                Ok(None) => {}
                Err(err) => {
                    warn!(storage = %storage.id, error = %err, "failed to restore storage");
                    first_error.get_or_insert(err);
                }
            }
        }
        // Aliases may point into any restored storage, so they go last.
        for (storage, files) in restored {
            self.restore_aliases(storage, &files);
        }

        let mut applied = 0;
        for mount in &state.mounts {
            match self.restore_mount(mount) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(mount = %mount.id, target = %mount.target.display(), error = %err, "failed to restore mount");
                    first_error.get_or_insert(err);
                }
            }
        }

        info!(
            storages = state.storages.len(),
            mounts = applied,
            "system ready, persisted mounts re-applied"
        );
        first_error.map_or(Ok(applied), Err)
    }

    /// Re-registers a persisted storage and tracks the files it still has
    ///
    /// Returns the files found on disk, or `None` if the storage was already
    /// live. Files listed as aliases are left for [`Self::restore_aliases`].
    /// Fill state starts empty.
    fn restore_storage(&self, storage: &PersistedStorage) -> Result<Option<HashMap<FileId, u64>>> {
        if self.registry.contains(storage.id) {
            return Ok(None);
        }
        if !self.fs.root_exists(&storage.root) {
            warn!(storage = %storage.id, root = %storage.root.display(), "storage root missing, recreating empty");
            self.fs.create_root(&storage.root)?;
        }
        let listed = self.fs.list_files(&storage.root)?;

        let handle =
            self.registry
                .restore(storage.id, storage.root.clone(), storage.mode, storage.base)?;
        let _guard = handle.lock();
        self.tracker.add_storage(storage.id);
        let mut files = HashMap::new();
        for (_, info) in listed {
            files.insert(info.id, info.size);
            if storage.alias(info.id).is_none() {
                self.tracker.track_file(storage.id, info.id, info.size)?;
            }
        }
        if let Some(params) = &storage.loader {
            if let Err(err) = self.sessions.open(storage.id, params.clone()) {
                warn!(storage = %storage.id, error = %err, "failed to reopen loader session");
            }
        }
        debug!(storage = %storage.id, files = files.len(), "storage restored");
        Ok(Some(files))
    }

    /// Re-links restored alias files to their owners
    ///
    /// An alias whose owner did not come back is tracked as a file of its
    /// own.
    fn restore_aliases(&self, storage: &PersistedStorage, files: &HashMap<FileId, u64>) {
        let Ok(handle) = self.registry.lookup(storage.id) else {
            return;
        };
        let _guard = handle.lock();
        for alias in &storage.aliases {
            let Some(&size) = files.get(&alias.file) else {
                continue;
            };
            let owner = FileSlice {
                storage: alias.owner_storage,
                file: alias.owner_file,
                offset: alias.offset,
                len: alias.len,
            };
            if let Err(err) = self.tracker.track_alias(storage.id, alias.file, owner) {
                warn!(storage = %storage.id, file = %alias.file, error = %err, "alias owner missing, tracking file on its own");
                if let Err(err) = self.tracker.track_file(storage.id, alias.file, size) {
                    warn!(storage = %storage.id, file = %alias.file, error = %err, "failed to track restored file");
                }
            }
        }
    }

    fn restore_mount(&self, mount: &PersistedMount) -> Result<bool> {
        let handle = self.registry.lookup(mount.storage)?;
        let _guard = handle.lock();
        if let Some(existing) = self.mounts.get(&mount.target) {
            if existing.id == mount.id {
                return Ok(false);
            }
            return Err(IncrementalError::AlreadyBound(
                mount.target.display().to_string(),
            ));
        }

        let source = PathResolver::resolve(handle.root(), &mount.path)?;
        self.mounts.bind_as(
            mount.id,
            mount.storage,
            &mount.path,
            &source,
            &mount.target,
            BindKind::Permanent,
        )?;
        self.registry.retain_mount(mount.storage)?;
        Ok(true)
    }

    /// Forced teardown after the backing system declared a storage unusable
    ///
    /// The storage and its session are marked invalidated first, so every
    /// later operation on it fails `Invalidated`. A storage that is still a
    /// base stays registered and `HasDependents` is returned.
    pub fn on_invalid_storage(&self, id: StorageId) -> Result<()> {
        let handle = self.registry.lookup(id)?;
        let _guard = handle.lock();
        if !self.registry.contains(id) {
            debug!(storage = %id, "invalidation for removed storage discarded");
            return Ok(());
        }

        self.registry.mark_invalidated(id)?;
        self.sessions.invalidate(id);
        warn!(storage = %id, "storage invalidated");

        if handle.has_children() {
            return Err(IncrementalError::HasDependents(format!(
                "invalidated {} still has linked storages",
                id
            )));
        }
        self.teardown(&handle)
    }

    /// Applies one inbound event
    pub fn handle_notification(&self, notification: Notification) -> Result<()> {
        match notification {
            Notification::SystemReady => self.on_system_ready().map(|_| ()),
            Notification::StorageInvalid(id) => self.on_invalid_storage(id),
            Notification::RangeFilled {
                storage,
                file,
                range,
            } => {
                let handle = self.registry.lookup(storage)?;
                let _guard = handle.lock();
                if !self.registry.contains(storage) {
                    debug!(%storage, "fill for removed storage discarded");
                    return Ok(());
                }
                self.tracker.mark_filled(storage, file, range)?;
                Ok(())
            }
            Notification::LoaderStatus(report) => {
                let Ok(handle) = self.registry.lookup(report.storage) else {
                    debug!(storage = %report.storage, status = %report.status, "status for removed storage discarded");
                    return Ok(());
                };
                let outcome = {
                    let _guard = handle.lock();
                    self.sessions.handle_status(report)
                };
                if outcome == StatusOutcome::Invalidated {
                    self.on_invalid_storage(report.storage)?;
                }
                Ok(())
            }
            Notification::Shutdown => Ok(()),
        }
    }

    fn dispatch(&self, notification: Notification) {
        if let Err(err) = self.handle_notification(notification.clone()) {
            warn!(?notification, error = %err, "notification failed");
        }
    }

    /// Applies queued notifications on the calling thread
    ///
    /// Keeps draining until the queue is empty, so events raised while
    /// handling a batch are applied too. Returns 0 once a dispatcher thread
    /// owns the queue.
    pub fn process_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            let batch: Vec<Notification> = {
                let inbox = self.inbox.lock();
                match inbox.as_ref() {
                    Some(receiver) => receiver.try_iter().collect(),
                    None => return handled,
                }
            };
            if batch.is_empty() {
                return handled;
            }
            handled += batch.len();
            for notification in batch {
                self.dispatch(notification);
            }
        }
    }

    /// Moves notification handling onto a background thread
    ///
    /// The thread stops on `Notification::Shutdown` or once the service is
    /// dropped.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let receiver = self.inbox.lock().take().ok_or_else(|| {
            IncrementalError::AlreadyExists("notification dispatcher".to_string())
        })?;
        let service = Arc::downgrade(self);

        thread::Builder::new()
            .name("incremental-notify".to_string())
            .spawn(move || {
                while let Ok(notification) = receiver.recv() {
                    if notification == Notification::Shutdown {
                        break;
                    }
                    let Some(service) = service.upgrade() else {
                        break;
                    };
                    service.dispatch(notification);
                }
                debug!("notification dispatcher stopped");
            })
            .map_err(|err| IncrementalError::IoFailure(err.to_string()))
    }

    /// Unmounts everything and closes every session
    ///
    /// Storages that the state file brings back keep their roots, so
    /// permanent mounts return on the next `on_system_ready`. Every other
    /// storage is deleted, dependents before their bases.
    pub fn shutdown(&self) {
        let restorable = match self.store {
            Some(_) => self.restorable_ids(),
            None => BTreeSet::new(),
        };
        for id in self.registry.ids().into_iter().rev() {
            let Ok(handle) = self.registry.lookup(id) else {
                continue;
            };
            let _guard = handle.lock();
            if !restorable.contains(&id) {
                if let Err(err) = self.teardown(&handle) {
                    warn!(storage = %id, error = %err, "temporary storage not fully removed");
                }
                continue;
            }
            let unbound = self.mounts.unbind_all(id);
            if let Some(err) = unbound.first_error {
                warn!(storage = %id, error = %err, "unmount failed during shutdown");
            }
            if let Err(err) = self.registry.release_mounts(id, unbound.removed.len()) {
                warn!(storage = %id, error = %err, "mount count out of sync");
            }
            if let Err(err) = self.sessions.close(id) {
                warn!(storage = %id, error = %err, "loader session did not close cleanly");
            }
        }
        if self.notifier.send(Notification::Shutdown).is_err() {
            debug!("notification channel already closed");
        }
        info!("incremental service shut down");
    }

    /// Writes the permanent mounts and the storages they need
    ///
    /// Failures are logged; the operation that triggered the write has
    /// already taken effect.
    fn persist_state(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _guard = self.persist_lock.lock();
        let state = self.collect_persisted();
        match store.save(&state) {
            Ok(()) => debug!(
                storages = state.storages.len(),
                mounts = state.mounts.len(),
                "state persisted"
            ),
            Err(err) => error!(path = %store.path().display(), error = %err, "failed to persist state"),
        }
    }

    /// Rewrites the state file if `id` is one of the storages it holds
    fn persist_if_restorable(&self, id: StorageId) {
        if self.store.is_some() && self.restorable_ids().contains(&id) {
            self.persist_state();
        }
    }

    /// Storages with a permanent mount, plus the bases they link to
    fn restorable_ids(&self) -> BTreeSet<StorageId> {
        self.with_bases(
            self.mounts
                .snapshot()
                .iter()
                .filter(|mount| mount.kind.is_persistent())
                .map(|mount| mount.storage),
        )
    }

    fn with_bases(&self, storages: impl IntoIterator<Item = StorageId>) -> BTreeSet<StorageId> {
        let mut ids = BTreeSet::new();
        for storage in storages {
            let mut next = Some(storage);
            while let Some(id) = next {
                if !ids.insert(id) {
                    break;
                }
                next = self.registry.lookup(id).ok().and_then(|handle| handle.base());
            }
        }
        ids
    }

    fn collect_persisted(&self) -> PersistedState {
        let mounts: Vec<_> = self
            .mounts
            .snapshot()
            .into_iter()
            .filter(|mount| mount.kind.is_persistent())
            .collect();

        // Ascending ids put bases before their dependents.
        let storages = self
            .with_bases(mounts.iter().map(|mount| mount.storage))
            .into_iter()
            .filter_map(|id| self.registry.lookup(id).ok())
            .map(|handle| PersistedStorage {
                id: handle.id(),
                root: handle.root().to_path_buf(),
                mode: handle.mode(),
                base: handle.base(),
                loader: self.sessions.params(handle.id()),
                aliases: self
                    .tracker
                    .aliases(handle.id())
                    .into_iter()
                    .map(|(file, owner)| PersistedAlias {
                        file,
                        owner_storage: owner.storage,
                        owner_file: owner.file,
                        offset: owner.offset,
                        len: owner.len,
                    })
                    .collect(),
            })
            .collect();
        let mounts = mounts
            .into_iter()
            .map(|mount| PersistedMount {
                id: mount.id,
                storage: mount.storage,
                path: mount.path,
                target: mount.target,
            })
            .collect();
        PersistedState::new(storages, mounts)
    }

    pub fn is_system_ready(&self) -> bool {
        self.system_ready.load(Ordering::Acquire)
    }

    pub fn storage_count(&self) -> usize {
        self.registry.count()
    }

    /// Id the next successful creation will receive
    pub fn next_storage_id(&self) -> StorageId {
        self.registry.next_id()
    }

    pub fn session_state(&self, id: StorageId) -> Option<SessionState> {
        self.sessions.state(id)
    }

    /// Diagnostic view of all storages, mounts and sessions
    pub fn dump(&self) -> ServiceSnapshot {
        let storages = self
            .registry
            .snapshot()
            .into_iter()
            .map(|summary| StorageEntry {
                progress: self.tracker.progress(summary.id),
                summary,
            })
            .collect();
        ServiceSnapshot {
            system_ready: self.is_system_ready(),
            storages,
            mounts: self.mounts.snapshot(),
            sessions: self.sessions.snapshot(),
        }
    }
}

/// Locks two storages in ascending id order
fn lock_pair<'a>(
    a: &'a StorageHandle,
    b: &'a StorageHandle,
) -> (MutexGuard<'a, ()>, Option<MutexGuard<'a, ()>>) {
    if a.id() == b.id() {
        return (a.lock(), None);
    }
    let (first, second) = if a.id() < b.id() { (a, b) } else { (b, a) };
    let first = first.lock();
    let second = second.lock();
    (first, Some(second))
}

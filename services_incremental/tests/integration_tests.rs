//! Integration tests for the incremental storage service
//!
//! These tests drive the service end to end over the in-memory driver and
//! simulated loaders:
//! - Storage, file and mount lifecycles
//! - Range loading, including aliases from ranges and links
//! - Loader session readiness, reconnects and invalidation
//! - Persistence of permanent mounts across restarts

use core_types::{BindKind, CreateMode, DataLoaderKind, DataLoaderParams, StorageId};
use incfs::{FailingIncFs, FailurePolicy, IncFs, SimIncFs};
use loading_status::ByteRange;
use services_dataloader::{DataLoaderStatus, SessionState, SimLoaderCall, SimLoaderProvider};
use services_incremental::{IncrementalConfig, IncrementalError, IncrementalService, Notification};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const LOADER_PACKAGE: &str = "com.example.loader";

fn new_service() -> (IncrementalService, Arc<SimIncFs>) {
    let fs = Arc::new(SimIncFs::new());
    let service = IncrementalService::new(IncrementalConfig::default(), fs.clone());
    (service, fs)
}

fn with_provider(service: &IncrementalService, provider: SimLoaderProvider) -> Arc<SimLoaderProvider> {
    let provider = Arc::new(provider);
    service.register_loader_provider(provider.clone()).unwrap();
    provider
}

fn loader_params() -> DataLoaderParams {
    DataLoaderParams::new(DataLoaderKind::Streaming, LOADER_PACKAGE)
}

fn temporary() -> CreateMode {
    CreateMode::create_temporary()
}

fn fill(service: &IncrementalService, storage: StorageId, path: &str, start: u64, end: u64) {
    let file = service.resolve_file(storage, path).unwrap();
    service
        .notifier()
        .send(Notification::RangeFilled {
            storage: file.storage,
            file: file.file,
            range: ByteRange::new(start, end),
        })
        .unwrap();
    service.process_pending();
}

#[test]
fn test_metadata_round_trip() {
    let (service, _fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();

    let blobs: [&[u8]; 3] = [b"", b"meta", &[0u8, 255, 7, 0, 1]];
    for (index, metadata) in blobs.iter().enumerate() {
        let path = format!("file_{}.bin", index);
        service.make_file(id, &path, 4096, metadata).unwrap();
        assert_eq!(service.get_file_metadata(id, &path).unwrap(), metadata.to_vec());
    }
}

#[test]
fn test_adjacent_fills_merge() {
    let (service, _fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    service.make_file(id, "a.bin", 100, b"m").unwrap();

    assert!(!service.is_file_range_loaded(id, "a.bin", 0, 20).unwrap());
    fill(&service, id, "a.bin", 0, 10);
    assert!(!service.is_file_range_loaded(id, "a.bin", 0, 20).unwrap());
    assert!(service.is_file_range_loaded(id, "a.bin", 0, 10).unwrap());

    fill(&service, id, "a.bin", 10, 20);
    assert!(service.is_file_range_loaded(id, "a.bin", 0, 20).unwrap());
    assert!(!service.is_file_range_loaded(id, "a.bin", 0, 21).unwrap());

    fill(&service, id, "a.bin", 15, 100);
    assert!(service.is_file_range_loaded(id, "a.bin", 0, 100).unwrap());
}

#[test]
fn test_range_query_bounds() {
    let (service, _fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    service.make_file(id, "a.bin", 100, b"m").unwrap();

    assert_eq!(
        service.is_file_range_loaded(id, "a.bin", 50, 50),
        Err(IncrementalError::InvalidRange {
            start: 50,
            end: 50,
            size: 100
        })
    );
    assert!(matches!(
        service.is_file_range_loaded(id, "a.bin", 0, 101),
        Err(IncrementalError::InvalidRange { .. })
    ));
    assert!(matches!(
        service.is_file_range_loaded(id, "missing.bin", 0, 1),
        Err(IncrementalError::NotFound(_))
    ));
}

#[test]
fn test_double_unlink_fails_not_found() {
    let (service, _fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    service.make_file(id, "a.bin", 10, b"m").unwrap();

    service.unlink(id, "a.bin").unwrap();
    assert!(matches!(
        service.unlink(id, "a.bin"),
        Err(IncrementalError::NotFound(_))
    ));
}

#[test]
fn test_bind_target_is_exclusive_until_deleted() {
    let (service, fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    service.make_directory(id, "lib").unwrap();
    service.make_directory(id, "res").unwrap();

    service
        .make_bind_mount(id, "lib", "/data/app/lib", BindKind::Temporary)
        .unwrap();
    assert_eq!(
        service.make_bind_mount(id, "res", "/data/app/lib", BindKind::Temporary),
        Err(IncrementalError::AlreadyBound("/data/app/lib".into()))
    );

    service.delete_bind_mount(id, "/data/app/lib").unwrap();
    service
        .make_bind_mount(id, "res", "/data/app/lib", BindKind::Temporary)
        .unwrap();
    assert_eq!(
        fs.mount_source(Path::new("/data/app/lib")),
        Some(PathBuf::from("/data/incremental/MT_1/res"))
    );
}

#[test]
fn test_bind_of_missing_path_fails() {
    let (service, fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();

    assert!(matches!(
        service.make_bind_mount(id, "nope", "/data/app/nope", BindKind::Temporary),
        Err(IncrementalError::NotFound(_))
    ));
    assert_eq!(fs.mount_count(), 1);
}

#[test]
fn test_delete_storage_tears_down_mounts() {
    let (service, fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    service.make_directory(id, "lib").unwrap();
    service
        .make_bind_mount(id, "lib", "/data/app/lib", BindKind::Temporary)
        .unwrap();
    assert_eq!(fs.mount_count(), 2);

    service.delete_storage(id).unwrap();
    assert_eq!(fs.mount_count(), 0);
    assert!(!fs.root_exists(Path::new("/data/incremental/MT_1")));
    assert_eq!(service.storage_count(), 0);

    assert!(matches!(
        service.make_bind_mount(id, "lib", "/data/app/lib", BindKind::Temporary),
        Err(IncrementalError::NotFound(_))
    ));
    assert!(matches!(
        service.delete_storage(id),
        Err(IncrementalError::NotFound(_))
    ));
}

#[test]
fn test_failed_linked_create_consumes_no_id() {
    let (service, _fs) = new_service();
    let before = service.next_storage_id();

    assert!(matches!(
        service.create_linked_storage("/data/app/linked", StorageId::new(42), temporary()),
        Err(IncrementalError::NotFound(_))
    ));
    assert_eq!(service.next_storage_id(), before);

    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    assert_eq!(id, before);
}

#[test]
fn test_ids_are_never_reused() {
    let (service, _fs) = new_service();
    let first = service.create_storage("/data/app/a", None, temporary()).unwrap();
    service.delete_storage(first).unwrap();

    let second = service.create_storage("/data/app/a", None, temporary()).unwrap();
    assert!(second > first);
}

#[test]
fn test_assets_scenario() {
    let (service, _fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    assert_eq!(id, StorageId::new(1));

    service.make_directory(id, "assets").unwrap();
    service.make_file(id, "assets/a.bin", 100, b"meta").unwrap();
    service
        .make_file_from_range(id, "assets/a_head.bin", "assets/a.bin", 0, 50)
        .unwrap();

    assert_eq!(
        service.make_file_from_range(id, "assets/a_tail.bin", "assets/a.bin", 60, 50),
        Err(IncrementalError::InvalidRange {
            start: 60,
            end: 50,
            size: 100
        })
    );
    assert!(matches!(
        service.make_file_from_range(id, "assets/a_tail.bin", "assets/a.bin", 50, 101),
        Err(IncrementalError::InvalidRange { .. })
    ));
    assert_eq!(
        service.get_file_metadata(id, "assets/a_head.bin").unwrap(),
        b"meta".to_vec()
    );
}

#[test]
fn test_range_file_follows_source_fills() {
    let (service, _fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    service.make_file(id, "a.bin", 100, b"m").unwrap();
    service
        .make_file_from_range(id, "tail.bin", "a.bin", 50, 100)
        .unwrap();

    fill(&service, id, "a.bin", 50, 80);
    assert!(service.is_file_range_loaded(id, "tail.bin", 0, 30).unwrap());
    assert!(!service.is_file_range_loaded(id, "tail.bin", 0, 50).unwrap());

    // Fills reported against the range file land on the source.
    fill(&service, id, "tail.bin", 30, 50);
    assert!(service.is_file_range_loaded(id, "a.bin", 50, 100).unwrap());
    assert!(!service.is_file_range_loaded(id, "a.bin", 0, 50).unwrap());
}

#[test]
fn test_link_across_storages_shares_fill_state() {
    let (service, _fs) = new_service();
    let a = service.create_storage("/data/app/a", None, temporary()).unwrap();
    let b = service.create_storage("/data/app/b", None, temporary()).unwrap();
    service.make_file(a, "shared.bin", 64, b"m").unwrap();
    service.make_directory(b, "lib").unwrap();

    service.make_link(a, "shared.bin", b, "lib/shared.bin").unwrap();
    fill(&service, a, "shared.bin", 0, 64);
    assert!(service.is_file_range_loaded(b, "lib/shared.bin", 0, 64).unwrap());
    assert_eq!(service.get_file_metadata(b, "lib/shared.bin").unwrap(), b"m".to_vec());

    // The content survives the original name.
    service.unlink(a, "shared.bin").unwrap();
    assert!(service.is_file_range_loaded(b, "lib/shared.bin", 0, 64).unwrap());
}

#[test]
fn test_linked_storage_reads_through_base() {
    let (service, _fs) = new_service();
    let base = service.create_storage("/data/app/base", None, temporary()).unwrap();
    service.make_file(base, "base.apk", 100, b"apk").unwrap();

    let linked = service
        .create_linked_storage("/data/app/split", base, temporary())
        .unwrap();
    assert_eq!(service.get_file_metadata(linked, "base.apk").unwrap(), b"apk".to_vec());

    fill(&service, base, "base.apk", 0, 100);
    assert!(service.is_file_range_loaded(linked, "base.apk", 0, 100).unwrap());

    let resolved = service.resolve_file(linked, "base.apk").unwrap();
    assert_eq!(resolved.storage, base);
}

#[test]
fn test_base_with_dependents_cannot_be_deleted() {
    let (service, _fs) = new_service();
    let base = service.create_storage("/data/app/base", None, temporary()).unwrap();
    let linked = service
        .create_linked_storage("/data/app/split", base, temporary())
        .unwrap();

    assert!(matches!(
        service.delete_storage(base),
        Err(IncrementalError::HasDependents(_))
    ));
    service.make_file(base, "still_alive.bin", 1, b"").unwrap();

    service.delete_storage(linked).unwrap();
    service.delete_storage(base).unwrap();
    assert_eq!(service.storage_count(), 0);
}

#[test]
fn test_loader_readiness_scenario() {
    let (service, _fs) = new_service();
    let provider = with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE));

    let id = service
        .create_storage("/data/app/pkg", Some(loader_params()), temporary())
        .unwrap();
    assert_eq!(service.session_state(id), Some(SessionState::Bound));

    assert_eq!(
        service.start_loading(id),
        Err(IncrementalError::DataLoaderNotReady(id))
    );

    let loader = provider.loader(id).unwrap();
    assert!(loader.signal(DataLoaderStatus::Created));
    service.process_pending();

    assert!(service.start_loading(id).unwrap());
    assert!(!service.start_loading(id).unwrap());
    assert_eq!(service.session_state(id), Some(SessionState::Started));
    assert_eq!(loader.calls(), vec![SimLoaderCall::Create, SimLoaderCall::Start]);
}

#[test]
fn test_storage_without_loader_is_not_ready() {
    let (service, _fs) = new_service();
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    assert_eq!(
        service.start_loading(id),
        Err(IncrementalError::DataLoaderNotReady(id))
    );
}

#[test]
fn test_linked_storage_starts_base_loader() {
    let (service, _fs) = new_service();
    with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE).auto_ready());
    let base = service
        .create_storage("/data/app/base", Some(loader_params()), temporary())
        .unwrap();
    let linked = service
        .create_linked_storage("/data/app/split", base, temporary())
        .unwrap();
    service.process_pending();

    service.start_loading(linked).unwrap();
    assert_eq!(service.session_state(base), Some(SessionState::Started));
    assert_eq!(service.session_state(linked), None);
}

#[test]
fn test_loader_validation_consumes_no_id() {
    let (service, _fs) = new_service();
    let before = service.next_storage_id();

    assert!(matches!(
        service.create_storage("/data/app/pkg", Some(loader_params()), temporary()),
        Err(IncrementalError::NotFound(_))
    ));
    assert!(matches!(
        service.create_storage(
            "/data/app/pkg",
            Some(DataLoaderParams::new(DataLoaderKind::Streaming, "")),
            temporary()
        ),
        Err(IncrementalError::InvalidArgument(_))
    ));
    assert_eq!(service.next_storage_id(), before);
    assert_eq!(service.storage_count(), 0);
}

#[test]
fn test_failed_loader_create_rolls_back() {
    let (service, fs) = new_service();
    with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE).failing_create());

    assert!(matches!(
        service.create_storage("/data/app/pkg", Some(loader_params()), temporary()),
        Err(IncrementalError::IoFailure(_))
    ));
    assert_eq!(service.storage_count(), 0);
    assert_eq!(fs.mount_count(), 0);
    assert!(!fs.root_exists(Path::new("/data/incremental/MT_1")));

    // The id was burned.
    assert_eq!(service.next_storage_id(), StorageId::new(2));
}

#[test]
fn test_privileged_loaders_only() {
    let fs = Arc::new(SimIncFs::new());
    let config = IncrementalConfig {
        require_privileged_loaders: true,
        ..IncrementalConfig::default()
    };
    let service = IncrementalService::new(config, fs);
    with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE));

    assert!(matches!(
        service.create_storage("/data/app/pkg", Some(loader_params()), temporary()),
        Err(IncrementalError::PermissionDenied(_))
    ));
    assert_eq!(service.storage_count(), 0);
}

#[test]
fn test_loader_disconnect_reconnects() {
    let (service, _fs) = new_service();
    let provider = with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE).auto_ready());
    let id = service
        .create_storage("/data/app/pkg", Some(loader_params()), temporary())
        .unwrap();
    service.process_pending();

    let first = provider.loader(id).unwrap();
    assert_eq!(first.listener_generation(), Some(1));
    first.signal(DataLoaderStatus::Destroyed);
    service.process_pending();

    let second = provider.loader(id).unwrap();
    assert_eq!(second.listener_generation(), Some(2));
    assert_eq!(service.session_state(id), Some(SessionState::Bound));

    // Reports from the old connection are dropped.
    first.signal(DataLoaderStatus::Unrecoverable);
    service.process_pending();
    assert_eq!(service.session_state(id), Some(SessionState::Bound));
    service.start_loading(id).unwrap();
}

#[test]
fn test_unrecoverable_loader_tears_storage_down() {
    let (service, fs) = new_service();
    let provider = with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE));
    let id = service
        .create_storage("/data/app/pkg", Some(loader_params()), temporary())
        .unwrap();

    provider
        .loader(id)
        .unwrap()
        .signal(DataLoaderStatus::Unrecoverable);
    service.process_pending();

    assert_eq!(service.storage_count(), 0);
    assert_eq!(fs.mount_count(), 0);
    assert!(matches!(
        service.make_file(id, "a.bin", 1, b""),
        Err(IncrementalError::NotFound(_))
    ));
}

#[test]
fn test_invalid_base_stays_until_dependents_go() {
    let (service, _fs) = new_service();
    let base = service.create_storage("/data/app/base", None, temporary()).unwrap();
    let linked = service
        .create_linked_storage("/data/app/split", base, temporary())
        .unwrap();

    assert!(matches!(
        service.on_invalid_storage(base),
        Err(IncrementalError::HasDependents(_))
    ));
    assert_eq!(
        service.make_file(base, "a.bin", 1, b""),
        Err(IncrementalError::Invalidated(base))
    );
    assert_eq!(
        service.create_linked_storage("/data/app/other", base, temporary()),
        Err(IncrementalError::Invalidated(base))
    );

    service.delete_storage(linked).unwrap();
    service.delete_storage(base).unwrap();
    assert_eq!(service.storage_count(), 0);
}

#[test]
fn test_delete_is_best_effort() {
    let fs = Arc::new(FailingIncFs::new(SimIncFs::new(), FailurePolicy::Never));
    let service = IncrementalService::new(IncrementalConfig::default(), fs.clone());
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    service.make_directory(id, "lib").unwrap();
    service
        .make_bind_mount(id, "lib", "/data/app/lib", BindKind::Temporary)
        .unwrap();

    fs.set_policy(FailurePolicy::UnmountOf(vec![PathBuf::from("/data/app/lib")]));
    assert!(matches!(
        service.delete_storage(id),
        Err(IncrementalError::IoFailure(_))
    ));

    // The storage is gone even though one unmount failed.
    assert_eq!(service.storage_count(), 0);
    assert!(fs.inner().mount_source(Path::new("/data/app/pkg")).is_none());
    assert!(service.dump().mounts.is_empty());
}

#[test]
fn test_failed_mount_leaves_no_record() {
    let fs = Arc::new(FailingIncFs::new(
        SimIncFs::new(),
        FailurePolicy::BindOnto(vec![PathBuf::from("/data/app/pkg")]),
    ));
    let service = IncrementalService::new(IncrementalConfig::default(), fs.clone());

    assert!(matches!(
        service.create_storage("/data/app/pkg", None, temporary()),
        Err(IncrementalError::IoFailure(_))
    ));
    assert_eq!(service.storage_count(), 0);
    assert!(service.dump().mounts.is_empty());
    assert!(!fs.root_exists(Path::new("/data/incremental/MT_1")));
}

#[test]
fn test_is_incremental_path() {
    let (service, _fs) = new_service();
    service.create_storage("/data/app/pkg", None, temporary()).unwrap();

    assert!(service.is_incremental_path("/data/app/pkg/base.apk"));
    assert!(service.is_incremental_path("/data/incremental/MT_1"));
    assert!(!service.is_incremental_path("/data/app/other"));
}

#[test]
fn test_permanent_mounts_survive_restart() {
    let state_dir = tempdir().unwrap();
    let fs = Arc::new(SimIncFs::new());
    let config = IncrementalConfig {
        state_dir: Some(state_dir.path().to_path_buf()),
        ..IncrementalConfig::default()
    };

    let id = {
        let service = IncrementalService::new(config.clone(), fs.clone());
        with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE));
        let id = service
            .create_storage(
                "/data/app/pkg",
                Some(loader_params()),
                CreateMode::create_permanent(),
            )
            .unwrap();
        service.make_directory(id, "lib").unwrap();
        service
            .make_bind_mount(id, "lib", "/data/app/pkg-lib", BindKind::Permanent)
            .unwrap();
        service.create_storage("/data/app/tmp", None, temporary()).unwrap();
        service.shutdown();
        id
    };
    assert_eq!(fs.mount_count(), 0);
    assert!(fs.root_exists(Path::new("/data/incremental/MT_1")));
    assert!(!fs.root_exists(Path::new("/data/incremental/MT_2")));

    let service = IncrementalService::new(config, fs.clone());
    with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE));
    assert_eq!(service.on_system_ready().unwrap(), 2);
    assert!(service.is_system_ready());

    assert_eq!(service.open_storage("/data/app/pkg-lib/x.so").unwrap(), id);
    assert_eq!(service.session_state(id), Some(SessionState::Bound));
    assert_eq!(
        fs.mount_source(Path::new("/data/app/pkg")),
        Some(PathBuf::from("/data/incremental/MT_1"))
    );
    assert!(service.open_storage("/data/app/tmp").is_err());

    // Restored ids are never handed out again.
    assert!(service.next_storage_id() > id);

    // Re-applying is a no-op.
    assert_eq!(service.on_system_ready().unwrap(), 0);
}

#[test]
fn test_shutdown_without_persistence_removes_roots() {
    let (service, fs) = new_service();
    let permanent = service
        .create_storage("/data/app/pkg", None, CreateMode::create_permanent())
        .unwrap();
    service
        .create_linked_storage("/data/app/split", permanent, temporary())
        .unwrap();

    service.shutdown();
    assert_eq!(service.storage_count(), 0);
    assert_eq!(fs.mount_count(), 0);
    assert!(!fs.root_exists(Path::new("/data/incremental/MT_1")));
    assert!(!fs.root_exists(Path::new("/data/incremental/MT_2")));
}

#[test]
fn test_restored_files_track_loading() {
    let state_dir = tempdir().unwrap();
    let fs = Arc::new(SimIncFs::new());
    let config = IncrementalConfig {
        state_dir: Some(state_dir.path().to_path_buf()),
        ..IncrementalConfig::default()
    };

    let id = {
        let service = IncrementalService::new(config.clone(), fs.clone());
        let id = service
            .create_storage("/data/app/pkg", None, CreateMode::create_permanent())
            .unwrap();
        service.make_file(id, "a.bin", 100, b"meta").unwrap();
        service
            .make_file_from_range(id, "a_tail.bin", "a.bin", 50, 100)
            .unwrap();

        let tmp = service.create_storage("/data/app/tmp", None, temporary()).unwrap();
        service.make_file(tmp, "shared.bin", 10, b"s").unwrap();
        service.make_link(tmp, "shared.bin", id, "shared.bin").unwrap();
        service.shutdown();
        id
    };

    let service = IncrementalService::new(config, fs.clone());
    service.on_system_ready().unwrap();
    assert_eq!(service.get_file_metadata(id, "a.bin").unwrap(), b"meta".to_vec());
    assert!(!service.is_file_range_loaded(id, "a.bin", 0, 100).unwrap());

    fill(&service, id, "a.bin", 50, 80);
    assert!(service.is_file_range_loaded(id, "a.bin", 50, 80).unwrap());
    // The range file still reads through its source.
    assert!(service.is_file_range_loaded(id, "a_tail.bin", 0, 30).unwrap());
    assert!(!service.is_file_range_loaded(id, "a_tail.bin", 0, 31).unwrap());

    // The link outlived its temporary source and now owns its content.
    assert!(!service.is_file_range_loaded(id, "shared.bin", 0, 10).unwrap());
    fill(&service, id, "shared.bin", 0, 10);
    assert!(service.is_file_range_loaded(id, "shared.bin", 0, 10).unwrap());
}

#[test]
fn test_corrupt_state_is_ignored() {
    let state_dir = tempdir().unwrap();
    std::fs::write(state_dir.path().join("incremental_state.json"), "{ not json").unwrap();

    let config = IncrementalConfig {
        state_dir: Some(state_dir.path().to_path_buf()),
        ..IncrementalConfig::default()
    };
    let service = IncrementalService::new(config, Arc::new(SimIncFs::new()));
    assert_eq!(service.on_system_ready().unwrap(), 0);
    assert_eq!(service.storage_count(), 0);
}

#[test]
fn test_dispatcher_thread_applies_fills() {
    let (service, _fs) = new_service();
    let service = Arc::new(service);
    let id = service.create_storage("/data/app/pkg", None, temporary()).unwrap();
    service.make_file(id, "a.bin", 10, b"m").unwrap();
    let file = service.resolve_file(id, "a.bin").unwrap();

    let dispatcher = service.spawn_dispatcher().unwrap();
    assert!(service.spawn_dispatcher().is_err());
    assert_eq!(service.process_pending(), 0);

    let notifier = service.notifier();
    notifier
        .send(Notification::RangeFilled {
            storage: id,
            file: file.file,
            range: ByteRange::new(0, 10),
        })
        .unwrap();
    notifier.send(Notification::Shutdown).unwrap();
    dispatcher.join().unwrap();

    assert!(service.is_file_range_loaded(id, "a.bin", 0, 10).unwrap());
}

#[test]
fn test_concurrent_storages() {
    let (service, _fs) = new_service();
    let service = Arc::new(service);

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let service = service.clone();
            thread::spawn(move || {
                let id = service
                    .create_storage(&format!("/data/app/pkg{}", worker), None, temporary())
                    .unwrap();
                service.make_directories(id, "lib/arm64").unwrap();
                for index in 0..10 {
                    service
                        .make_file(id, &format!("lib/arm64/{}.so", index), 100, b"m")
                        .unwrap();
                }
                id
            })
        })
        .collect();

    let mut ids: Vec<StorageId> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(service.storage_count(), 8);
}

#[test]
fn test_dump_lists_everything() {
    let (service, _fs) = new_service();
    with_provider(&service, SimLoaderProvider::new(LOADER_PACKAGE).auto_ready());
    let id = service
        .create_storage("/data/app/pkg", Some(loader_params()), temporary())
        .unwrap();
    service.make_file(id, "a.bin", 100, b"m").unwrap();
    fill(&service, id, "a.bin", 0, 40);

    let dump = service.dump();
    assert_eq!(dump.storages.len(), 1);
    assert_eq!(dump.mounts.len(), 1);
    assert_eq!(dump.sessions.len(), 1);
    assert!(dump.sessions[0].ready);
    let progress = dump.storages[0].progress.as_ref().unwrap();
    assert_eq!(progress.total_bytes, 100);
    assert_eq!(progress.filled_bytes, 40);

    let text = dump.to_string();
    assert!(text.contains("/data/app/pkg"));
    let json = dump.to_json().unwrap();
    assert!(json.contains("\"system_ready\": false"));
}

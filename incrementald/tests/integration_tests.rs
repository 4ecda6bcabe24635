//! Integration tests for the incrementald daemon

use incrementald::{Daemon, DaemonConfig, RunSummary};
use services_incremental::IncrementalConfig;
use tempfile::tempdir;

fn run(config: DaemonConfig) -> (RunSummary, String) {
    let mut daemon = Daemon::new(config).unwrap();
    let mut out = Vec::new();
    let summary = daemon.run(&mut out).unwrap();
    (summary, String::from_utf8(out).unwrap())
}

#[test]
fn test_install_script() {
    let script = r#"
        # lay out an app before its content arrives
        create /data/app/pkg loader com.example.loader
        mkdirs 1 lib/arm64
        mkdir 1 assets
        mkfile 1 assets/a.bin 100 meta
        mkrange 1 assets/a_head.bin assets/a.bin 0 50
        mkrange 1 assets/a_bad.bin assets/a.bin 60 50
        start 1
        fill 1 assets/a.bin 0 10
        fill 1 assets/a.bin 10 20
        loaded 1 assets/a.bin 0 20
        loaded 1 assets/a_head.bin 0 20
        meta 1 assets/a_head.bin
    "#;

    let (summary, output) = run(DaemonConfig {
        script: Some(script.to_string()),
        ..DaemonConfig::default()
    });

    assert_eq!(summary.executed, 12);
    assert_eq!(summary.failed, 1);
    assert!(output.contains("created Storage(1) at /data/app/pkg"));
    assert!(output.contains("Invalid range: [60, 50) for size 100 (status -34)"));
    assert!(output.contains("started Storage(1)"));
    assert!(output.contains("Storage(1):assets/a.bin [0, 20) loaded=true"));
    assert!(output.contains("Storage(1):assets/a_head.bin [0, 20) loaded=true"));
    assert!(output.contains("metadata=meta"));
    assert!(output.contains("Incremental service dump:"));
}

#[test]
fn test_bind_conflict_script() {
    let script = r#"
        create /data/app/pkg
        mkdir 1 lib
        bind 1 lib /data/app/lib
        bind 1 . /data/app/lib
        unbind 1 /data/app/lib
        bind 1 . /data/app/lib
        delete 1
        bind 1 lib /data/app/lib
    "#;

    let (summary, output) = run(DaemonConfig {
        script: Some(script.to_string()),
        ..DaemonConfig::default()
    });

    assert_eq!(summary.failed, 2);
    assert!(output.contains("(status -16)"));
    assert!(output.contains("deleted Storage(1)"));
    assert!(output.contains("storages (0)"));
}

#[test]
fn test_json_dump_with_persistence() {
    let state_dir = tempdir().unwrap();
    let script = r#"
        create /data/app/pkg permanent
        ready
    "#;

    let (summary, output) = run(DaemonConfig {
        service: IncrementalConfig {
            state_dir: Some(state_dir.path().to_path_buf()),
            ..IncrementalConfig::default()
        },
        script: Some(script.to_string()),
        json: true,
    });

    assert_eq!(summary.failed, 0);
    assert!(output.contains("\"system_ready\": true"));
    assert!(state_dir.path().join("incremental_state.json").exists());
}

#[test]
fn test_bad_script_is_rejected_up_front() {
    let mut daemon = Daemon::new(DaemonConfig {
        script: Some("create /data/app/pkg\nexplode 1".to_string()),
        ..DaemonConfig::default()
    })
    .unwrap();
    let mut out = Vec::new();

    assert!(daemon.run(&mut out).is_err());
    assert_eq!(daemon.service().storage_count(), 0);
}

//! # Daemon Runtime
//!
//! Hosts an [`IncrementalService`] over the in-memory driver and simulated
//! loaders, and executes script commands against it.

use crate::commands::{parse_script, CommandError, ScriptCommand};
use core_types::{CreateMode, DataLoaderKind, DataLoaderParams};
use incfs::SimIncFs;
use loading_status::ByteRange;
use services_dataloader::SimLoaderProvider;
use services_incremental::{IncrementalConfig, IncrementalError, IncrementalService, Notification};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Script error: {0}")]
    Script(#[from] CommandError),

    #[error("Service error: {0}")]
    Service(#[from] IncrementalError),

    #[error("Output error: {0}")]
    Output(String),
}

/// Daemon configuration
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    pub service: IncrementalConfig,
    /// Script text to execute
    pub script: Option<String>,
    /// Print the final dump as JSON
    pub json: bool,
}

/// How a script run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub executed: usize,
    pub failed: usize,
}

pub struct Daemon {
    config: DaemonConfig,
    fs: Arc<SimIncFs>,
    service: IncrementalService,
    packages: HashSet<String>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        config
            .service
            .validate()
            .map_err(|err| IncrementalError::InvalidArgument(err.to_string()))?;
        let fs = Arc::new(SimIncFs::new());
        let service = IncrementalService::new(config.service.clone(), fs.clone());
        Ok(Self {
            config,
            fs,
            service,
            packages: HashSet::new(),
        })
    }

    pub fn service(&self) -> &IncrementalService {
        &self.service
    }

    pub fn fs(&self) -> &SimIncFs {
        &self.fs
    }

    /// Runs the configured script, then prints the final dump
    pub fn run(&mut self, out: &mut impl Write) -> Result<RunSummary, DaemonError> {
        let summary = match self.config.script.clone() {
            Some(script) => self.run_script(&script, out)?,
            None => RunSummary::default(),
        };

        let dump = self.service.dump();
        let text = if self.config.json {
            dump.to_json()
                .map_err(|err| DaemonError::Output(err.to_string()))?
        } else {
            dump.to_string()
        };
        writeln!(out, "{}", text).map_err(|err| DaemonError::Output(err.to_string()))?;

        self.service.shutdown();
        info!(
            executed = summary.executed,
            failed = summary.failed,
            "script finished"
        );
        Ok(summary)
    }

    /// Executes every command of a script
    ///
    /// The script is parsed up front; a failing command is reported and the
    /// run continues.
    pub fn run_script(&mut self, script: &str, out: &mut impl Write) -> Result<RunSummary, DaemonError> {
        let commands = parse_script(script)?;
        let mut summary = RunSummary::default();

        for command in commands {
            summary.executed += 1;
            let line = match self.execute(&command) {
                Ok(line) => line,
                Err(err) => {
                    warn!(?command, error = %err, "command failed");
                    summary.failed += 1;
                    format!("error: {} (status {})", err, err.status())
                }
            };
            writeln!(out, "{}", line).map_err(|err| DaemonError::Output(err.to_string()))?;
            self.service.process_pending();
        }
        Ok(summary)
    }

    /// Executes one command and describes its result
    pub fn execute(&mut self, command: &ScriptCommand) -> Result<String, IncrementalError> {
        debug!(?command, "executing");
        let service = &self.service;
        match command {
            ScriptCommand::Create {
                target,
                bind,
                loader,
            } => {
                let mode = CreateMode {
                    bind: *bind,
                    ..CreateMode::default()
                };
                let params = match loader {
                    Some(package) => {
                        self.ensure_provider(package)?;
                        Some(DataLoaderParams::new(DataLoaderKind::Streaming, package.clone()))
                    }
                    None => None,
                };
                let id = self.service.create_storage(target, params, mode)?;
                Ok(format!("created {} at {}", id, target))
            }
            ScriptCommand::CreateLinked { target, base } => {
                let id = service.create_linked_storage(target, *base, CreateMode::default())?;
                Ok(format!("created {} at {} on {}", id, target, base))
            }
            ScriptCommand::Open { path } => {
                let id = service.open_storage(path)?;
                Ok(format!("{} serves {}", id, path))
            }
            ScriptCommand::MakeDirectory { storage, path } => {
                service.make_directory(*storage, path)?;
                Ok(format!("mkdir {}:{}", storage, path))
            }
            ScriptCommand::MakeDirectories { storage, path } => {
                service.make_directories(*storage, path)?;
                Ok(format!("mkdirs {}:{}", storage, path))
            }
            ScriptCommand::MakeFile {
                storage,
                path,
                size,
                metadata,
            } => {
                let file = service.make_file(*storage, path, *size, metadata.as_bytes())?;
                Ok(format!("mkfile {}:{} {} ({} bytes)", storage, path, file, size))
            }
            ScriptCommand::MakeFileFromRange {
                storage,
                path,
                source,
                start,
                end,
            } => {
                let file = service.make_file_from_range(*storage, path, source, *start, *end)?;
                Ok(format!(
                    "mkrange {}:{} {} from {} [{}, {})",
                    storage, path, file, source, start, end
                ))
            }
            ScriptCommand::HardLink {
                source,
                source_path,
                dest,
                dest_path,
            } => {
                service.make_link(*source, source_path, *dest, dest_path)?;
                Ok(format!(
                    "ln {}:{} -> {}:{}",
                    source, source_path, dest, dest_path
                ))
            }
            ScriptCommand::Unlink { storage, path } => {
                service.unlink(*storage, path)?;
                Ok(format!("rm {}:{}", storage, path))
            }
            ScriptCommand::Bind {
                storage,
                path,
                target,
                kind,
            } => {
                let mount = service.make_bind_mount(*storage, path, target, *kind)?;
                Ok(format!("bound {}:{} at {} as {} ({})", storage, path, target, mount, kind))
            }
            ScriptCommand::Unbind { storage, target } => {
                service.delete_bind_mount(*storage, target)?;
                Ok(format!("unbound {}", target))
            }
            ScriptCommand::Fill {
                storage,
                path,
                start,
                end,
            } => {
                let file = service.resolve_file(*storage, path)?;
                let notification = Notification::RangeFilled {
                    storage: file.storage,
                    file: file.file,
                    range: ByteRange::new(*start, *end),
                };
                service.handle_notification(notification)?;
                Ok(format!("filled {}:{} [{}, {})", storage, path, start, end))
            }
            ScriptCommand::Loaded {
                storage,
                path,
                start,
                end,
            } => {
                let loaded = service.is_file_range_loaded(*storage, path, *start, *end)?;
                Ok(format!("{}:{} [{}, {}) loaded={}", storage, path, start, end, loaded))
            }
            ScriptCommand::Metadata { storage, path } => {
                let metadata = service.get_file_metadata(*storage, path)?;
                Ok(format!(
                    "{}:{} metadata={}",
                    storage,
                    path,
                    String::from_utf8_lossy(&metadata)
                ))
            }
            ScriptCommand::Start { storage } => {
                if service.start_loading(*storage)? {
                    Ok(format!("started {}", storage))
                } else {
                    Ok(format!("{} already streaming", storage))
                }
            }
            ScriptCommand::Invalidate { storage } => {
                service.on_invalid_storage(*storage)?;
                Ok(format!("invalidated {}", storage))
            }
            ScriptCommand::Delete { storage } => {
                service.delete_storage(*storage)?;
                Ok(format!("deleted {}", storage))
            }
            ScriptCommand::SystemReady => {
                let applied = service.on_system_ready()?;
                Ok(format!("system ready, {} mounts re-applied", applied))
            }
            ScriptCommand::Dump { json } => {
                let dump = service.dump();
                if *json {
                    dump.to_json()
                        .map_err(|err| IncrementalError::IoFailure(err.to_string()))
                } else {
                    Ok(dump.to_string())
                }
            }
        }
    }

    /// Registers an auto-ready simulated loader for `package` on first use
    fn ensure_provider(&mut self, package: &str) -> Result<(), IncrementalError> {
        if package.is_empty() || self.packages.contains(package) {
            return Ok(());
        }
        self.service
            .register_loader_provider(Arc::new(SimLoaderProvider::new(package).auto_ready()))?;
        self.packages.insert(package.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daemon() -> Daemon {
        Daemon::new(DaemonConfig::default()).unwrap()
    }

    #[test]
    fn test_execute_create_and_query() {
        let mut daemon = daemon();
        let line = daemon
            .execute(&ScriptCommand::Create {
                target: "/data/app/pkg".to_string(),
                bind: core_types::BindKind::Temporary,
                loader: None,
            })
            .unwrap();
        assert_eq!(line, "created Storage(1) at /data/app/pkg");
        assert_eq!(daemon.service().storage_count(), 1);
    }

    #[test]
    fn test_loader_provider_registered_once() {
        let mut daemon = daemon();
        for target in ["/data/app/a", "/data/app/b"] {
            daemon
                .execute(&ScriptCommand::Create {
                    target: target.to_string(),
                    bind: core_types::BindKind::Temporary,
                    loader: Some("com.example".to_string()),
                })
                .unwrap();
        }
        assert_eq!(daemon.service().dump().sessions.len(), 2);
    }

    #[test]
    fn test_run_script_continues_after_failure() {
        let mut daemon = daemon();
        let mut out = Vec::new();
        let summary = daemon
            .run_script("create /data/app/pkg\nrm 1 missing.bin\nmkdir 1 assets", &mut out)
            .unwrap();

        assert_eq!(summary, RunSummary { executed: 3, failed: 1 });
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("error: Not found"));
        assert!(text.contains("(status -2)"));
    }

    #[test]
    fn test_invalid_mount_root_is_rejected() {
        let config = DaemonConfig {
            service: IncrementalConfig {
                mount_root: "relative".into(),
                ..IncrementalConfig::default()
            },
            ..DaemonConfig::default()
        };
        assert!(matches!(
            Daemon::new(config),
            Err(DaemonError::Service(IncrementalError::InvalidArgument(_)))
        ));
    }
}

//! Diagnostic dump

use loading_status::LoadingProgress;
use serde::Serialize;
use services_bind_mounts::BindMount;
use services_dataloader::SessionInfo;
use services_registry::StorageSummary;
use std::fmt;

/// One storage in a dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageEntry {
    #[serde(flatten)]
    pub summary: StorageSummary,
    pub progress: Option<LoadingProgress>,
}

/// Point-in-time view of the whole service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSnapshot {
    pub system_ready: bool,
    pub storages: Vec<StorageEntry>,
    pub mounts: Vec<BindMount>,
    pub sessions: Vec<SessionInfo>,
}

impl ServiceSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ServiceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Incremental service dump:")?;
        writeln!(f, "  system ready: {}", self.system_ready)?;

        writeln!(f, "  storages ({}):", self.storages.len())?;
        for entry in &self.storages {
            let storage = &entry.summary;
            write!(
                f,
                "    {} {} root={} mounts={}",
                storage.id,
                storage.kind,
                storage.root.display(),
                storage.mounts
            )?;
            if let Some(base) = storage.base {
                write!(f, " base={}", base)?;
            }
            if !storage.children.is_empty() {
                let children: Vec<String> =
                    storage.children.iter().map(|id| id.to_string()).collect();
                write!(f, " children=[{}]", children.join(", "))?;
            }
            if storage.invalidated {
                write!(f, " INVALIDATED")?;
            }
            if let Some(progress) = &entry.progress {
                write!(
                    f,
                    " files={} filled={}/{}",
                    progress.files, progress.filled_bytes, progress.total_bytes
                )?;
            }
            writeln!(f)?;
        }

        writeln!(f, "  mounts ({}):", self.mounts.len())?;
        for mount in &self.mounts {
            let path = if mount.path.is_empty() { "." } else { mount.path.as_str() };
            writeln!(
                f,
                "    {} {}:{} -> {} ({})",
                mount.id,
                mount.storage,
                path,
                mount.target.display(),
                mount.kind
            )?;
        }

        writeln!(f, "  loader sessions ({}):", self.sessions.len())?;
        for session in &self.sessions {
            write!(
                f,
                "    {} {} state={} generation={} ready={}",
                session.storage, session.package, session.state, session.generation, session.ready
            )?;
            if let Some(status) = session.last_status {
                write!(f, " last_status={}", status)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

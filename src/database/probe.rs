//! Read-only snapshot of system health for display

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs as tokio_fs;
use tracing::{debug, warn};

use crate::config::MaintenancePaths;
use crate::database::Result;
use crate::database::catalog::BackupCatalog;
use crate::db::DatabaseLifecycle;

/// Fast consistency probe, distinct from the full integrity check
pub const QUICK_CHECK_COMMAND: &str = "PRAGMA quick_check";

/// File name suffixes of stale artifacts that are safe to reclaim
const STALE_SUFFIXES: &[&str] = &[".tmp", ".bak", "-wal", "-shm", "-journal"];

/// File name markers of pre-restore safety copies
const STALE_MARKERS: &[&str] = &["_pre_restore_", ".pre-restore."];

/// Result of the fast consistency probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum DatabaseHealth {
    Ok,
    Warning(String),
    Unknown,
}

/// Point-in-time view of the system
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStateSnapshot {
    /// Primary file plus write-ahead log
    pub database_size_bytes: u64,
    pub database_health: DatabaseHealth,
    pub backup_count: usize,
    pub most_recent_backup_id: Option<String>,
    pub reclaimable_bytes: u64,
}

/// Whether a file name looks like a stale temporary or safety artifact
pub fn is_stale_artifact(name: &str) -> bool {
    STALE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        || STALE_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Produces `SystemStateSnapshot`s; never fails, degraded parts are reported as such
pub struct StateProbe {
    paths: MaintenancePaths,
    lifecycle: Arc<dyn DatabaseLifecycle>,
    catalog: BackupCatalog,
}

impl StateProbe {
    pub fn new(
        paths: MaintenancePaths,
        lifecycle: Arc<dyn DatabaseLifecycle>,
        catalog: BackupCatalog,
    ) -> Self {
        Self {
            paths,
            lifecycle,
            catalog,
        }
    }

    pub async fn snapshot(&self) -> SystemStateSnapshot {
        let database_size_bytes = file_size(&self.paths.database_file).await
            + file_size(&self.paths.wal_file()).await;

        let database_health = self.health().await;

        let (backup_count, most_recent_backup_id) = match self.catalog.list().await {
            Ok(bundles) => (bundles.len(), bundles.first().map(|b| b.id.clone())),
            Err(e) => {
                warn!(error = %e, "failed to list backups for snapshot");
                (0, None)
            }
        };

        let reclaimable_bytes = match reclaimable_bytes(&self.paths.database_dir()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to scan for reclaimable files");
                0
            }
        };

        SystemStateSnapshot {
            database_size_bytes,
            database_health,
            backup_count,
            most_recent_backup_id,
            reclaimable_bytes,
        }
    }

    async fn health(&self) -> DatabaseHealth {
        let pool = match self.lifecycle.connection().await {
            Ok(pool) => pool,
            Err(e) => {
                debug!(error = %e, "database unavailable for health check");
                return DatabaseHealth::Unknown;
            }
        };

        match sqlx::query_scalar::<_, String>(QUICK_CHECK_COMMAND)
            .fetch_all(&pool)
            .await
        {
            Ok(lines) if lines.len() == 1 && lines[0].eq_ignore_ascii_case("ok") => {
                DatabaseHealth::Ok
            }
            Ok(lines) if lines.is_empty() => {
                DatabaseHealth::Warning("quick check returned no result".to_string())
            }
            Ok(lines) => DatabaseHealth::Warning(lines.join("; ")),
            Err(e) => {
                warn!(error = %e, "quick check could not run");
                DatabaseHealth::Unknown
            }
        }
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio_fs::metadata(path)
        .await
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Sum of stale artifact sizes directly inside `dir`
async fn reclaimable_bytes(dir: &Path) -> Result<u64> {
    if !tokio_fs::try_exists(dir).await? {
        return Ok(0);
    }

    let mut total = 0;
    let mut entries = tokio_fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() && is_stale_artifact(&entry.file_name().to_string_lossy()) {
            total += metadata.len();
        }
    }
    Ok(total)
}

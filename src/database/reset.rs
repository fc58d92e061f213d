//! Irreversible full-system wipe
//!
//! Clears every mutable table except the credential table, then removes
//! generated files, bundles, drafts, signatures, logs, exports, the
//! maintenance report and the secondary configuration. The master key and
//! the admin credential are never touched. Steps are best-effort and there is
//! no rollback; callers restart the process afterwards.

use serde::Serialize;
use sqlx::Connection;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::fs as tokio_fs;
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::database::Result;
use crate::database::maintenance::{MaintenanceOperation, MaintenanceOperationRunner};
use crate::database::step::StepReport;
use crate::database::{DatabaseError, artifacts};
use crate::db::DatabaseLifecycle;

/// Outcome of a system reset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResetResult {
    pub succeeded: bool,
    pub summary: String,
    pub cleared_tables: Vec<String>,
    pub removed_entries: u64,
    pub warnings: Vec<String>,
}

/// Wipes all mutable state
pub struct SystemResetter {
    config: MaintenanceConfig,
    lifecycle: Arc<dyn DatabaseLifecycle>,
    runner: MaintenanceOperationRunner,
}

impl SystemResetter {
    pub fn new(config: MaintenanceConfig, lifecycle: Arc<dyn DatabaseLifecycle>) -> Self {
        let runner = MaintenanceOperationRunner::new(lifecycle.clone());
        Self {
            config,
            lifecycle,
            runner,
        }
    }

    /// Run the full reset; the confirmation gate is assumed to have passed
    pub async fn reset_system(&self) -> ResetResult {
        let paths = &self.config.paths;
        let mut report = StepReport::new();
        let mut removed_entries = 0;

        warn!("Starting full system reset");

        let cleared_tables = report
            .best_effort("clear tables", self.clear_tables().await)
            .unwrap_or_default();

        let compact = self
            .runner
            .run_operation(MaintenanceOperation::CompactAndReclaim)
            .await;
        if !compact.succeeded {
            report.best_effort::<()>(
                "compact after clearing tables",
                Err(DatabaseError::Sqlite(compact.message)),
            );
        }

        removed_entries += report
            .best_effort("generated documents", remove_files(&paths.documents_dir).await)
            .unwrap_or(0);

        for (step, dir) in [
            ("backups", &paths.backups_dir),
            ("signatures", &paths.signatures_dir),
            ("drafts", &paths.drafts_dir),
            ("logs", &paths.logs_dir),
            ("exports", &paths.exports_dir),
        ] {
            removed_entries += report.best_effort(step, clear_directory(dir).await).unwrap_or(0);
        }

        for (step, file) in [
            ("maintenance report", paths.report_file.clone()),
            ("maintenance report companion", paths.report_companion_file()),
            ("secondary configuration", paths.secondary_config_file.clone()),
        ] {
            removed_entries += report.best_effort(step, remove_if_exists(&file).await).unwrap_or(0);
        }

        let warnings = report.warnings();
        let succeeded = warnings.is_empty();
        let summary = if succeeded {
            format!(
                "System reset completed: {} tables cleared, {} entries removed. Restart the application.",
                cleared_tables.len(),
                removed_entries
            )
        } else {
            format!(
                "System reset finished with {} failed steps: {} tables cleared, {} entries removed. Restart the application.",
                warnings.len(),
                cleared_tables.len(),
                removed_entries
            )
        };

        warn!(
            tables = cleared_tables.len(),
            removed_entries,
            failed_steps = warnings.len(),
            "Full system reset finished"
        );

        ResetResult {
            succeeded,
            summary,
            cleared_tables,
            removed_entries,
            warnings,
        }
    }

    /// Delete every row of the configured tables, skipping the credential table
    async fn clear_tables(&self) -> Result<Vec<String>> {
        let pool = self.lifecycle.connection().await?;
        let mut conn = pool.acquire().await?;

        let existing: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(&mut *conn)
                .await?;

        // Deletion order must not trip over references between the cleared tables
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await?;

        let outcome = async {
            let mut tx = conn.begin().await?;
            let mut cleared = Vec::new();
            for table in &self.config.reset_tables {
                if table.eq_ignore_ascii_case(&self.config.credential_table) {
                    warn!(table = %table, "credential table listed for reset, preserving it");
                    continue;
                }
                if !existing.iter().any(|name| name.eq_ignore_ascii_case(table)) {
                    debug!(table = %table, "table not present, skipping");
                    continue;
                }
                let deleted = sqlx::query(&format!("DELETE FROM {}", quote_identifier(table)))
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                info!(table = %table, rows = deleted, "table cleared");
                cleared.push(table.clone());
            }
            tx.commit().await?;
            Ok::<_, DatabaseError>(cleared)
        }
        .await;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await?;

        outcome
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Remove the regular files directly inside `dir`; returns the number removed
async fn remove_files(dir: &Path) -> Result<u64> {
    if !tokio_fs::try_exists(dir).await? {
        return Ok(0);
    }

    let mut removed = 0;
    for file in artifacts::list_files(dir).await? {
        tokio_fs::remove_file(&file).await?;
        removed += 1;
    }
    Ok(removed)
}

/// Remove everything inside `dir`, keeping the directory itself
async fn clear_directory(dir: &Path) -> Result<u64> {
    if !tokio_fs::try_exists(dir).await? {
        return Ok(0);
    }

    let mut removed = 0;
    let mut entries = tokio_fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio_fs::remove_dir_all(&path).await?;
        } else {
            tokio_fs::remove_file(&path).await?;
        }
        removed += 1;
    }
    Ok(removed)
}

async fn remove_if_exists(file: &Path) -> Result<u64> {
    match tokio_fs::remove_file(file).await {
        Ok(()) => Ok(1),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

//! Engine-level maintenance commands
//!
//! Every command runs against the live pool and is reported as a
//! `MaintenanceOperationResult`; engine failures never escape as errors.

use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::database::Result;
use crate::db::DatabaseLifecycle;

/// Catalog of maintenance operations, in batch execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceOperation {
    CompactAndReclaim,
    RefreshQueryStatistics,
    OptimizeIndexes,
    RebuildIndexes,
    CheckpointPendingWrites,
    VerifyDataIntegrity,
}

impl MaintenanceOperation {
    pub const CATALOG: [MaintenanceOperation; 6] = [
        MaintenanceOperation::CompactAndReclaim,
        MaintenanceOperation::RefreshQueryStatistics,
        MaintenanceOperation::OptimizeIndexes,
        MaintenanceOperation::RebuildIndexes,
        MaintenanceOperation::CheckpointPendingWrites,
        MaintenanceOperation::VerifyDataIntegrity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MaintenanceOperation::CompactAndReclaim => "compact-and-reclaim",
            MaintenanceOperation::RefreshQueryStatistics => "refresh-query-statistics",
            MaintenanceOperation::OptimizeIndexes => "optimize-indexes",
            MaintenanceOperation::RebuildIndexes => "rebuild-indexes",
            MaintenanceOperation::CheckpointPendingWrites => "checkpoint-pending-writes",
            MaintenanceOperation::VerifyDataIntegrity => "verify-data-integrity",
        }
    }

    /// Underlying SQLite command
    pub fn command(&self) -> &'static str {
        match self {
            MaintenanceOperation::CompactAndReclaim => "VACUUM",
            MaintenanceOperation::RefreshQueryStatistics => "ANALYZE",
            MaintenanceOperation::OptimizeIndexes => "PRAGMA optimize",
            MaintenanceOperation::RebuildIndexes => "REINDEX",
            MaintenanceOperation::CheckpointPendingWrites => "PRAGMA wal_checkpoint(TRUNCATE)",
            MaintenanceOperation::VerifyDataIntegrity => "PRAGMA integrity_check",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::CATALOG.into_iter().find(|op| op.name() == name)
    }
}

/// Outcome of one maintenance command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceOperationResult {
    pub name: String,
    pub command: String,
    pub succeeded: bool,
    pub message: String,
    pub duration_millis: u64,
}

/// Outcome of running the whole catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaintenanceBatchResult {
    pub results: Vec<MaintenanceOperationResult>,
    pub succeeded: usize,
    pub failed: usize,
}

impl MaintenanceBatchResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Executes maintenance commands against the live database
#[derive(Clone)]
pub struct MaintenanceOperationRunner {
    lifecycle: Arc<dyn DatabaseLifecycle>,
}

impl MaintenanceOperationRunner {
    pub fn new(lifecycle: Arc<dyn DatabaseLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Run a catalog operation
    pub async fn run_operation(&self, operation: MaintenanceOperation) -> MaintenanceOperationResult {
        self.run(operation.name(), operation.command()).await
    }

    /// Run an arbitrary named command; failures are reported, never returned as errors
    pub async fn run(&self, name: &str, command: &str) -> MaintenanceOperationResult {
        let start = Instant::now();
        let outcome = self.execute(command).await;
        let duration_millis = start.elapsed().as_millis() as u64;

        let (succeeded, message) = match outcome {
            Ok(report) if is_consistency_check(command) => {
                let clean = report.len() == 1 && report[0].eq_ignore_ascii_case("ok");
                let message = if report.is_empty() {
                    "no result returned".to_string()
                } else {
                    report.join("; ")
                };
                (clean, message)
            }
            Ok(report) if is_checkpoint(command) => {
                let rendered = report.join("; ");
                if checkpoint_completed(&report) {
                    (true, rendered)
                } else {
                    (false, format!("database busy, checkpoint incomplete ({})", rendered))
                }
            }
            Ok(report) if report.is_empty() => (true, "completed".to_string()),
            Ok(report) => (true, report.join("; ")),
            Err(e) => (false, e.to_string()),
        };

        if succeeded {
            info!(operation = name, duration_millis, "maintenance operation completed");
        } else {
            warn!(operation = name, duration_millis, %message, "maintenance operation failed");
        }

        MaintenanceOperationResult {
            name: name.to_string(),
            command: command.to_string(),
            succeeded,
            message,
            duration_millis,
        }
    }

    /// Run the full catalog in order; one failure does not stop the rest
    pub async fn run_all(&self) -> MaintenanceBatchResult {
        let mut results = Vec::with_capacity(MaintenanceOperation::CATALOG.len());
        for operation in MaintenanceOperation::CATALOG {
            results.push(self.run_operation(operation).await);
        }

        let succeeded = results.iter().filter(|r| r.succeeded).count();
        MaintenanceBatchResult {
            failed: results.len() - succeeded,
            succeeded,
            results,
        }
    }

    async fn execute(&self, command: &str) -> Result<Vec<String>> {
        let pool = self.lifecycle.connection().await?;
        let rows = sqlx::query(command).fetch_all(&pool).await?;
        Ok(rows.iter().map(render_row).collect())
    }
}

fn is_consistency_check(command: &str) -> bool {
    let command = command.to_ascii_lowercase();
    command.contains("integrity_check") || command.contains("quick_check")
}

fn is_checkpoint(command: &str) -> bool {
    command.to_ascii_lowercase().contains("wal_checkpoint")
}

/// A checkpoint row renders as `busy|log|checkpointed`
fn checkpoint_completed(report: &[String]) -> bool {
    report
        .first()
        .and_then(|row| row.split('|').next())
        .is_some_and(|busy| busy == "0")
}

fn render_row(row: &SqliteRow) -> String {
    (0..row.len())
        .map(|i| {
            row.try_get::<String, _>(i)
                .or_else(|_| row.try_get::<i64, _>(i).map(|v| v.to_string()))
                .unwrap_or_else(|_| "?".to_string())
        })
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteLifecycle;
    use tempfile::tempdir;

    async fn setup_lifecycle(dir: &std::path::Path) -> Result<Arc<SqliteLifecycle>> {
        let lifecycle = SqliteLifecycle::open(dir.join("inventario.db")).await?;
        let pool = lifecycle.connection().await?;
        sqlx::query("CREATE TABLE equipos (id INTEGER PRIMARY KEY, nombre TEXT)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX idx_equipos_nombre ON equipos (nombre)")
            .execute(&pool)
            .await?;
        sqlx::query("INSERT INTO equipos (nombre) VALUES ('taladro'), ('sierra'), ('prensa')")
            .execute(&pool)
            .await?;
        Ok(Arc::new(lifecycle))
    }

    #[test]
    fn test_catalog_order_and_commands() {
        let names: Vec<_> = MaintenanceOperation::CATALOG.iter().map(|op| op.name()).collect();
        assert_eq!(
            names,
            vec![
                "compact-and-reclaim",
                "refresh-query-statistics",
                "optimize-indexes",
                "rebuild-indexes",
                "checkpoint-pending-writes",
                "verify-data-integrity",
            ]
        );
        assert_eq!(MaintenanceOperation::CompactAndReclaim.command(), "VACUUM");
        assert_eq!(
            MaintenanceOperation::from_name("rebuild-indexes"),
            Some(MaintenanceOperation::RebuildIndexes)
        );
        assert_eq!(MaintenanceOperation::from_name("defrag"), None);
    }

    #[test]
    fn test_busy_checkpoint_is_not_a_success() {
        assert!(checkpoint_completed(&["0|3|3".to_string()]));
        assert!(!checkpoint_completed(&["1|3|0".to_string()]));
        assert!(!checkpoint_completed(&[]));
        assert!(is_checkpoint(MaintenanceOperation::CheckpointPendingWrites.command()));
        assert!(!is_checkpoint(MaintenanceOperation::CompactAndReclaim.command()));
    }

    #[tokio::test]
    async fn test_run_all_against_live_database() -> Result<()> {
        let temp_dir = tempdir()?;
        let lifecycle = setup_lifecycle(temp_dir.path()).await?;
        let runner = MaintenanceOperationRunner::new(lifecycle);

        let batch = runner.run_all().await;

        assert_eq!(batch.results.len(), 6);
        assert!(batch.all_succeeded(), "{:?}", batch.results);
        assert_eq!(batch.succeeded, 6);
        let integrity = batch.results.last().unwrap();
        assert_eq!(integrity.name, "verify-data-integrity");
        assert_eq!(integrity.message, "ok");
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_are_captured_not_raised() -> Result<()> {
        let temp_dir = tempdir()?;
        let lifecycle = setup_lifecycle(temp_dir.path()).await?;
        let runner = MaintenanceOperationRunner::new(lifecycle.clone());

        let result = runner.run("bogus", "REINDEX no_such_index").await;
        assert!(!result.succeeded);
        assert_eq!(result.command, "REINDEX no_such_index");
        assert!(!result.message.is_empty());

        // A closed database fails every operation independently
        lifecycle.shutdown().await;
        let batch = runner.run_all().await;
        assert_eq!(batch.results.len(), 6);
        assert_eq!(batch.failed, 6);
        assert!(batch
            .results
            .iter()
            .all(|r| r.message == "Database connection is not initialized"));
        Ok(())
    }
}

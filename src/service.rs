//! Caller-facing maintenance service
//!
//! Owns one instance of every coordinator and the capability interfaces of
//! the presentation side. Confirmation gates run on the caller; the work
//! itself is spawned as a background task and its `Completion` is delivered
//! back through an mpsc channel that the owner drains and hands to
//! [`MaintenanceService::deliver`]. Exclusive operations share one lock.

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use crate::config::MaintenanceConfig;
use crate::database::backup::{BackupCoordinator, BundleCreated};
use crate::database::catalog::{BackupBundle, BackupCatalog};
use crate::database::maintenance::{
    MaintenanceBatchResult, MaintenanceOperation, MaintenanceOperationResult,
    MaintenanceOperationRunner,
};
use crate::database::probe::{DatabaseHealth, StateProbe, SystemStateSnapshot};
use crate::database::reset::{ResetResult, SystemResetter};
use crate::database::restore::{DataReloader, RestoreCoordinator, RestoreSummary};
use crate::database::retention::{PruneResult, RetentionPolicyEnforcer};
use crate::database::{DatabaseError, Result};
use crate::db::DatabaseLifecycle;

/// Literal phrase the second reset gate must receive
pub const RESET_CONFIRMATION_PHRASE: &str = "DELETE ALL DATA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Danger,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Success => "SUCCESS",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Danger => "DANGER",
        };
        f.write_str(label)
    }
}

/// Presentation-side capabilities
#[cfg_attr(test, mockall::automock)]
pub trait Interaction: Send + Sync {
    fn confirm_action(&self, title: &str, message: &str) -> bool;

    /// Free-text confirmation; `None` when the user cancels
    fn confirm_phrase(&self, title: &str, message: &str) -> Option<String>;

    fn notify(&self, title: &str, message: &str, severity: Severity);

    fn pick_directory(&self) -> Option<PathBuf>;
}

/// Result of a background operation, delivered to the owner
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Completion {
    BackupCreated(BundleCreated),
    Restored(RestoreSummary),
    Pruned(PruneResult),
    Deleted(BackupBundle),
    Maintenance(MaintenanceOperationResult),
    MaintenanceBatch(MaintenanceBatchResult),
    Snapshot(SystemStateSnapshot),
    Reset(ResetResult),
    /// Refused because another exclusive operation was running
    Rejected { operation: String, cause: String },
    Failed { operation: String, cause: String },
}

/// User-visible notification for a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Completion {
    fn failed(operation: &str, cause: impl ToString) -> Self {
        Completion::Failed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    fn settle<T>(operation: &str, result: Result<T>, done: impl FnOnce(T) -> Self) -> Self {
        match result {
            Ok(value) => done(value),
            Err(e) => {
                error!(operation, error = %e, "operation failed");
                Completion::failed(operation, e)
            }
        }
    }

    /// Whether the operation ended in failure
    pub fn is_failure(&self) -> bool {
        self.notice().severity == Severity::Danger
    }

    pub fn notice(&self) -> Notice {
        let (title, message, severity) = match self {
            Completion::BackupCreated(created) => {
                let mut message = format!(
                    "Backup {} created: {} files, {}",
                    created.bundle.id,
                    created.file_count(),
                    human_bytes(created.total_size_bytes())
                );
                let severity = if created.warnings.is_empty() {
                    Severity::Success
                } else {
                    message.push_str(&format!(
                        ". Skipped: {}",
                        created.warnings.join("; ")
                    ));
                    Severity::Warning
                };
                ("Backup created".to_string(), message, severity)
            }
            Completion::Restored(summary) => {
                let mut message = format!(
                    "Restored {} from {}",
                    human_bytes(summary.restored_bytes),
                    summary.bundle.display()
                );
                if let Some(safety) = &summary.safety_copy {
                    message.push_str(&format!(". Previous database kept at {}", safety.display()));
                }
                let severity = if summary.warnings.is_empty() {
                    Severity::Success
                } else {
                    message.push_str(&format!(". Warnings: {}", summary.warnings.join("; ")));
                    Severity::Warning
                };
                ("Restore completed".to_string(), message, severity)
            }
            Completion::Pruned(result) => {
                let mut message = format!(
                    "Deleted {} old backups, freed {}, kept {}",
                    result.deleted,
                    human_bytes(result.freed_bytes),
                    result.kept
                );
                if !result.purged_incomplete.is_empty() {
                    message.push_str(&format!(
                        ". Removed {} incomplete backups",
                        result.purged_incomplete.len()
                    ));
                }
                if !result.failures.is_empty() {
                    message.push_str(&format!(". Failed: {}", result.failures.join("; ")));
                }
                ("Old backups cleaned".to_string(), message, Severity::Info)
            }
            Completion::Deleted(bundle) => (
                "Backup deleted".to_string(),
                format!(
                    "Deleted backup {} ({})",
                    bundle.id,
                    human_bytes(bundle.total_size_bytes)
                ),
                Severity::Success,
            ),
            Completion::Maintenance(result) => {
                let severity = if result.succeeded {
                    Severity::Success
                } else {
                    Severity::Warning
                };
                (
                    format!("Maintenance: {}", result.name),
                    format!("{} ({} ms)", result.message, result.duration_millis),
                    severity,
                )
            }
            Completion::MaintenanceBatch(batch) => {
                let severity = if batch.all_succeeded() {
                    Severity::Success
                } else {
                    Severity::Warning
                };
                let failed: Vec<&str> = batch
                    .results
                    .iter()
                    .filter(|r| !r.succeeded)
                    .map(|r| r.name.as_str())
                    .collect();
                let mut message = format!(
                    "{} operations succeeded, {} failed",
                    batch.succeeded, batch.failed
                );
                if !failed.is_empty() {
                    message.push_str(&format!(": {}", failed.join(", ")));
                }
                ("Full maintenance".to_string(), message, severity)
            }
            Completion::Snapshot(snapshot) => {
                let health = match &snapshot.database_health {
                    DatabaseHealth::Ok => "ok".to_string(),
                    DatabaseHealth::Warning(detail) => format!("warning ({})", detail),
                    DatabaseHealth::Unknown => "unknown".to_string(),
                };
                let latest = snapshot.most_recent_backup_id.as_deref().unwrap_or("none");
                (
                    "System status".to_string(),
                    format!(
                        "Database {} ({}), {} backups, latest {}, {} reclaimable",
                        human_bytes(snapshot.database_size_bytes),
                        health,
                        snapshot.backup_count,
                        latest,
                        human_bytes(snapshot.reclaimable_bytes)
                    ),
                    Severity::Info,
                )
            }
            Completion::Reset(result) => {
                let severity = if result.succeeded {
                    Severity::Warning
                } else {
                    Severity::Danger
                };
                ("System reset".to_string(), result.summary.clone(), severity)
            }
            Completion::Rejected { operation, cause } => (
                format!("{} not started", operation),
                cause.clone(),
                Severity::Warning,
            ),
            Completion::Failed { operation, cause } => {
                (format!("{} failed", operation), cause.clone(), Severity::Danger)
            }
        };

        Notice {
            title,
            message,
            severity,
        }
    }
}

/// What happened to a request on the caller side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Work was spawned; exactly one completion follows
    Started,
    /// The user declined a confirmation; nothing was spawned or delivered
    Declined,
    /// Another exclusive operation is running; a `Rejected` completion was delivered
    Rejected,
}

pub struct MaintenanceService {
    config: MaintenanceConfig,
    catalog: BackupCatalog,
    backups: Arc<BackupCoordinator>,
    restores: Arc<RestoreCoordinator>,
    retention: RetentionPolicyEnforcer,
    runner: MaintenanceOperationRunner,
    probe: Arc<StateProbe>,
    resetter: Arc<SystemResetter>,
    interaction: Arc<dyn Interaction>,
    operation_lock: Arc<Mutex<()>>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl MaintenanceService {
    /// Build the service and the receiving end of its completion channel
    pub fn new(
        config: MaintenanceConfig,
        lifecycle: Arc<dyn DatabaseLifecycle>,
        interaction: Arc<dyn Interaction>,
        reloaders: Vec<Arc<dyn DataReloader>>,
    ) -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let paths = config.paths.clone();
        let catalog = BackupCatalog::new(&paths.backups_dir);
        let runner = MaintenanceOperationRunner::new(lifecycle.clone());

        let mut restores = RestoreCoordinator::new(paths.clone(), lifecycle.clone());
        for reloader in reloaders {
            restores.add_reloader(reloader);
        }

        let (completions, receiver) = mpsc::unbounded_channel();
        let service = Self {
            backups: Arc::new(BackupCoordinator::new(paths.clone(), runner.clone())),
            restores: Arc::new(restores),
            retention: RetentionPolicyEnforcer::new(catalog.clone()),
            probe: Arc::new(StateProbe::new(paths, lifecycle.clone(), catalog.clone())),
            resetter: Arc::new(SystemResetter::new(config.clone(), lifecycle)),
            catalog,
            runner,
            config,
            interaction,
            operation_lock: Arc::new(Mutex::new(())),
            completions,
        };
        (service, receiver)
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    /// Notify the user of a completion; call from the owner for every received completion
    pub fn deliver(&self, completion: &Completion) {
        let notice = completion.notice();
        self.interaction
            .notify(&notice.title, &notice.message, notice.severity);
    }

    pub fn request_backup(&self) -> Submission {
        let backups = self.backups.clone();
        self.submit("Backup", true, async move {
            Completion::settle("Backup", backups.create().await, Completion::BackupCreated)
        })
    }

    /// Restore `bundle`, or a directory picked by the user when `None`
    pub fn request_restore(&self, bundle: Option<PathBuf>) -> Submission {
        let Some(bundle) = bundle.or_else(|| self.interaction.pick_directory()) else {
            return Submission::Declined;
        };

        let confirmed = self.interaction.confirm_action(
            "Restore backup",
            &format!(
                "Replace the current data with the backup at {}? The current database is kept as a safety copy.",
                bundle.display()
            ),
        );
        if !confirmed {
            return Submission::Declined;
        }

        let restores = self.restores.clone();
        self.submit("Restore", true, async move {
            Completion::settle("Restore", restores.restore(&bundle).await, Completion::Restored)
        })
    }

    /// Apply the retention policy; `None` uses the configured count
    pub fn request_prune(&self, keep: Option<usize>) -> Submission {
        let keep = keep.unwrap_or(self.config.retention_count);
        let confirmed = self.interaction.confirm_action(
            "Clean old backups",
            &format!("Delete every backup except the {} most recent?", keep),
        );
        if !confirmed {
            return Submission::Declined;
        }

        let retention = self.retention.clone();
        self.submit("Backup cleanup", true, async move {
            Completion::settle("Backup cleanup", retention.prune(keep).await, Completion::Pruned)
        })
    }

    pub fn request_delete(&self, id: &str) -> Submission {
        let confirmed = self.interaction.confirm_action(
            "Delete backup",
            &format!("Permanently delete backup {}?", id),
        );
        if !confirmed {
            return Submission::Declined;
        }

        let catalog = self.catalog.clone();
        let id = id.to_string();
        self.submit("Backup deletion", true, async move {
            Completion::settle("Backup deletion", catalog.delete(&id).await, Completion::Deleted)
        })
    }

    /// Run one catalog operation, or the whole catalog when `None`
    pub fn request_maintenance(&self, operation: Option<MaintenanceOperation>) -> Submission {
        let runner = self.runner.clone();
        match operation {
            Some(operation) => self.submit("Maintenance", true, async move {
                Completion::Maintenance(runner.run_operation(operation).await)
            }),
            None => self.submit("Maintenance", true, async move {
                Completion::MaintenanceBatch(runner.run_all().await)
            }),
        }
    }

    /// Read-only; runs even while an exclusive operation is in flight
    pub fn request_snapshot(&self) -> Submission {
        let probe = self.probe.clone();
        self.submit("Status", false, async move {
            Completion::Snapshot(probe.snapshot().await)
        })
    }

    /// Two-step gate, then the irreversible wipe
    pub fn request_reset(&self) -> Submission {
        let confirmed = self.interaction.confirm_action(
            "Reset system",
            "This deletes all inventory data, documents, backups, drafts, signatures, logs and exports. Only the administrator account and the master key are kept. Continue?",
        );
        if !confirmed {
            return Submission::Declined;
        }

        let phrase = self.interaction.confirm_phrase(
            "Confirm system reset",
            &format!("Type {} to confirm", RESET_CONFIRMATION_PHRASE),
        );
        if phrase.as_deref().map(str::trim) != Some(RESET_CONFIRMATION_PHRASE) {
            info!("system reset cancelled at the confirmation phrase");
            return Submission::Declined;
        }

        let resetter = self.resetter.clone();
        self.submit("System reset", true, async move {
            Completion::Reset(resetter.reset_system().await)
        })
    }

    /// Spawn `work`, converting panics into a failure completion
    fn submit<F>(&self, operation: &'static str, exclusive: bool, work: F) -> Submission
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let guard = if exclusive {
            match self.operation_lock.clone().try_lock_owned() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    warn!(operation, "rejected, another operation is running");
                    self.send(Completion::Rejected {
                        operation: operation.to_string(),
                        cause: DatabaseError::OperationInProgress.to_string(),
                    });
                    return Submission::Rejected;
                }
            }
        } else {
            None
        };

        info!(operation, "operation started");
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let completion = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(completion) => completion,
                Err(panic) => {
                    let cause = panic_message(panic.as_ref());
                    error!(operation, %cause, "operation panicked");
                    Completion::failed(operation, cause)
                }
            };
            // Release before delivery so the owner can start the next operation
            drop(guard);
            if completions.send(completion).is_err() {
                warn!(operation, "completion dropped, receiver is gone");
            }
        });
        Submission::Started
    }

    fn send(&self, completion: Completion) {
        if self.completions.send(completion).is_err() {
            warn!("completion dropped, receiver is gone");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected internal error".to_string()
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MaintenancePaths;
    use crate::database::catalog::tests::write_bundle;
    use crate::db::SqliteLifecycle;
    use tempfile::{TempDir, tempdir};

    async fn service_with(
        interaction: MockInteraction,
    ) -> (TempDir, MaintenancePaths, MaintenanceService, mpsc::UnboundedReceiver<Completion>) {
        let temp_dir = tempdir().unwrap();
        let paths = MaintenancePaths::under(temp_dir.path());
        let lifecycle = Arc::new(SqliteLifecycle::open(&paths.database_file).await.unwrap());
        let (service, receiver) = MaintenanceService::new(
            MaintenanceConfig::with_paths(paths.clone()),
            lifecycle,
            Arc::new(interaction),
            Vec::new(),
        );
        (temp_dir, paths, service, receiver)
    }

    /// Service over a database file that exists but cannot be opened, or is missing
    fn service_without_database(
        paths: &MaintenancePaths,
        lifecycle: Arc<SqliteLifecycle>,
        interaction: MockInteraction,
    ) -> (MaintenanceService, mpsc::UnboundedReceiver<Completion>) {
        MaintenanceService::new(
            MaintenanceConfig::with_paths(paths.clone()),
            lifecycle,
            Arc::new(interaction),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_unreadable_database_can_be_inspected_and_restored() {
        let temp_dir = tempdir().unwrap();
        let paths = MaintenancePaths::under(temp_dir.path());

        let source = SqliteLifecycle::open(temp_dir.path().join("source").join("inventario.db"))
            .await
            .unwrap();
        let pool = source.connection().await.unwrap();
        sqlx::query("CREATE TABLE equipos (id INTEGER PRIMARY KEY, nombre TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO equipos (nombre) VALUES ('taladro')")
            .execute(&pool)
            .await
            .unwrap();
        drop(pool);
        source.checkpoint().await.unwrap();
        source.shutdown().await;
        let bundle = paths.backups_dir.join("backup_2025-06-01_14-30-00");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::copy(
            temp_dir.path().join("source").join("inventario.db"),
            bundle.join("inventario.db"),
        )
        .unwrap();

        std::fs::write(&paths.database_file, vec![0xFFu8; 8192]).unwrap();
        let lifecycle = Arc::new(SqliteLifecycle::existing(&paths.database_file));
        assert!(lifecycle.initialize().await.is_err());

        let mut interaction = MockInteraction::new();
        interaction.expect_confirm_action().times(1).return_const(true);
        interaction
            .expect_notify()
            .withf(|_, _, severity| *severity != Severity::Danger)
            .times(2)
            .return_const(());
        let (service, mut receiver) =
            service_without_database(&paths, lifecycle.clone(), interaction);

        assert_eq!(service.request_snapshot(), Submission::Started);
        let completion = receiver.recv().await.unwrap();
        service.deliver(&completion);
        let Completion::Snapshot(snapshot) = completion else {
            panic!("unexpected completion: {:?}", completion);
        };
        assert_eq!(snapshot.database_health, DatabaseHealth::Unknown);
        assert_eq!(snapshot.backup_count, 1);

        assert_eq!(service.request_restore(Some(bundle)), Submission::Started);
        let completion = receiver.recv().await.unwrap();
        service.deliver(&completion);
        let Completion::Restored(summary) = completion else {
            panic!("unexpected completion: {:?}", completion);
        };
        assert_eq!(
            std::fs::read(summary.safety_copy.unwrap()).unwrap(),
            vec![0xFFu8; 8192]
        );

        let pool = lifecycle.connection().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM equipos")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_backup_of_missing_database_is_danger() {
        let temp_dir = tempdir().unwrap();
        let paths = MaintenancePaths::under(temp_dir.path().join("data"));
        let lifecycle = Arc::new(SqliteLifecycle::existing(&paths.database_file));
        assert!(lifecycle.initialize().await.is_err());

        let mut interaction = MockInteraction::new();
        interaction
            .expect_notify()
            .withf(|title, _, severity| title == "Backup failed" && *severity == Severity::Danger)
            .times(1)
            .return_const(());
        let (service, mut receiver) = service_without_database(&paths, lifecycle, interaction);

        assert_eq!(service.request_backup(), Submission::Started);
        let completion = receiver.recv().await.unwrap();
        service.deliver(&completion);

        match &completion {
            Completion::Failed { cause, .. } => assert!(cause.starts_with("Database file not found")),
            other => panic!("unexpected completion: {:?}", other),
        }
        assert!(!paths.database_file.exists());
        assert!(std::fs::read_dir(&paths.backups_dir).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_backup_delivers_one_success_notice() {
        let mut interaction = MockInteraction::new();
        interaction
            .expect_notify()
            .withf(|title, _, severity| title == "Backup created" && *severity == Severity::Success)
            .times(1)
            .return_const(());
        let (_temp_dir, paths, service, mut receiver) = service_with(interaction).await;

        assert_eq!(service.request_backup(), Submission::Started);
        let completion = receiver.recv().await.unwrap();
        service.deliver(&completion);

        let Completion::BackupCreated(created) = completion else {
            panic!("unexpected completion: {:?}", completion);
        };
        assert!(created.bundle.path.starts_with(&paths.backups_dir));
        assert_eq!(service.catalog().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exclusive_request_rejected_while_locked() {
        let mut interaction = MockInteraction::new();
        interaction
            .expect_notify()
            .withf(|_, _, severity| *severity == Severity::Warning)
            .times(1)
            .return_const(());
        let (_temp_dir, _paths, service, mut receiver) = service_with(interaction).await;

        let guard = service.operation_lock.clone().try_lock_owned().unwrap();
        assert_eq!(service.request_backup(), Submission::Rejected);
        let completion = receiver.recv().await.unwrap();
        assert!(matches!(completion, Completion::Rejected { .. }));
        service.deliver(&completion);

        // Snapshots are read-only and ignore the lock
        assert_eq!(service.request_snapshot(), Submission::Started);
        assert!(matches!(receiver.recv().await, Some(Completion::Snapshot(_))));

        drop(guard);
        assert_eq!(
            service.request_maintenance(Some(MaintenanceOperation::RefreshQueryStatistics)),
            Submission::Started
        );
        assert!(matches!(receiver.recv().await, Some(Completion::Maintenance(r)) if r.succeeded));
    }

    #[tokio::test]
    async fn test_restore_declined_without_directory() {
        let mut interaction = MockInteraction::new();
        interaction.expect_pick_directory().times(1).return_const(None);
        interaction.expect_confirm_action().never();
        let (_temp_dir, _paths, service, mut receiver) = service_with(interaction).await;

        assert_eq!(service.request_restore(None), Submission::Declined);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restore_of_invalid_bundle_is_danger() {
        let mut interaction = MockInteraction::new();
        interaction.expect_confirm_action().times(1).return_const(true);
        interaction
            .expect_notify()
            .withf(|_, _, severity| *severity == Severity::Danger)
            .times(1)
            .return_const(());
        let (temp_dir, _paths, service, mut receiver) = service_with(interaction).await;

        let empty = temp_dir.path().join("not_a_bundle");
        std::fs::create_dir_all(&empty).unwrap();
        assert_eq!(service.request_restore(Some(empty)), Submission::Started);

        let completion = receiver.recv().await.unwrap();
        assert!(completion.is_failure());
        service.deliver(&completion);
    }

    #[tokio::test]
    async fn test_reset_requires_exact_phrase() {
        let mut interaction = MockInteraction::new();
        interaction.expect_confirm_action().times(2).return_const(true);
        let mut phrases = vec![
            Some(format!("  {}  ", RESET_CONFIRMATION_PHRASE)),
            Some("delete all data".to_string()),
        ];
        interaction
            .expect_confirm_phrase()
            .times(2)
            .returning(move |_, _| phrases.pop().flatten());
        let (_temp_dir, paths, service, mut receiver) = service_with(interaction).await;
        std::fs::write(&paths.master_key_file, b"key").unwrap();
        write_bundle(&paths.backups_dir, "2025-03-01_08-00-00", 10).await;

        assert_eq!(service.request_reset(), Submission::Declined);
        assert!(receiver.try_recv().is_err());
        assert_eq!(service.catalog().list().await.unwrap().len(), 1);

        assert_eq!(service.request_reset(), Submission::Started);
        let Some(Completion::Reset(result)) = receiver.recv().await else {
            panic!("expected a reset completion");
        };
        assert!(result.succeeded, "{:?}", result.warnings);
        assert!(service.catalog().list().await.unwrap().is_empty());
        assert!(paths.master_key_file.exists());
    }

    #[tokio::test]
    async fn test_delete_asks_for_confirmation() {
        let mut interaction = MockInteraction::new();
        interaction
            .expect_confirm_action()
            .withf(|title, _| title == "Delete backup")
            .times(1)
            .return_const(true);
        let (_temp_dir, paths, service, mut receiver) = service_with(interaction).await;
        write_bundle(&paths.backups_dir, "2025-03-01_08-00-00", 10).await;

        assert_eq!(service.request_delete("2025-03-01_08-00-00"), Submission::Started);
        assert!(matches!(receiver.recv().await, Some(Completion::Deleted(b)) if b.id == "2025-03-01_08-00-00"));
    }

    fn explode() -> Completion {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_and_releases_lock() {
        let (_temp_dir, _paths, service, mut receiver) = service_with(MockInteraction::new()).await;

        assert_eq!(
            service.submit("Explode", true, async { explode() }),
            Submission::Started
        );
        let completion = receiver.recv().await.unwrap();
        match &completion {
            Completion::Failed { operation, cause } => {
                assert_eq!(operation, "Explode");
                assert_eq!(cause, "boom");
            }
            other => panic!("unexpected completion: {:?}", other),
        }
        assert!(service.operation_lock.try_lock().is_ok());
    }

    #[test]
    fn test_notice_severities() {
        let prune = Completion::Pruned(PruneResult::default());
        assert_eq!(prune.notice().severity, Severity::Info);

        let batch = Completion::MaintenanceBatch(MaintenanceBatchResult {
            results: vec![MaintenanceOperationResult {
                name: "verify-data-integrity".to_string(),
                command: "PRAGMA integrity_check".to_string(),
                succeeded: false,
                message: "row 3 missing from index".to_string(),
                duration_millis: 4,
            }],
            succeeded: 0,
            failed: 1,
        });
        let notice = batch.notice();
        assert_eq!(notice.severity, Severity::Warning);
        assert!(notice.message.contains("verify-data-integrity"));

        let reset = Completion::Reset(ResetResult {
            succeeded: true,
            summary: "done".to_string(),
            cleared_tables: Vec::new(),
            removed_entries: 0,
            warnings: Vec::new(),
        });
        assert_eq!(reset.notice().severity, Severity::Warning);
        assert!(Completion::failed("Restore", "disk full").is_failure());
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MiB");
        assert_eq!(human_bytes(1536), "1.5 KiB");
    }
}

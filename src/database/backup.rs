//! Creation of verified point-in-time backup bundles
//!
//! A bundle is a directory under the backup root holding a copy of the
//! primary database plus every optional artifact that could be copied. The
//! database copy is mandatory and size-verified; optional artifacts are
//! best-effort. A failed creation never leaves a bundle directory behind.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs as tokio_fs;
use tracing::{error, info, warn};

use crate::config::MaintenancePaths;
use crate::database::artifacts::{
    self, ArtifactCategory, CopySummary, FileTransfer, TokioFileTransfer,
};
use crate::database::backup_naming::BundleId;
use crate::database::catalog::BackupBundle;
use crate::database::maintenance::{MaintenanceOperation, MaintenanceOperationRunner};
use crate::database::step::StepReport;
use crate::database::{DatabaseError, Result};

/// Attempts at finding a free bundle ID before giving up
const MAX_ID_ATTEMPTS: usize = 60;

/// Successful bundle creation
#[derive(Debug, Clone, Serialize)]
pub struct BundleCreated {
    pub bundle: BackupBundle,
    /// Per-category copy totals, including empty ones for absent artifacts
    pub categories: BTreeMap<ArtifactCategory, CopySummary>,
    /// Best-effort steps that failed
    pub warnings: Vec<String>,
    pub duration_millis: u64,
}

impl BundleCreated {
    pub fn file_count(&self) -> u64 {
        self.bundle.file_count
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.bundle.total_size_bytes
    }
}

/// Creates backup bundles
pub struct BackupCoordinator {
    paths: MaintenancePaths,
    runner: MaintenanceOperationRunner,
    transfer: Arc<dyn FileTransfer>,
}

impl BackupCoordinator {
    pub fn new(paths: MaintenancePaths, runner: MaintenanceOperationRunner) -> Self {
        Self::with_transfer(paths, runner, Arc::new(TokioFileTransfer))
    }

    pub fn with_transfer(
        paths: MaintenancePaths,
        runner: MaintenanceOperationRunner,
        transfer: Arc<dyn FileTransfer>,
    ) -> Self {
        Self {
            paths,
            runner,
            transfer,
        }
    }

    /// Create a new verified bundle
    pub async fn create(&self) -> Result<BundleCreated> {
        let start_time = Instant::now();

        tokio_fs::create_dir_all(&self.paths.backups_dir).await?;
        let (id, bundle_path) = self.allocate_bundle_dir().await?;
        info!(bundle = %id, path = %bundle_path.display(), "Starting backup");

        match self.fill_bundle(&bundle_path).await {
            Ok((categories, report)) => {
                let stats = match artifacts::bundle_stats(&bundle_path).await {
                    Ok(stats) => stats,
                    Err(e) => {
                        self.discard(&bundle_path).await;
                        return Err(e);
                    }
                };

                if !artifacts::is_valid_bundle(&bundle_path).await {
                    error!(bundle = %id, "finished bundle has no primary database, discarding");
                    self.discard(&bundle_path).await;
                    return Err(DatabaseError::InvalidBundle(bundle_path));
                }

                let bundle = BackupBundle {
                    id: id.as_str().to_string(),
                    artifacts: artifacts::present_categories(&bundle_path).await,
                    path: bundle_path,
                    file_count: stats.files,
                    total_size_bytes: stats.bytes,
                };
                let warnings = report.warnings();

                info!(
                    bundle = %bundle.id,
                    files = bundle.file_count,
                    bytes = bundle.total_size_bytes,
                    warnings = warnings.len(),
                    "Backup completed"
                );

                Ok(BundleCreated {
                    bundle,
                    categories,
                    warnings,
                    duration_millis: start_time.elapsed().as_millis() as u64,
                })
            }
            Err(e) => {
                self.discard(&bundle_path).await;
                Err(e)
            }
        }
    }

    /// Checkpoint, copy the database, then copy every optional category
    async fn fill_bundle(
        &self,
        bundle_path: &Path,
    ) -> Result<(BTreeMap<ArtifactCategory, CopySummary>, StepReport)> {
        let mut report = StepReport::new();

        // An un-checkpointed WAL only means the copy misses the latest writes
        let checkpoint = self
            .runner
            .run_operation(MaintenanceOperation::CheckpointPendingWrites)
            .await;
        if !checkpoint.succeeded {
            report.best_effort::<()>(
                "checkpoint before backup",
                Err(DatabaseError::Sqlite(checkpoint.message)),
            );
        }

        let mut categories = BTreeMap::new();
        let database = report.require(
            ArtifactCategory::PrimaryDatabase.name(),
            self.copy_database(bundle_path).await,
        )?;
        categories.insert(ArtifactCategory::PrimaryDatabase, database);

        for category in ArtifactCategory::optional() {
            let copied = artifacts::copy_category(
                self.transfer.as_ref(),
                category,
                &category.live_path(&self.paths),
                &category.bundle_path(bundle_path),
            )
            .await;
            if let Some(summary) = report.best_effort(category.name(), copied) {
                categories.insert(category, summary);
            }
        }

        Ok((categories, report))
    }

    async fn copy_database(&self, bundle_path: &Path) -> Result<CopySummary> {
        let source = &self.paths.database_file;
        if !tokio_fs::try_exists(source).await? {
            return Err(DatabaseError::MissingDatabase(source.clone()));
        }

        let target = ArtifactCategory::PrimaryDatabase.bundle_path(bundle_path);
        let bytes = artifacts::copy_verified(self.transfer.as_ref(), source, &target).await?;
        Ok(CopySummary::file(bytes))
    }

    /// Create a fresh bundle directory, moving the ID forward on collisions
    async fn allocate_bundle_dir(&self) -> Result<(BundleId, PathBuf)> {
        let mut id = BundleId::now();
        for _ in 0..MAX_ID_ATTEMPTS {
            let path = id.bundle_path(&self.paths.backups_dir);
            match tokio_fs::create_dir(&path).await {
                Ok(()) => return Ok((id, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => id = id.next(),
                Err(e) => return Err(e.into()),
            }
        }
        Err(DatabaseError::Config(format!(
            "no free bundle name in {}",
            self.paths.backups_dir.display()
        )))
    }

    async fn discard(&self, bundle_path: &Path) {
        if let Err(e) = tokio_fs::remove_dir_all(bundle_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %bundle_path.display(), error = %e, "failed to remove partial bundle");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseLifecycle, MockDatabaseLifecycle, SqliteLifecycle};
    use crate::database::artifacts::MockFileTransfer;
    use tempfile::tempdir;

    const TEN_MIB: usize = 10 * 1024 * 1024;

    fn closed_database() -> MaintenanceOperationRunner {
        let mut lifecycle = MockDatabaseLifecycle::new();
        lifecycle
            .expect_connection()
            .returning(|| Err(DatabaseError::NotInitialized));
        MaintenanceOperationRunner::new(Arc::new(lifecycle))
    }

    async fn bundle_dirs(backups_dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        if let Ok(mut entries) = tokio_fs::read_dir(backups_dir).await {
            while let Some(entry) = entries.next_entry().await.unwrap() {
                found.push(entry.path());
            }
        }
        found
    }

    #[tokio::test]
    async fn test_bundle_with_database_only() -> Result<()> {
        let temp_dir = tempdir()?;
        let paths = MaintenancePaths::under(temp_dir.path());
        tokio_fs::write(&paths.database_file, vec![0x5Au8; TEN_MIB]).await?;

        let coordinator = BackupCoordinator::new(paths.clone(), closed_database());
        let created = coordinator.create().await?;

        assert_eq!(created.file_count(), 1);
        assert_eq!(created.total_size_bytes(), TEN_MIB as u64);
        assert!(artifacts::is_valid_bundle(&created.bundle.path).await);
        assert!(created.bundle.path.starts_with(&paths.backups_dir));
        assert_eq!(created.bundle.artifacts.len(), 1);
        // Only the skipped checkpoint is reported
        assert_eq!(created.warnings.len(), 1);
        assert!(created.warnings[0].starts_with("checkpoint before backup"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_database_leaves_no_bundle() -> Result<()> {
        let temp_dir = tempdir()?;
        let paths = MaintenancePaths::under(temp_dir.path());

        let coordinator = BackupCoordinator::new(paths.clone(), closed_database());
        let result = coordinator.create().await;

        assert!(matches!(result, Err(DatabaseError::MissingDatabase(_))));
        assert!(bundle_dirs(&paths.backups_dir).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_size_mismatch_discards_bundle() -> Result<()> {
        let temp_dir = tempdir()?;
        let paths = MaintenancePaths::under(temp_dir.path());
        tokio_fs::write(&paths.database_file, vec![1u8; 8192]).await?;

        let mut transfer = MockFileTransfer::new();
        transfer.expect_copy().returning(|_, to| {
            std::fs::write(to, vec![1u8; 100])?;
            Ok(100)
        });

        let coordinator =
            BackupCoordinator::with_transfer(paths.clone(), closed_database(), Arc::new(transfer));
        let result = coordinator.create().await;

        assert!(matches!(
            result,
            Err(DatabaseError::SizeMismatch { expected: 8192, actual: 100, .. })
        ));
        assert!(bundle_dirs(&paths.backups_dir).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_optional_artifact_failure_is_isolated() -> Result<()> {
        let temp_dir = tempdir()?;
        let paths = MaintenancePaths::under(temp_dir.path());
        tokio_fs::write(&paths.database_file, vec![2u8; 4096]).await?;
        tokio_fs::create_dir_all(&paths.signatures_dir).await?;
        tokio_fs::write(paths.signatures_dir.join("jefe.png"), b"png").await?;
        tokio_fs::create_dir_all(&paths.drafts_dir).await?;
        tokio_fs::write(paths.drafts_dir.join("draft-1.json"), b"{}").await?;

        let signatures_dir = paths.signatures_dir.clone();
        let mut transfer = MockFileTransfer::new();
        transfer.expect_copy().returning(move |from, to| {
            if from.starts_with(&signatures_dir) {
                Err(std::io::Error::new(ErrorKind::PermissionDenied, "locked"))
            } else {
                std::fs::copy(from, to)
            }
        });

        let coordinator =
            BackupCoordinator::with_transfer(paths.clone(), closed_database(), Arc::new(transfer));
        let created = coordinator.create().await?;

        assert!(artifacts::is_valid_bundle(&created.bundle.path).await);
        assert!(created.bundle.artifacts.contains(&ArtifactCategory::Drafts));
        assert_eq!(created.file_count(), 2);
        assert!(created.warnings.iter().any(|w| w.starts_with("signatures")));
        assert!(!created.categories.contains_key(&ArtifactCategory::Signatures));
        Ok(())
    }

    #[tokio::test]
    async fn test_full_bundle_from_live_database() -> Result<()> {
        let temp_dir = tempdir()?;
        let paths = MaintenancePaths::under(temp_dir.path());

        let lifecycle = Arc::new(SqliteLifecycle::open(&paths.database_file).await?);
        let pool = lifecycle.connection().await?;
        sqlx::query("CREATE TABLE equipos (id INTEGER PRIMARY KEY, nombre TEXT)")
            .execute(&pool)
            .await?;
        sqlx::query("INSERT INTO equipos (nombre) VALUES ('taladro')")
            .execute(&pool)
            .await?;

        tokio_fs::create_dir_all(&paths.documents_dir).await?;
        tokio_fs::write(paths.documents_dir.join("stock.xlsx"), b"xlsx").await?;
        tokio_fs::create_dir_all(&paths.security_dir).await?;
        tokio_fs::write(paths.security_dir.join("keystore.p12"), b"keys").await?;
        tokio_fs::write(&paths.configuration_file, b"app.mode=prod").await?;
        tokio_fs::write(&paths.report_file, b"report").await?;
        tokio_fs::write(paths.report_companion_file(), b"old report").await?;
        tokio_fs::write(&paths.master_key_file, b"master").await?;
        tokio_fs::write(&paths.secondary_config_file, b"theme=dark").await?;

        let runner = MaintenanceOperationRunner::new(lifecycle.clone());
        let coordinator = BackupCoordinator::new(paths.clone(), runner);
        let created = coordinator.create().await?;

        assert!(created.warnings.is_empty(), "{:?}", created.warnings);
        // database + xlsx + key + config + report + companion + master key + secondary config
        assert_eq!(created.file_count(), 8);
        let bundle = &created.bundle.path;
        assert!(bundle.join("excel").join("stock.xlsx").exists());
        assert!(bundle.join("security").join("keystore.p12").exists());
        assert!(bundle.join("reportes_mantenimiento.dat.bak").exists());
        assert!(bundle.join("master.key").exists());
        assert!(!created.bundle.artifacts.contains(&ArtifactCategory::Drafts));

        // The copied database is a usable SQLite file with the checkpointed row
        let copy = SqliteLifecycle::open(bundle.join("inventario.db")).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM equipos")
            .fetch_one(&copy.connection().await?)
            .await?;
        assert_eq!(count, 1);
        copy.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_same_second_bundles_get_distinct_ids() -> Result<()> {
        let temp_dir = tempdir()?;
        let paths = MaintenancePaths::under(temp_dir.path());
        tokio_fs::write(&paths.database_file, vec![3u8; 512]).await?;

        let coordinator = BackupCoordinator::new(paths.clone(), closed_database());
        let first = coordinator.create().await?;
        let second = coordinator.create().await?;

        assert_ne!(first.bundle.id, second.bundle.id);
        assert!(second.bundle.bundle_id().unwrap() > first.bundle.bundle_id().unwrap());
        Ok(())
    }
}

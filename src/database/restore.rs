//! Restoring a backup bundle over the live system
//!
//! The live pool is shut down before any file is replaced and initialized
//! again on every path out of `restore`, including failures. Before anything
//! is overwritten the current database gets a timestamped safety copy.

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as tokio_fs;
use tracing::{error, info, warn};

use crate::config::MaintenancePaths;
use crate::database::artifacts::{
    self, ArtifactCategory, CopySummary, FileTransfer, TokioFileTransfer,
};
use crate::database::backup_naming::{artifact_safety_path, database_safety_path};
use crate::database::step::StepReport;
use crate::database::{DatabaseError, Result};
use crate::db::DatabaseLifecycle;

/// Tries at finding an unused safety file name, one second apart
const MAX_SAFETY_ATTEMPTS: usize = 60;

/// In-memory state that must be rebuilt once restored data is in place
#[async_trait]
pub trait DataReloader: Send + Sync {
    fn name(&self) -> &str;

    async fn reload(&self) -> Result<()>;
}

/// Successful restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub bundle: PathBuf,
    /// Bytes written across every category
    pub restored_bytes: u64,
    pub categories: BTreeMap<ArtifactCategory, CopySummary>,
    /// Copy of the database as it was before the restore
    pub safety_copy: Option<PathBuf>,
    /// Copy of the maintenance report as it was before the restore
    pub report_safety_copy: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Restores bundles produced by `BackupCoordinator`
pub struct RestoreCoordinator {
    paths: MaintenancePaths,
    lifecycle: Arc<dyn DatabaseLifecycle>,
    transfer: Arc<dyn FileTransfer>,
    reloaders: Vec<Arc<dyn DataReloader>>,
}

impl RestoreCoordinator {
    pub fn new(paths: MaintenancePaths, lifecycle: Arc<dyn DatabaseLifecycle>) -> Self {
        Self::with_transfer(paths, lifecycle, Arc::new(TokioFileTransfer))
    }

    pub fn with_transfer(
        paths: MaintenancePaths,
        lifecycle: Arc<dyn DatabaseLifecycle>,
        transfer: Arc<dyn FileTransfer>,
    ) -> Self {
        Self {
            paths,
            lifecycle,
            transfer,
            reloaders: Vec::new(),
        }
    }

    /// Register state to reload after a restore
    pub fn add_reloader(&mut self, reloader: Arc<dyn DataReloader>) {
        self.reloaders.push(reloader);
    }

    /// Restore the given bundle
    pub async fn restore(&self, bundle: &Path) -> Result<RestoreSummary> {
        if !artifacts::is_valid_bundle(bundle).await {
            warn!(bundle = %bundle.display(), "rejecting bundle without primary database");
            return Err(DatabaseError::InvalidBundle(bundle.to_path_buf()));
        }

        info!(bundle = %bundle.display(), "Starting restore");
        let outcome = self.replace_live_state(bundle).await;

        // The database must never be left closed, whatever happened above
        let reopened = self.lifecycle.initialize().await;
        if let Err(e) = &reopened {
            error!(error = %e, "failed to reinitialize database after restore");
        }

        let mut reload_warnings = Vec::new();
        if reopened.is_ok() {
            for reloader in &self.reloaders {
                if let Err(e) = reloader.reload().await {
                    warn!(reloader = reloader.name(), error = %e, "reload after restore failed");
                    reload_warnings.push(format!("reload {}: {}", reloader.name(), e));
                }
            }
        }

        match outcome {
            Ok(mut summary) => {
                reopened?;
                summary.warnings.extend(reload_warnings);
                info!(
                    bundle = %bundle.display(),
                    bytes = summary.restored_bytes,
                    warnings = summary.warnings.len(),
                    "Restore completed"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(bundle = %bundle.display(), error = %e, "Restore failed");
                Err(e)
            }
        }
    }

    async fn replace_live_state(&self, bundle: &Path) -> Result<RestoreSummary> {
        let mut report = StepReport::new();
        let stamp = Local::now().naive_local();

        // Quiesce: flush the WAL into the live file, then release it
        report.best_effort("checkpoint before restore", self.lifecycle.checkpoint().await);
        self.lifecycle.shutdown().await;

        let safety_copy = report
            .best_effort("pre-restore safety copy", self.safety_copy(stamp).await)
            .flatten();

        let mut categories = BTreeMap::new();

        // Key material must be in place before the database is reused
        if let Some(summary) = report.best_effort(
            ArtifactCategory::SecurityKeys.name(),
            self.restore_category(bundle, ArtifactCategory::SecurityKeys)
                .await,
        ) {
            categories.insert(ArtifactCategory::SecurityKeys, summary);
        }

        // Stale WAL content must not be replayed against the restored file
        report.best_effort("remove write-ahead files", self.remove_sidecars().await);

        let database = report.require(
            ArtifactCategory::PrimaryDatabase.name(),
            self.restore_category(bundle, ArtifactCategory::PrimaryDatabase)
                .await,
        )?;
        categories.insert(ArtifactCategory::PrimaryDatabase, database);

        let mut report_safety_copy = None;
        for category in ArtifactCategory::optional()
            .filter(|c| *c != ArtifactCategory::SecurityKeys)
        {
            if category == ArtifactCategory::MaintenanceReport
                && tokio_fs::try_exists(category.bundle_path(bundle))
                    .await
                    .unwrap_or(false)
            {
                report_safety_copy = report
                    .best_effort(
                        "maintenance report safety copy",
                        self.report_safety_copy(stamp).await,
                    )
                    .flatten();
            }

            if let Some(summary) = report.best_effort(
                category.name(),
                self.restore_category(bundle, category).await,
            ) {
                categories.insert(category, summary);
            }
        }

        Ok(RestoreSummary {
            bundle: bundle.to_path_buf(),
            restored_bytes: categories.values().copied().sum::<CopySummary>().bytes,
            categories,
            safety_copy,
            report_safety_copy,
            warnings: report.warnings(),
        })
    }

    async fn restore_category(
        &self,
        bundle: &Path,
        category: ArtifactCategory,
    ) -> Result<CopySummary> {
        let from = category.bundle_path(bundle);
        let to = category.live_path(&self.paths);

        if category == ArtifactCategory::PrimaryDatabase {
            if let Some(parent) = to.parent() {
                tokio_fs::create_dir_all(parent).await?;
            }
            let bytes = artifacts::copy_verified(self.transfer.as_ref(), &from, &to).await?;
            return Ok(CopySummary::file(bytes));
        }

        artifacts::copy_category(self.transfer.as_ref(), category, &from, &to).await
    }

    /// Copy the current database aside; `None` on a first-ever restore
    async fn safety_copy(&self, stamp: NaiveDateTime) -> Result<Option<PathBuf>> {
        let live = &self.paths.database_file;
        if !tokio_fs::try_exists(live).await? {
            info!("no current database, skipping safety copy");
            return Ok(None);
        }

        let target = free_safety_path(stamp, |at| database_safety_path(live, at)).await?;
        artifacts::copy_verified(self.transfer.as_ref(), live, &target).await?;
        info!(path = %target.display(), "pre-restore safety copy written");
        Ok(Some(target))
    }

    async fn report_safety_copy(&self, stamp: NaiveDateTime) -> Result<Option<PathBuf>> {
        let live = &self.paths.report_file;
        if !tokio_fs::try_exists(live).await? {
            return Ok(None);
        }

        let target = free_safety_path(stamp, |at| artifact_safety_path(live, at)).await?;
        artifacts::copy_verified(self.transfer.as_ref(), live, &target).await?;
        Ok(Some(target))
    }

    async fn remove_sidecars(&self) -> Result<()> {
        for sidecar in [self.paths.wal_file(), self.paths.shm_file()] {
            match tokio_fs::remove_file(&sidecar).await {
                Ok(()) => info!(path = %sidecar.display(), "removed stale database side file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// First safety file name at or after `stamp` that is not taken yet
///
/// Safety copies are never overwritten: an earlier one may hold the only copy
/// of the data as it was before a restore.
async fn free_safety_path(
    stamp: NaiveDateTime,
    name_at: impl Fn(NaiveDateTime) -> PathBuf,
) -> Result<PathBuf> {
    let mut at = stamp;
    for _ in 0..MAX_SAFETY_ATTEMPTS {
        let candidate = name_at(at);
        if !tokio_fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        at += Duration::seconds(1);
    }
    Err(DatabaseError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free safety file name near {}", name_at(stamp).display()),
    )))
}

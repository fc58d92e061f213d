//! Retention policy over backup bundles: keep the newest K, delete the rest

use serde::Serialize;
use tokio::fs as tokio_fs;
use tracing::{info, warn};

use crate::database::Result;
use crate::database::artifacts;
use crate::database::catalog::BackupCatalog;

/// Outcome of a prune run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PruneResult {
    pub deleted: usize,
    pub freed_bytes: u64,
    pub kept: usize,
    pub deleted_ids: Vec<String>,
    /// Bundle directories removed because they had no primary database
    pub purged_incomplete: Vec<String>,
    /// Bundles that could not be deleted, with the cause
    pub failures: Vec<String>,
}

/// Deletes bundles beyond the retention count
#[derive(Debug, Clone)]
pub struct RetentionPolicyEnforcer {
    catalog: BackupCatalog,
}

impl RetentionPolicyEnforcer {
    pub fn new(catalog: BackupCatalog) -> Self {
        Self { catalog }
    }

    /// Keep the `keep` most recent bundles and delete the others
    ///
    /// Bundle directories without a primary database are purged as well; the
    /// caller must make sure no backup is being written at the same time.
    pub async fn prune(&self, keep: usize) -> Result<PruneResult> {
        let bundles = self.catalog.list().await?;
        let mut result = PruneResult {
            kept: bundles.len().min(keep),
            ..PruneResult::default()
        };

        // If we have more bundles than the limit, delete the oldest ones
        for bundle in bundles.iter().skip(keep) {
            match tokio_fs::remove_dir_all(&bundle.path).await {
                Ok(()) => {
                    info!(bundle = %bundle.id, bytes = bundle.total_size_bytes, "pruned backup bundle");
                    result.deleted += 1;
                    result.freed_bytes += bundle.total_size_bytes;
                    result.deleted_ids.push(bundle.id.clone());
                }
                Err(e) => {
                    warn!(bundle = %bundle.id, error = %e, "failed to prune backup bundle");
                    result.failures.push(format!("{}: {}", bundle.id, e));
                }
            }
        }

        for path in self.catalog.incomplete().await? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes = artifacts::bundle_stats(&path)
                .await
                .map(|stats| stats.bytes)
                .unwrap_or(0);
            match tokio_fs::remove_dir_all(&path).await {
                Ok(()) => {
                    warn!(bundle = %name, bytes, "purged incomplete backup bundle");
                    result.freed_bytes += bytes;
                    result.purged_incomplete.push(name);
                }
                Err(e) => {
                    warn!(bundle = %name, error = %e, "failed to purge incomplete backup bundle");
                    result.failures.push(format!("{}: {}", name, e));
                }
            }
        }

        info!(
            deleted = result.deleted,
            purged = result.purged_incomplete.len(),
            freed_bytes = result.freed_bytes,
            kept = result.kept,
            "Retention policy applied"
        );
        Ok(result)
    }
}

//! Enumeration of the backup bundles under the backup root

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tracing::{debug, info, warn};

use crate::database::artifacts::{self, ArtifactCategory};
use crate::database::backup_naming::BundleId;
use crate::database::{DatabaseError, Result};

/// A point-in-time backup directory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupBundle {
    pub id: String,
    pub path: PathBuf,
    pub artifacts: BTreeSet<ArtifactCategory>,
    pub file_count: u64,
    pub total_size_bytes: u64,
}

impl BackupBundle {
    /// Inspect a bundle directory; `None` if it is not a valid bundle
    pub async fn inspect(path: &Path) -> Result<Option<Self>> {
        let Some(id) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(BundleId::from_dir_name)
        else {
            return Ok(None);
        };

        if !artifacts::is_valid_bundle(path).await {
            return Ok(None);
        }

        let stats = artifacts::bundle_stats(path).await?;
        Ok(Some(Self {
            id: id.as_str().to_string(),
            path: path.to_path_buf(),
            artifacts: artifacts::present_categories(path).await,
            file_count: stats.files,
            total_size_bytes: stats.bytes,
        }))
    }

    pub fn bundle_id(&self) -> Option<BundleId> {
        BundleId::parse(&self.id)
    }
}

/// Lists the valid bundles in a backup root, newest first
#[derive(Debug, Clone)]
pub struct BackupCatalog {
    backups_dir: PathBuf,
}

impl BackupCatalog {
    pub fn new<P: Into<PathBuf>>(backups_dir: P) -> Self {
        Self {
            backups_dir: backups_dir.into(),
        }
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    /// Valid bundles ordered newest first
    pub async fn list(&self) -> Result<Vec<BackupBundle>> {
        if !tokio_fs::try_exists(&self.backups_dir).await? {
            return Ok(Vec::new());
        }

        let mut entries = tokio_fs::read_dir(&self.backups_dir).await?;
        let mut bundles: Vec<(BundleId, BackupBundle)> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            match BackupBundle::inspect(&path).await {
                Ok(Some(bundle)) => {
                    if let Some(id) = bundle.bundle_id() {
                        bundles.push((id, bundle));
                    }
                }
                Ok(None) => debug!(path = %path.display(), "skipping non-bundle directory"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to inspect bundle"),
            }
        }

        // Sort bundles by timestamp in descending order
        bundles.sort_by(|(a, _), (b, _)| b.cmp(a));

        Ok(bundles.into_iter().map(|(_, bundle)| bundle).collect())
    }

    /// Bundle-named directories without a primary database, such as one left
    /// behind by an interrupted backup
    pub async fn incomplete(&self) -> Result<Vec<PathBuf>> {
        if !tokio_fs::try_exists(&self.backups_dir).await? {
            return Ok(Vec::new());
        }

        let mut entries = tokio_fs::read_dir(&self.backups_dir).await?;
        let mut incomplete = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path();
            let bundle_named = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(BundleId::from_dir_name)
                .is_some();
            if bundle_named && !artifacts::is_valid_bundle(&path).await {
                incomplete.push(path);
            }
        }
        incomplete.sort();
        Ok(incomplete)
    }

    /// Most recent valid bundle
    pub async fn latest(&self) -> Result<Option<BackupBundle>> {
        Ok(self.list().await?.into_iter().next())
    }

    /// Find a valid bundle by ID
    pub async fn find(&self, id: &str) -> Result<Option<BackupBundle>> {
        Ok(self.list().await?.into_iter().find(|b| b.id == id))
    }

    /// Delete one bundle and everything in it
    pub async fn delete(&self, id: &str) -> Result<BackupBundle> {
        let bundle = self.find(id).await?.ok_or(DatabaseError::BackupNotFound)?;
        tokio_fs::remove_dir_all(&bundle.path).await?;
        info!(bundle = %bundle.id, bytes = bundle.total_size_bytes, "backup bundle deleted");
        Ok(bundle)
    }
}

//! Artifact categories captured in a backup bundle and the rules for copying them
//!
//! Every category maps a live location (resolved through `MaintenancePaths`)
//! to a fixed entry inside the bundle. Copies go through the `FileTransfer`
//! trait and are verified by comparing byte sizes afterwards.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::iter::Sum;
use std::ops::Add;
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tracing::debug;

use crate::config::{MaintenancePaths, companion_of};
use crate::database::{BUNDLE_DATABASE_FILE, DatabaseError, Result};

/// Category of state captured in a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactCategory {
    PrimaryDatabase,
    GeneratedDocuments,
    SecurityKeys,
    Configuration,
    MaintenanceReport,
    Drafts,
    Signatures,
    MasterKey,
    SecondaryConfiguration,
}

/// How a category is copied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyRule {
    /// A single file
    File,
    /// A single file plus its `.bak` companion
    FileWithCompanion,
    /// Regular files directly inside a directory, optionally filtered by extension
    Directory { extension: Option<&'static str> },
}

impl ArtifactCategory {
    pub const ALL: [ArtifactCategory; 9] = [
        ArtifactCategory::PrimaryDatabase,
        ArtifactCategory::GeneratedDocuments,
        ArtifactCategory::SecurityKeys,
        ArtifactCategory::Configuration,
        ArtifactCategory::MaintenanceReport,
        ArtifactCategory::Drafts,
        ArtifactCategory::Signatures,
        ArtifactCategory::MasterKey,
        ArtifactCategory::SecondaryConfiguration,
    ];

    /// Every category except the primary database
    pub fn optional() -> impl Iterator<Item = ArtifactCategory> {
        Self::ALL
            .into_iter()
            .filter(|c| *c != ArtifactCategory::PrimaryDatabase)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactCategory::PrimaryDatabase => "primary-database",
            ArtifactCategory::GeneratedDocuments => "generated-documents",
            ArtifactCategory::SecurityKeys => "security-keys",
            ArtifactCategory::Configuration => "configuration",
            ArtifactCategory::MaintenanceReport => "maintenance-report",
            ArtifactCategory::Drafts => "drafts",
            ArtifactCategory::Signatures => "signatures",
            ArtifactCategory::MasterKey => "master-key",
            ArtifactCategory::SecondaryConfiguration => "secondary-configuration",
        }
    }

    /// Entry name inside a bundle
    pub fn bundle_entry(&self) -> &'static str {
        match self {
            ArtifactCategory::PrimaryDatabase => BUNDLE_DATABASE_FILE,
            ArtifactCategory::GeneratedDocuments => "excel",
            ArtifactCategory::SecurityKeys => "security",
            ArtifactCategory::Configuration => "application.properties",
            ArtifactCategory::MaintenanceReport => "reportes_mantenimiento.dat",
            ArtifactCategory::Drafts => "borradores",
            ArtifactCategory::Signatures => "firmas",
            ArtifactCategory::MasterKey => "master.key",
            ArtifactCategory::SecondaryConfiguration => "config.properties",
        }
    }

    pub fn rule(&self) -> CopyRule {
        match self {
            ArtifactCategory::GeneratedDocuments => CopyRule::Directory {
                extension: Some("xlsx"),
            },
            ArtifactCategory::SecurityKeys
            | ArtifactCategory::Drafts
            | ArtifactCategory::Signatures => CopyRule::Directory { extension: None },
            ArtifactCategory::MaintenanceReport => CopyRule::FileWithCompanion,
            ArtifactCategory::PrimaryDatabase
            | ArtifactCategory::Configuration
            | ArtifactCategory::MasterKey
            | ArtifactCategory::SecondaryConfiguration => CopyRule::File,
        }
    }

    /// Live location of the category
    pub fn live_path(&self, paths: &MaintenancePaths) -> PathBuf {
        match self {
            ArtifactCategory::PrimaryDatabase => paths.database_file.clone(),
            ArtifactCategory::GeneratedDocuments => paths.documents_dir.clone(),
            ArtifactCategory::SecurityKeys => paths.security_dir.clone(),
            ArtifactCategory::Configuration => paths.configuration_file.clone(),
            ArtifactCategory::MaintenanceReport => paths.report_file.clone(),
            ArtifactCategory::Drafts => paths.drafts_dir.clone(),
            ArtifactCategory::Signatures => paths.signatures_dir.clone(),
            ArtifactCategory::MasterKey => paths.master_key_file.clone(),
            ArtifactCategory::SecondaryConfiguration => paths.secondary_config_file.clone(),
        }
    }

    /// Location of the category inside the given bundle
    pub fn bundle_path(&self, bundle: &Path) -> PathBuf {
        bundle.join(self.bundle_entry())
    }
}

impl std::fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// File count and byte total of a set of copied files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopySummary {
    pub files: u64,
    pub bytes: u64,
}

impl CopySummary {
    pub fn file(bytes: u64) -> Self {
        Self { files: 1, bytes }
    }
}

impl Add for CopySummary {
    type Output = CopySummary;

    fn add(self, other: CopySummary) -> CopySummary {
        CopySummary {
            files: self.files + other.files,
            bytes: self.bytes + other.bytes,
        }
    }
}

impl Sum for CopySummary {
    fn sum<I: Iterator<Item = CopySummary>>(iter: I) -> CopySummary {
        iter.fold(CopySummary::default(), Add::add)
    }
}

/// Raw file copy primitive used by the coordinators
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Copy `from` over `to`, returning the number of bytes written
    async fn copy(&self, from: &Path, to: &Path) -> std::io::Result<u64>;
}

/// `FileTransfer` backed by `tokio::fs::copy`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileTransfer;

#[async_trait]
impl FileTransfer for TokioFileTransfer {
    async fn copy(&self, from: &Path, to: &Path) -> std::io::Result<u64> {
        tokio_fs::copy(from, to).await
    }
}

/// Copy a file and confirm the destination has the same byte size as the source
pub async fn copy_verified(transfer: &dyn FileTransfer, from: &Path, to: &Path) -> Result<u64> {
    let expected = tokio_fs::metadata(from).await?.len();
    transfer.copy(from, to).await?;

    let actual = tokio_fs::metadata(to).await?.len();
    if actual != expected {
        return Err(DatabaseError::SizeMismatch {
            path: to.to_path_buf(),
            expected,
            actual,
        });
    }

    Ok(actual)
}

/// Copy one category from `from` to `to` following its rule
///
/// An absent source is not an error: optional categories are simply skipped
/// and yield an empty summary.
pub async fn copy_category(
    transfer: &dyn FileTransfer,
    category: ArtifactCategory,
    from: &Path,
    to: &Path,
) -> Result<CopySummary> {
    match category.rule() {
        CopyRule::File => copy_optional_file(transfer, from, to).await,
        CopyRule::FileWithCompanion => {
            let main = copy_optional_file(transfer, from, to).await?;
            let companion =
                copy_optional_file(transfer, &companion_of(from), &companion_of(to)).await?;
            Ok(main + companion)
        }
        CopyRule::Directory { extension } => copy_directory(transfer, from, to, extension).await,
    }
}

async fn copy_optional_file(
    transfer: &dyn FileTransfer,
    from: &Path,
    to: &Path,
) -> Result<CopySummary> {
    if !tokio_fs::try_exists(from).await? {
        debug!(source = %from.display(), "artifact not present, skipping");
        return Ok(CopySummary::default());
    }
    if let Some(parent) = to.parent() {
        tokio_fs::create_dir_all(parent).await?;
    }
    let bytes = copy_verified(transfer, from, to).await?;
    Ok(CopySummary::file(bytes))
}

async fn copy_directory(
    transfer: &dyn FileTransfer,
    from: &Path,
    to: &Path,
    extension: Option<&str>,
) -> Result<CopySummary> {
    if !tokio_fs::try_exists(from).await? {
        debug!(source = %from.display(), "artifact directory not present, skipping");
        return Ok(CopySummary::default());
    }

    let files = list_files(from).await?;
    let selected: Vec<PathBuf> = files
        .into_iter()
        .filter(|path| match extension {
            Some(ext) => path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(ext)),
            None => true,
        })
        .collect();

    tokio_fs::create_dir_all(to).await?;

    let mut summary = CopySummary::default();
    for path in selected {
        let Some(name) = path.file_name() else {
            continue;
        };
        let bytes = copy_verified(transfer, &path, &to.join(name)).await?;
        summary = summary + CopySummary::file(bytes);
    }

    Ok(summary)
}

/// Regular files directly inside `dir`, sorted by name
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio_fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    Ok(files)
}

/// Count files and bytes in a bundle, descending one level into subdirectories
pub async fn bundle_stats(bundle: &Path) -> Result<CopySummary> {
    let mut summary = CopySummary::default();
    let mut entries = tokio_fs::read_dir(bundle).await?;

    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_file() {
            summary = summary + CopySummary::file(entry.metadata().await?.len());
        } else if file_type.is_dir() {
            let mut children = tokio_fs::read_dir(entry.path()).await?;
            while let Some(child) = children.next_entry().await? {
                let metadata = child.metadata().await?;
                if metadata.is_file() {
                    summary = summary + CopySummary::file(metadata.len());
                }
            }
        }
    }

    Ok(summary)
}

/// Categories with an entry present in the bundle
pub async fn present_categories(bundle: &Path) -> BTreeSet<ArtifactCategory> {
    let mut present = BTreeSet::new();
    for category in ArtifactCategory::ALL {
        if tokio_fs::try_exists(category.bundle_path(bundle))
            .await
            .unwrap_or(false)
        {
            present.insert(category);
        }
    }
    present
}

/// A bundle is valid iff its primary database file is present
pub async fn is_valid_bundle(bundle: &Path) -> bool {
    tokio_fs::metadata(ArtifactCategory::PrimaryDatabase.bundle_path(bundle))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

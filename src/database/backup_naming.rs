//! Backup naming module for generating and parsing timestamp-based bundle IDs
//!
//! Bundle IDs are zero-padded `YYYY-MM-DD_HH-mm-ss` timestamps, so string
//! order equals creation order. Bundles written by older releases use
//! `DD-MM-YYYY_HH-mm-ss`; those still parse, and ordering always goes through
//! the parsed timestamp.

use chrono::{Duration, Local, NaiveDateTime, Timelike};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::database::BUNDLE_PREFIX;

/// Format of newly generated bundle IDs
pub const BUNDLE_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Format of bundle IDs written by older releases
pub const LEGACY_BUNDLE_ID_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";

/// Timestamp format used in pre-restore safety file names
pub const SAFETY_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Structured representation of a parsed bundle ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleId {
    id: String,
    timestamp: NaiveDateTime,
}

impl BundleId {
    /// Generate an ID for the current local time
    pub fn now() -> Self {
        Self::at(Local::now().naive_local())
    }

    /// Generate an ID for the given timestamp
    pub fn at(timestamp: NaiveDateTime) -> Self {
        Self {
            id: timestamp.format(BUNDLE_ID_FORMAT).to_string(),
            // Sub-second precision is not part of the ID
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
        }
    }

    /// ID one second later, used when two bundles are requested in the same second
    pub fn next(&self) -> Self {
        Self::at(self.timestamp + Duration::seconds(1))
    }

    /// Parse a bare ID in either the current or the legacy format
    pub fn parse(id: &str) -> Option<Self> {
        let timestamp = NaiveDateTime::parse_from_str(id, BUNDLE_ID_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(id, LEGACY_BUNDLE_ID_FORMAT))
            .ok()?;

        Some(Self {
            id: id.to_string(),
            timestamp,
        })
    }

    /// Parse a bundle directory name (`backup_<id>`)
    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::parse(name.strip_prefix(BUNDLE_PREFIX)?)
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> &NaiveDateTime {
        &self.timestamp
    }

    /// Directory name of the bundle
    pub fn dir_name(&self) -> String {
        format!("{}{}", BUNDLE_PREFIX, self.id)
    }

    /// Location of the bundle under the backup root
    pub fn bundle_path<P: AsRef<Path>>(&self, backups_dir: P) -> PathBuf {
        backups_dir.as_ref().join(self.dir_name())
    }
}

impl Ord for BundleId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for BundleId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Safety copy of the live database taken before a restore:
/// `<stem>_pre_restore_<yyyyMMdd_HHmmss>.<ext>` beside the database
pub fn database_safety_path(database_file: &Path, at: NaiveDateTime) -> PathBuf {
    let stem = database_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_string());
    let stamp = at.format(SAFETY_STAMP_FORMAT);
    let name = match database_file.extension() {
        Some(ext) => format!("{}_pre_restore_{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}_pre_restore_{}", stem, stamp),
    };
    database_file.with_file_name(name)
}

/// Safety copy of a single artifact file: `<file>.pre-restore.<yyyyMMdd_HHmmss>`
pub fn artifact_safety_path(file: &Path, at: NaiveDateTime) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(format!(".pre-restore.{}", at.format(SAFETY_STAMP_FORMAT)));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn test_generate_bundle_id() {
        let id = BundleId::at(at(2025, 6, 1, 14, 30, 0));

        assert_eq!(id.as_str(), "2025-06-01_14-30-00");
        assert_eq!(id.dir_name(), "backup_2025-06-01_14-30-00");
        assert_eq!(
            id.bundle_path("/backups"),
            Path::new("/backups/backup_2025-06-01_14-30-00")
        );
    }

    #[test]
    fn test_string_order_matches_chronological_order() {
        let times = [
            at(2024, 12, 31, 23, 59, 59),
            at(2025, 1, 1, 0, 0, 0),
            at(2025, 1, 9, 8, 5, 1),
            at(2025, 1, 10, 8, 5, 0),
            at(2025, 10, 2, 0, 0, 0),
        ];

        for a in &times {
            for b in &times {
                let (ia, ib) = (BundleId::at(*a), BundleId::at(*b));
                assert_eq!(ia.as_str().cmp(ib.as_str()), a.cmp(b), "{} vs {}", ia, ib);
                assert_eq!(ia.cmp(&ib), a.cmp(b));
            }
        }
    }

    #[test]
    fn test_parse_bundle_id() {
        let parsed = BundleId::from_dir_name("backup_2025-06-01_14-30-00").unwrap();
        assert_eq!(parsed.as_str(), "2025-06-01_14-30-00");
        assert_eq!(*parsed.timestamp(), at(2025, 6, 1, 14, 30, 0));

        let legacy = BundleId::from_dir_name("backup_01-06-2025_14-30-05").unwrap();
        assert_eq!(legacy.as_str(), "01-06-2025_14-30-05");
        assert_eq!(*legacy.timestamp(), at(2025, 6, 1, 14, 30, 5));
        assert!(legacy > parsed);
    }

    #[test]
    fn test_parse_invalid_bundle_id() {
        assert!(BundleId::from_dir_name("2025-06-01_14-30-00").is_none());
        assert!(BundleId::from_dir_name("backup_2025-06-01").is_none());
        assert!(BundleId::from_dir_name("backup_yesterday").is_none());
        assert!(BundleId::parse("2025-13-01_14-30-00").is_none());
    }

    #[test]
    fn test_next_id_advances_one_second() {
        let id = BundleId::at(at(2025, 6, 1, 23, 59, 59));
        assert_eq!(id.next().as_str(), "2025-06-02_00-00-00");
        assert!(id.next() > id);
    }

    #[test]
    fn test_safety_paths() {
        let stamp = at(2025, 6, 1, 14, 30, 0);

        assert_eq!(
            database_safety_path(Path::new("/data/inventario.db"), stamp),
            Path::new("/data/inventario_pre_restore_20250601_143000.db")
        );
        assert_eq!(
            artifact_safety_path(Path::new("/data/reportes_mantenimiento.dat"), stamp),
            Path::new("/data/reportes_mantenimiento.dat.pre-restore.20250601_143000")
        );
    }
}

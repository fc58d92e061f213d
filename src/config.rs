use std::env;
use std::path::{Path, PathBuf};

use crate::database::{DatabaseError, Result};

/// Default number of bundles kept by the retention policy
pub const DEFAULT_RETENTION_COUNT: usize = 5;

/// Table holding the admin credential; never cleared by a system reset
pub const DEFAULT_CREDENTIAL_TABLE: &str = "usuarios";

/// Mutable tables cleared by a system reset
pub const DEFAULT_RESET_TABLES: &[&str] = &[
    "proyectos",
    "equipos",
    "inventario",
    "movimientos",
    "mantenimientos",
    "reportes",
    "borradores",
    "firmas",
    "auditoria",
];

/// Locations of the live database and every artifact the engine touches
#[derive(Debug, Clone)]
pub struct MaintenancePaths {
    /// Primary SQLite database file
    pub database_file: PathBuf,
    /// Root directory holding backup bundles
    pub backups_dir: PathBuf,
    /// Generated spreadsheet documents
    pub documents_dir: PathBuf,
    /// Encryption key material
    pub security_dir: PathBuf,
    /// Primary configuration file
    pub configuration_file: PathBuf,
    /// Maintenance report file; its companion backup is `<report>.bak`
    pub report_file: PathBuf,
    pub drafts_dir: PathBuf,
    pub signatures_dir: PathBuf,
    pub master_key_file: PathBuf,
    pub secondary_config_file: PathBuf,
    pub logs_dir: PathBuf,
    pub exports_dir: PathBuf,
}

impl MaintenancePaths {
    /// Default layout with everything under one data root
    pub fn under<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            database_file: root.join("inventario.db"),
            backups_dir: root.join("backups"),
            documents_dir: root.join("excel"),
            security_dir: root.join("security"),
            configuration_file: root.join("application.properties"),
            report_file: root.join("reportes_mantenimiento.dat"),
            drafts_dir: root.join("borradores"),
            signatures_dir: root.join("firmas"),
            master_key_file: root.join("master.key"),
            secondary_config_file: root.join("config.properties"),
            logs_dir: root.join("logs"),
            exports_dir: root.join("exports"),
        }
    }

    /// Companion backup of the maintenance report
    pub fn report_companion_file(&self) -> PathBuf {
        companion_of(&self.report_file)
    }

    /// Write-ahead log beside the primary database
    pub fn wal_file(&self) -> PathBuf {
        sidecar_of(&self.database_file, "-wal")
    }

    /// Shared-memory index beside the primary database
    pub fn shm_file(&self) -> PathBuf {
        sidecar_of(&self.database_file, "-shm")
    }

    /// Directory containing the primary database
    pub fn database_dir(&self) -> PathBuf {
        self.database_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// `<file>.bak`
pub fn companion_of(path: &Path) -> PathBuf {
    sidecar_of(path, ".bak")
}

fn sidecar_of(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Configuration for the maintenance engine
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub paths: MaintenancePaths,
    /// Number of bundles kept when pruning
    pub retention_count: usize,
    /// Tables emptied by a system reset
    pub reset_tables: Vec<String>,
    /// Table preserved by a system reset
    pub credential_table: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::with_paths(MaintenancePaths::under("./data"))
    }
}

impl MaintenanceConfig {
    /// Default policy over the given layout
    pub fn with_paths(paths: MaintenancePaths) -> Self {
        Self {
            paths,
            retention_count: DEFAULT_RETENTION_COUNT,
            reset_tables: DEFAULT_RESET_TABLES.iter().map(|t| t.to_string()).collect(),
            credential_table: DEFAULT_CREDENTIAL_TABLE.to_string(),
        }
    }

    /// Load maintenance configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let data_dir = env::var("MAINTENANCE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let mut paths = MaintenancePaths::under(&data_dir);

        if let Ok(file) = env::var("MAINTENANCE_DATABASE_FILE") {
            paths.database_file = PathBuf::from(file);
        }

        if let Ok(dir) = env::var("MAINTENANCE_BACKUP_DIR") {
            paths.backups_dir = PathBuf::from(dir);
        }

        let mut config = Self::with_paths(paths);

        if let Ok(value) = env::var("BACKUP_RETENTION_COUNT") {
            config.retention_count = parse_retention_count(&value)?;
        }

        if let Ok(value) = env::var("RESET_TABLES") {
            config.reset_tables = parse_table_list(&value);
        }

        if let Ok(value) = env::var("CREDENTIAL_TABLE") {
            let value = value.trim();
            if value.is_empty() {
                return Err(DatabaseError::Config("CREDENTIAL_TABLE must not be empty".into()));
            }
            config.credential_table = value.to_string();
        }

        Ok(config)
    }
}

fn parse_retention_count(value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(DatabaseError::Config(
            "BACKUP_RETENTION_COUNT must be at least 1".into(),
        )),
        Ok(count) => Ok(count),
        Err(e) => Err(DatabaseError::Config(format!(
            "invalid BACKUP_RETENTION_COUNT {:?}: {}",
            value, e
        ))),
    }
}

fn parse_table_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

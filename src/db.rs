use async_trait::async_trait;
use sqlx::{
    Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::database::{DatabaseError, Result};

// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Open a connection pool on the given SQLite file
///
/// With `create_if_missing` unset, a missing file is an error instead of a
/// fresh empty database.
pub async fn open_pool(database_file: &Path, create_if_missing: bool) -> Result<DbPool> {
    if create_if_missing {
        if let Some(parent) = database_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }

    // Set up connection options
    let options = SqliteConnectOptions::new()
        .filename(database_file)
        .create_if_missing(create_if_missing)
        .journal_mode(SqliteJournalMode::Wal);

    // Create connection pool
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Lifecycle of the single live database connection pool
///
/// The pool is the only resource the engine hands off explicitly: it is shut
/// down before the primary database file is replaced on disk and initialized
/// again afterwards.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatabaseLifecycle: Send + Sync {
    /// Move pending write-ahead log content into the primary file
    async fn checkpoint(&self) -> Result<()>;

    /// Handle on the live pool
    async fn connection(&self) -> Result<DbPool>;

    /// Close every connection so nothing holds the file open
    async fn shutdown(&self);

    /// Open (or reopen) the pool on the primary file
    async fn initialize(&self) -> Result<()>;
}

/// `DatabaseLifecycle` backed by an sqlx SQLite pool
pub struct SqliteLifecycle {
    database_file: PathBuf,
    create_if_missing: bool,
    pool: RwLock<Option<DbPool>>,
}

impl SqliteLifecycle {
    /// Create a lifecycle for the given file; the pool starts closed
    pub fn new<P: Into<PathBuf>>(database_file: P) -> Self {
        Self {
            database_file: database_file.into(),
            create_if_missing: true,
            pool: RwLock::new(None),
        }
    }

    /// Lifecycle over a file that must already exist; `initialize` fails rather than create it
    pub fn existing<P: Into<PathBuf>>(database_file: P) -> Self {
        Self {
            create_if_missing: false,
            ..Self::new(database_file)
        }
    }

    /// Create a lifecycle and open the pool immediately
    pub async fn open<P: Into<PathBuf>>(database_file: P) -> Result<Self> {
        let lifecycle = Self::new(database_file);
        lifecycle.initialize().await?;
        Ok(lifecycle)
    }
}

/// A TRUNCATE checkpoint answers `busy|log|checkpointed`; busy means it did not finish
fn checkpoint_outcome(busy: i64, log: i64, checkpointed: i64) -> Result<()> {
    if busy != 0 {
        return Err(DatabaseError::CheckpointIncomplete { log, checkpointed });
    }
    Ok(())
}

#[async_trait]
impl DatabaseLifecycle for SqliteLifecycle {
    async fn checkpoint(&self) -> Result<()> {
        let pool = self.connection().await?;
        let (busy, log, checkpointed): (i64, i64, i64) =
            sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE)")
                .fetch_one(&pool)
                .await?;
        checkpoint_outcome(busy, log, checkpointed)?;
        debug!(file = %self.database_file.display(), "WAL checkpoint completed");
        Ok(())
    }

    async fn connection(&self) -> Result<DbPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(DatabaseError::NotInitialized)
    }

    async fn shutdown(&self) {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            info!(file = %self.database_file.display(), "Database pool shut down");
        }
    }

    async fn initialize(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if let Some(old) = guard.take() {
            old.close().await;
        }
        let pool = open_pool(&self.database_file, self.create_if_missing).await?;
        *guard = Some(pool);
        info!(file = %self.database_file.display(), "Database pool initialized");
        Ok(())
    }
}

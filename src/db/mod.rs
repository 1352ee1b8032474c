//! Database module for Cabinet.
//!
//! This module provides SQLite connectivity through a sqlx pool and
//! migration management.

mod schema;

pub use schema::MIGRATIONS;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::Result;

/// Database wrapper owning the connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a database at the specified path.
    ///
    /// The file and its parent directories are created if missing.
    /// Migrations are automatically applied.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open an in-memory database for testing.
    ///
    /// The pool is pinned to one connection that never expires, since every
    /// SQLite memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory database");
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        if !self.table_exists("schema_version").await? {
            return Ok(0);
        }

        let version: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version.0)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        let current_version = self.schema_version().await?;

        if current_version as usize >= MIGRATIONS.len() {
            debug!("Database is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating database from version {} to {}",
            current_version,
            MIGRATIONS.len()
        );

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(current_version as usize) {
            let version = (i + 1) as i64;
            info!("Applying migration v{}", version);

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            debug!("Migration v{} applied successfully", version);
        }

        info!(
            "Database migration complete (now at version {})",
            MIGRATIONS.len()
        );
        Ok(())
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
        )
        .bind(table_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists.0)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

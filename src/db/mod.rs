//! Database module for drivetree.
//!
//! This module provides SQLite connectivity (through a sqlx pool) and
//! migration management.

mod repository;
mod schema;
mod user;

pub use repository::UserRepository;
pub use schema::MIGRATIONS;
pub use user::{NewUser, User};

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::Result;

/// Maximum pooled connections for file-backed databases.
const MAX_CONNECTIONS: u32 = 8;

/// Database wrapper owning the connection pool.
///
/// Cloning is cheap; all clones share the same pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a database at the specified path.
    ///
    /// If the database file doesn't exist, it will be created.
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
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Open an in-memory database for testing.
    ///
    /// The pool holds exactly one connection that never expires, since each
    /// SQLite in-memory connection is its own database.
    pub async fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory database");
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

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

    /// Begin a write transaction.
    ///
    /// The write lock is taken up front (`BEGIN IMMEDIATE`), so concurrent
    /// writers wait out the busy timeout instead of failing on lock upgrade.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        if !self.table_exists("schema_version").await? {
            return Ok(0);
        }

        let version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;

        Ok(version)
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
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
        )
        .bind(table_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Close the pool, waiting for connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap() as usize, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_tables_exist() {
        let db = Database::open_in_memory().await.unwrap();

        for table in ["users", "folders", "files", "pending_blob_deletes"] {
            assert!(db.table_exists(table).await.unwrap(), "missing {table}");
        }
        assert!(!db.table_exists("nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::open_in_memory().await.unwrap();

        let fk_enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(fk_enabled, 1);
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let db = Database::open_in_memory().await.unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            sqlx::query(
                "INSERT INTO users (id, email, display_name, storage_limit, created_at)
                 VALUES ('u1', 'a@example.com', 'A', 100, datetime('now'))",
            )
            .execute(&mut *tx)
            .await
            .unwrap();
            // Dropped without commit
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("drive.db");

        {
            let db = Database::open(&db_path).await.unwrap();
            assert!(db.table_exists("folders").await.unwrap());
            db.close().await;
        }

        // Reopen: migrations must not be reapplied
        let db = Database::open(&db_path).await.unwrap();
        assert_eq!(db.schema_version().await.unwrap() as usize, MIGRATIONS.len());
        db.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_write_transactions_on_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Database::open(temp_dir.path().join("drive.db")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = db.begin().await?;
                // Read before write, as the services do
                let _: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                    .fetch_one(&mut *tx)
                    .await?;
                sqlx::query(
                    "INSERT INTO users (id, email, display_name, storage_limit, created_at)
                     VALUES (?, ?, '', 100, datetime('now'))",
                )
                .bind(format!("u{i}"))
                .bind(format!("u{i}@example.com"))
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok::<_, crate::DriveError>(())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 16);
        db.close().await;
    }
}

//! Blob storage for file content.
//!
//! The drive only needs two operations from a blob store: `put` and
//! `delete`. [`LocalBlobStore`] keeps blobs on disk in a sharded layout;
//! other backends implement [`BlobStore`]. Deletions that fail are queued
//! in `pending_blob_deletes` and retried by [`BlobJanitor`].

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use sqlx::SqliteExecutor;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::{DriveError, Result};

/// Location of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// URL the content can be fetched from.
    pub url: String,
    /// Store-specific reference used for deletion.
    pub public_id: String,
}

/// External binary object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store content. `hint` is the original file name.
    async fn put(&self, bytes: &[u8], hint: &str) -> Result<StoredBlob>;

    /// Delete a blob. Deleting a missing blob succeeds.
    async fn delete(&self, public_id: &str) -> Result<()>;
}

/// Run a blob store call with a deadline.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriveError::Storage(format!(
            "{what} timed out after {}s",
            limit.as_secs_f64()
        ))),
    }
}

/// Blob store on the local filesystem.
///
/// Blobs are stored in a sharded directory structure:
/// ```text
/// {base_path}/
/// ├── ab/
/// │   └── ab12cd34-5678-90ab-cdef-123456789012.txt
/// └── cd/
///     └── cd90ab12-3456-7890-abcd-ef1234567890.bin
/// ```
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `base_path`, creating the directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        let base_path = std::fs::canonicalize(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Read a blob's content.
    pub async fn load(&self, public_id: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(public_id)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DriveError::NotFound(format!("blob {public_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check whether a blob exists.
    pub async fn exists(&self, public_id: &str) -> bool {
        match self.blob_path(public_id) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Full path of a blob: `{base_path}/{shard}/{public_id}`.
    fn blob_path(&self, public_id: &str) -> Result<PathBuf> {
        if public_id.is_empty()
            || public_id.contains(['/', '\\'])
            || public_id.starts_with('.')
        {
            return Err(DriveError::Storage(format!(
                "invalid blob reference: {public_id}"
            )));
        }
        let shard = public_id.get(..2).unwrap_or(public_id);
        Ok(self.base_path.join(shard).join(public_id))
    }

    /// Extension of a file name, `bin` when there is none.
    fn extension(name: &str) -> &str {
        Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin")
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bytes: &[u8], hint: &str) -> Result<StoredBlob> {
        let public_id = format!("{}.{}", Uuid::new_v4(), Self::extension(hint));
        let path = self.blob_path(&public_id)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let url = url::Url::from_file_path(&path)
            .map_err(|_| DriveError::Storage(format!("cannot build URL for {:?}", path)))?;
        debug!("Stored blob {} ({} bytes)", public_id, bytes.len());

        Ok(StoredBlob {
            url: url.to_string(),
            public_id,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        let path = self.blob_path(public_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A blob deletion awaiting retry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingBlobDelete {
    pub id: i64,
    pub public_id: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for the blob deletion retry queue.
pub struct PendingBlobDeleteRepository;

impl PendingBlobDeleteRepository {
    /// Queue a failed deletion.
    pub async fn enqueue<'e, E>(executor: E, public_id: &str, error: &str) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO pending_blob_deletes (public_id, attempts, last_error, created_at, updated_at)
             VALUES (?, 1, ?, ?, ?)",
        )
        .bind(public_id)
        .bind(error)
        .bind(now)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Oldest queued deletions first.
    pub async fn list<'e, E>(executor: E, limit: i64) -> Result<Vec<PendingBlobDelete>>
    where
        E: SqliteExecutor<'e>,
    {
        let pending = sqlx::query_as::<_, PendingBlobDelete>(
            "SELECT id, public_id, attempts, last_error, created_at, updated_at
             FROM pending_blob_deletes ORDER BY updated_at, id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(executor)
        .await?;
        Ok(pending)
    }

    /// Record another failed attempt.
    pub async fn record_failure<'e, E>(executor: E, id: i64, error: &str) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query(
            "UPDATE pending_blob_deletes
             SET attempts = attempts + 1, last_error = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn remove<'e, E>(executor: E, id: i64) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("DELETE FROM pending_blob_deletes WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn count<'e, E>(executor: E) -> Result<i64>
    where
        E: SqliteExecutor<'e>,
    {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM pending_blob_deletes")
            .fetch_one(executor)
            .await?;
        Ok(count)
    }
}

/// Outcome of one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub deleted: usize,
    pub abandoned: usize,
}

/// Best-effort blob deletion with a persistent retry queue.
pub struct BlobJanitor<'a> {
    db: &'a Database,
    blobs: &'a dyn BlobStore,
    timeout: Duration,
    max_attempts: i64,
}

/// Deletions retried per pass.
const RETRY_BATCH: i64 = 100;

impl<'a> BlobJanitor<'a> {
    pub fn new(db: &'a Database, blobs: &'a dyn BlobStore, timeout: Duration, max_attempts: i64) -> Self {
        Self {
            db,
            blobs,
            timeout,
            max_attempts,
        }
    }

    /// Delete blobs concurrently, queueing each failure for retry.
    ///
    /// Returns the number of deletions that failed. A failure that cannot be
    /// queued is logged and the rest of the batch is still processed.
    pub async fn delete_or_enqueue(&self, public_ids: &[String]) -> usize {
        let attempts = public_ids.iter().map(|public_id| async move {
            let result = with_timeout(self.timeout, "blob delete", self.blobs.delete(public_id)).await;
            (public_id, result)
        });

        let mut failures = 0;
        for (public_id, result) in join_all(attempts).await {
            if let Err(e) = result {
                failures += 1;
                match PendingBlobDeleteRepository::enqueue(self.db.pool(), public_id, &e.to_string())
                    .await
                {
                    Ok(()) => warn!("Failed to delete blob {}, queued for retry: {}", public_id, e),
                    Err(queue_err) => error!(
                        "Failed to delete blob {} ({}) and could not queue it: {}",
                        public_id, e, queue_err
                    ),
                }
            }
        }
        failures
    }

    /// Retry queued deletions, abandoning entries that reach the attempt limit.
    pub async fn retry_pending(&self) -> Result<RetryReport> {
        let pending = PendingBlobDeleteRepository::list(self.db.pool(), RETRY_BATCH).await?;
        let mut report = RetryReport::default();

        for entry in pending {
            report.attempted += 1;
            let result =
                with_timeout(self.timeout, "blob delete", self.blobs.delete(&entry.public_id)).await;
            match result {
                Ok(()) => {
                    PendingBlobDeleteRepository::remove(self.db.pool(), entry.id).await?;
                    report.deleted += 1;
                }
                Err(e) if entry.attempts + 1 >= self.max_attempts => {
                    error!(
                        "Giving up on blob {} after {} attempts: {}",
                        entry.public_id,
                        entry.attempts + 1,
                        e
                    );
                    PendingBlobDeleteRepository::remove(self.db.pool(), entry.id).await?;
                    report.abandoned += 1;
                }
                Err(e) => {
                    PendingBlobDeleteRepository::record_failure(self.db.pool(), entry.id, &e.to_string())
                        .await?;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                "Blob retry pass: {} attempted, {} deleted, {} abandoned",
                report.attempted, report.deleted, report.abandoned
            );
        }
        Ok(report)
    }
}

//! File metadata types and repository.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use super::folder::SUBTREE_CTE;
use super::node::SharedWith;
use crate::{DriveError, Result};

const FILE_COLUMNS: &str = "id, owner_id, folder_id, name, original_name, size, mime_type, url,
     public_id, tags, version, path, is_deleted, deleted_at, is_public, shared_with,
     share_token, created_at, updated_at";

/// Ordered list of file tags, stored as a JSON column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(pub Vec<String>);

impl Tags {
    pub(crate) fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.0)
            .map_err(|e| DriveError::Database(format!("failed to encode tags: {e}")))
    }
}

impl TryFrom<String> for Tags {
    type Error = serde_json::Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        serde_json::from_str(&s).map(Tags)
    }
}

/// Metadata of a stored file.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DriveFile {
    /// Unique file ID.
    pub id: String,
    /// Owner principal ID.
    pub owner_id: String,
    /// Containing folder (None at the drive root).
    pub folder_id: Option<String>,
    /// Display name.
    pub name: String,
    /// Name the file was uploaded with.
    pub original_name: String,
    /// Size in bytes.
    pub size: i64,
    pub mime_type: String,
    /// Blob URL.
    pub url: String,
    /// Blob store reference.
    pub public_id: String,
    #[sqlx(try_from = "String")]
    pub tags: Tags,
    /// Version counter, starting at 1.
    pub version: i64,
    /// Materialized path.
    pub path: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_public: bool,
    #[sqlx(try_from = "String")]
    pub shared_with: SharedWith,
    pub share_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Blob reference and size of a file about to be purged.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PurgedBlob {
    pub id: String,
    pub public_id: String,
    pub size: i64,
}

/// Repository for file rows.
pub struct FileRepository;

impl FileRepository {
    /// Insert a fully-populated file row.
    pub async fn insert<'e, E>(executor: E, file: &DriveFile) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO files (id, owner_id, folder_id, name, original_name, size, mime_type,
                                url, public_id, tags, version, path, is_deleted, deleted_at,
                                is_public, shared_with, share_token, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&file.id)
        .bind(&file.owner_id)
        .bind(&file.folder_id)
        .bind(&file.name)
        .bind(&file.original_name)
        .bind(file.size)
        .bind(&file.mime_type)
        .bind(&file.url)
        .bind(&file.public_id)
        .bind(file.tags.to_json()?)
        .bind(file.version)
        .bind(&file.path)
        .bind(file.is_deleted)
        .bind(file.deleted_at)
        .bind(file.is_public)
        .bind(file.shared_with.to_json()?)
        .bind(&file.share_token)
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Get a file by ID, whatever its delete state.
    pub async fn get_by_id<'e, E>(executor: E, id: &str) -> Result<Option<DriveFile>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?");
        let file = sqlx::query_as::<_, DriveFile>(&sql)
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(file)
    }

    /// Get the file carrying a share token.
    pub async fn get_by_share_token<'e, E>(executor: E, token: &str) -> Result<Option<DriveFile>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE share_token = ?");
        let file = sqlx::query_as::<_, DriveFile>(&sql)
            .bind(token)
            .fetch_optional(executor)
            .await?;
        Ok(file)
    }

    /// List live files in a folder (None for the drive root).
    pub async fn list_children<'e, E>(
        executor: E,
        owner_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Vec<DriveFile>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ? AND folder_id IS ? AND is_deleted = 0
             ORDER BY name, id"
        );
        let files = sqlx::query_as::<_, DriveFile>(&sql)
            .bind(owner_id)
            .bind(folder_id)
            .fetch_all(executor)
            .await?;
        Ok(files)
    }

    /// List every trashed file of an owner.
    pub async fn list_deleted<'e, E>(executor: E, owner_id: &str) -> Result<Vec<DriveFile>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ? AND is_deleted = 1
             ORDER BY deleted_at DESC, path"
        );
        let files = sqlx::query_as::<_, DriveFile>(&sql)
            .bind(owner_id)
            .fetch_all(executor)
            .await?;
        Ok(files)
    }

    /// IDs of trashed files whose folder is live or absent.
    pub async fn list_trash_roots<'e, E>(executor: E, owner_id: &str) -> Result<Vec<String>>
    where
        E: SqliteExecutor<'e>,
    {
        let ids = sqlx::query_scalar(
            "SELECT f.id FROM files f
             LEFT JOIN folders p ON p.id = f.folder_id
             WHERE f.owner_id = ? AND f.is_deleted = 1
               AND (p.id IS NULL OR p.is_deleted = 0)
             ORDER BY f.path",
        )
        .bind(owner_id)
        .fetch_all(executor)
        .await?;
        Ok(ids)
    }

    /// List live files that explicitly grant access to a principal.
    pub async fn list_shared_with<'e, E>(executor: E, user_id: &str) -> Result<Vec<DriveFile>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE is_deleted = 0 AND EXISTS (
                 SELECT 1 FROM json_each(files.shared_with)
                 WHERE json_extract(json_each.value, '$.user_id') = ?
             )
             ORDER BY path"
        );
        let files = sqlx::query_as::<_, DriveFile>(&sql)
            .bind(user_id)
            .fetch_all(executor)
            .await?;
        Ok(files)
    }

    /// Set a file's name and path.
    pub async fn set_name<'e, E>(
        executor: E,
        id: &str,
        name: &str,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("UPDATE files SET name = ?, path = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(path)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Set a file's folder and path.
    pub async fn set_folder<'e, E>(
        executor: E,
        id: &str,
        folder_id: Option<&str>,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("UPDATE files SET folder_id = ?, path = ?, updated_at = ? WHERE id = ?")
            .bind(folder_id)
            .bind(path)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Replace a file's tags.
    pub async fn set_tags<'e, E>(executor: E, id: &str, tags: &Tags, now: DateTime<Utc>) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("UPDATE files SET tags = ?, updated_at = ? WHERE id = ?")
            .bind(tags.to_json()?)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Replace the `old_path` prefix with `new_path` on every file inside the
    /// folder subtree rooted at `root_id`.
    pub async fn rewrite_subtree_paths<'e, E>(
        executor: E,
        root_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<u64>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "{SUBTREE_CTE}
             UPDATE files SET path = ? || substr(path, ?)
             WHERE folder_id IN (SELECT id FROM subtree)"
        );
        let result = sqlx::query(&sql)
            .bind(root_id)
            .bind(new_path)
            .bind(old_path.chars().count() as i64 + 1)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Set the delete state of every file inside the folder subtree rooted
    /// at `root_id`.
    pub async fn mark_subtree<'e, E>(
        executor: E,
        root_id: &str,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Result<u64>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "{SUBTREE_CTE}
             UPDATE files SET is_deleted = ?, deleted_at = ?
             WHERE folder_id IN (SELECT id FROM subtree)"
        );
        let result = sqlx::query(&sql)
            .bind(root_id)
            .bind(deleted_at.is_some())
            .bind(deleted_at)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Set the delete state of a single file.
    pub async fn mark<'e, E>(executor: E, id: &str, deleted_at: Option<DateTime<Utc>>) -> Result<u64>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("UPDATE files SET is_deleted = ?, deleted_at = ? WHERE id = ?")
            .bind(deleted_at.is_some())
            .bind(deleted_at)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Blob references of every file inside the folder subtree rooted at
    /// `root_id`.
    pub async fn list_subtree_blobs<'e, E>(executor: E, root_id: &str) -> Result<Vec<PurgedBlob>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "{SUBTREE_CTE}
             SELECT id, public_id, size FROM files
             WHERE folder_id IN (SELECT id FROM subtree)"
        );
        let blobs = sqlx::query_as::<_, PurgedBlob>(&sql)
            .bind(root_id)
            .fetch_all(executor)
            .await?;
        Ok(blobs)
    }

    /// Delete every file inside the folder subtree rooted at `root_id`.
    pub async fn delete_subtree<'e, E>(executor: E, root_id: &str) -> Result<u64>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "{SUBTREE_CTE}
             DELETE FROM files WHERE folder_id IN (SELECT id FROM subtree)"
        );
        let result = sqlx::query(&sql).bind(root_id).execute(executor).await?;
        Ok(result.rows_affected())
    }

    /// Delete a single file row.
    pub async fn delete<'e, E>(executor: E, id: &str) -> Result<bool>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

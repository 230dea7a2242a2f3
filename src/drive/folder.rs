//! Folder types and repository.

use chrono::{DateTime, Utc};
use sqlx::SqliteExecutor;

use super::node::SharedWith;
use super::DEFAULT_FOLDER_COLOR;
use crate::Result;

/// Folder subtree rooted at the first bound parameter, walked over
/// parent links.
pub(crate) const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (
    SELECT id FROM folders WHERE id = ?
    UNION
    SELECT f.id FROM folders f JOIN subtree s ON f.parent_id = s.id
)";

const FOLDER_COLUMNS: &str = "id, owner_id, parent_id, name, color, path, is_deleted, deleted_at,
     is_public, shared_with, share_token, created_at, updated_at";

/// A folder in an owner's drive.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Folder {
    /// Unique folder ID.
    pub id: String,
    /// Owner principal ID.
    pub owner_id: String,
    /// Parent folder ID (None at the drive root).
    pub parent_id: Option<String>,
    /// Folder name.
    pub name: String,
    /// Display color (`#RRGGBB`).
    pub color: String,
    /// Materialized path.
    pub path: String,
    /// Whether the folder is in the trash.
    pub is_deleted: bool,
    /// When the folder was moved to the trash.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Readable by anyone.
    pub is_public: bool,
    /// Explicit grants.
    #[sqlx(try_from = "String")]
    pub shared_with: SharedWith,
    /// Share link token.
    pub share_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for creating a new folder.
#[derive(Debug, Clone)]
pub struct NewFolder {
    /// Folder name.
    pub name: String,
    /// Parent folder ID (None for the drive root).
    pub parent_id: Option<String>,
    /// Display color.
    pub color: String,
}

impl NewFolder {
    /// Create a new root-level NewFolder with the default color.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_id: None,
            color: DEFAULT_FOLDER_COLOR.to_string(),
        }
    }

    /// Set the parent folder.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }
}

/// Name collision found while restoring a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreConflict {
    pub name: String,
    /// Both folders are inside the restored subtree: a child was trashed,
    /// replaced by a new one of the same name, then the parent was trashed.
    pub within_trash: bool,
}

/// Repository for folder rows.
///
/// Every function runs a single statement against any executor, so callers
/// decide whether it joins a transaction.
pub struct FolderRepository;

impl FolderRepository {
    /// Insert a fully-populated folder row.
    pub async fn insert<'e, E>(executor: E, folder: &Folder) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO folders (id, owner_id, parent_id, name, color, path, is_deleted,
                                  deleted_at, is_public, shared_with, share_token,
                                  created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&folder.id)
        .bind(&folder.owner_id)
        .bind(&folder.parent_id)
        .bind(&folder.name)
        .bind(&folder.color)
        .bind(&folder.path)
        .bind(folder.is_deleted)
        .bind(folder.deleted_at)
        .bind(folder.is_public)
        .bind(folder.shared_with.to_json()?)
        .bind(&folder.share_token)
        .bind(folder.created_at)
        .bind(folder.updated_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Get a folder by ID, whatever its delete state.
    pub async fn get_by_id<'e, E>(executor: E, id: &str) -> Result<Option<Folder>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?");
        let folder = sqlx::query_as::<_, Folder>(&sql)
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(folder)
    }

    /// Get the folder carrying a share token.
    pub async fn get_by_share_token<'e, E>(executor: E, token: &str) -> Result<Option<Folder>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE share_token = ?");
        let folder = sqlx::query_as::<_, Folder>(&sql)
            .bind(token)
            .fetch_optional(executor)
            .await?;
        Ok(folder)
    }

    /// Find a live folder named `name` under `parent_id` for an owner,
    /// optionally ignoring one folder.
    pub async fn find_live_sibling<'e, E>(
        executor: E,
        owner_id: &str,
        parent_id: Option<&str>,
        name: &str,
        exclude_id: Option<&str>,
    ) -> Result<Option<Folder>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE owner_id = ? AND parent_id IS ? AND name = ? AND is_deleted = 0
               AND id IS NOT ?
             LIMIT 1"
        );
        let folder = sqlx::query_as::<_, Folder>(&sql)
            .bind(owner_id)
            .bind(parent_id)
            .bind(name)
            .bind(exclude_id)
            .fetch_optional(executor)
            .await?;
        Ok(folder)
    }

    /// List live child folders of a parent (None for the drive root).
    pub async fn list_children<'e, E>(
        executor: E,
        owner_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Vec<Folder>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE owner_id = ? AND parent_id IS ? AND is_deleted = 0
             ORDER BY name, id"
        );
        let folders = sqlx::query_as::<_, Folder>(&sql)
            .bind(owner_id)
            .bind(parent_id)
            .fetch_all(executor)
            .await?;
        Ok(folders)
    }

    /// List every trashed folder of an owner.
    pub async fn list_deleted<'e, E>(executor: E, owner_id: &str) -> Result<Vec<Folder>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE owner_id = ? AND is_deleted = 1
             ORDER BY deleted_at DESC, path"
        );
        let folders = sqlx::query_as::<_, Folder>(&sql)
            .bind(owner_id)
            .fetch_all(executor)
            .await?;
        Ok(folders)
    }

    /// IDs of trashed folders whose parent is live or absent.
    pub async fn list_trash_roots<'e, E>(executor: E, owner_id: &str) -> Result<Vec<String>>
    where
        E: SqliteExecutor<'e>,
    {
        let ids = sqlx::query_scalar(
            "SELECT f.id FROM folders f
             LEFT JOIN folders p ON p.id = f.parent_id
             WHERE f.owner_id = ? AND f.is_deleted = 1
               AND (p.id IS NULL OR p.is_deleted = 0)
             ORDER BY f.path",
        )
        .bind(owner_id)
        .fetch_all(executor)
        .await?;
        Ok(ids)
    }

    /// List live folders that explicitly grant access to a principal.
    pub async fn list_shared_with<'e, E>(executor: E, user_id: &str) -> Result<Vec<Folder>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE is_deleted = 0 AND EXISTS (
                 SELECT 1 FROM json_each(folders.shared_with)
                 WHERE json_extract(json_each.value, '$.user_id') = ?
             )
             ORDER BY path"
        );
        let folders = sqlx::query_as::<_, Folder>(&sql)
            .bind(user_id)
            .fetch_all(executor)
            .await?;
        Ok(folders)
    }

    /// Set a folder's name.
    pub async fn set_name<'e, E>(executor: E, id: &str, name: &str, now: DateTime<Utc>) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("UPDATE folders SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Set a folder's parent.
    pub async fn set_parent<'e, E>(
        executor: E,
        id: &str,
        parent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("UPDATE folders SET parent_id = ?, updated_at = ? WHERE id = ?")
            .bind(parent_id)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Set a folder's color.
    pub async fn set_color<'e, E>(executor: E, id: &str, color: &str, now: DateTime<Utc>) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query("UPDATE folders SET color = ?, updated_at = ? WHERE id = ?")
            .bind(color)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Replace the `old_path` prefix with `new_path` on every folder of the
    /// subtree rooted at `root_id`, root included.
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
             UPDATE folders SET path = ? || substr(path, ?)
             WHERE id IN (SELECT id FROM subtree)"
        );
        let result = sqlx::query(&sql)
            .bind(root_id)
            .bind(new_path)
            .bind(old_path.chars().count() as i64 + 1)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// Deepest path depth found in the subtree rooted at `root_id`.
    pub async fn max_subtree_depth<'e, E>(executor: E, root_id: &str) -> Result<i64>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "{SUBTREE_CTE}
             SELECT COALESCE(MAX(length(path) - length(replace(path, '/', ''))), 0)
             FROM folders WHERE id IN (SELECT id FROM subtree)"
        );
        let depth: i64 = sqlx::query_scalar(&sql)
            .bind(root_id)
            .fetch_one(executor)
            .await?;
        Ok(depth)
    }

    /// Set the delete state of every folder in the subtree rooted at `root_id`.
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
             UPDATE folders SET is_deleted = ?, deleted_at = ?
             WHERE id IN (SELECT id FROM subtree)"
        );
        let result = sqlx::query(&sql)
            .bind(root_id)
            .bind(deleted_at.is_some())
            .bind(deleted_at)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// A folder name that would be duplicated among live siblings if the
    /// subtree rooted at `root_id` were restored.
    pub async fn find_restore_conflict<'e, E>(
        executor: E,
        owner_id: &str,
        root_id: &str,
    ) -> Result<Option<RestoreConflict>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "{SUBTREE_CTE}
             SELECT name, SUM(is_deleted = 0) AS live
             FROM folders
             WHERE owner_id = ? AND (is_deleted = 0 OR id IN (SELECT id FROM subtree))
             GROUP BY COALESCE(parent_id, ''), name
             HAVING COUNT(*) > 1
             LIMIT 1"
        );
        let row: Option<(String, i64)> = sqlx::query_as(&sql)
            .bind(root_id)
            .bind(owner_id)
            .fetch_optional(executor)
            .await?;
        Ok(row.map(|(name, live)| RestoreConflict {
            name,
            within_trash: live == 0,
        }))
    }

    /// Delete every folder in the subtree rooted at `root_id`.
    ///
    /// Files inside the subtree must be removed first.
    pub async fn delete_subtree<'e, E>(executor: E, root_id: &str) -> Result<u64>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "{SUBTREE_CTE}
             DELETE FROM folders WHERE id IN (SELECT id FROM subtree)"
        );
        let result = sqlx::query(&sql).bind(root_id).execute(executor).await?;
        Ok(result.rows_affected())
    }
}

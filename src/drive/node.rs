//! Node types shared by folders and files.
//!
//! Folders and files are stored in separate tables but expose the same
//! capability set (path, owner, parent linkage, delete state, sharing)
//! through the [`Node`] tagged variant, so trash and permission logic is
//! written once.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;

use super::file::DriveFile;
use super::folder::Folder;
use crate::{DriveError, Result};

/// Kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

impl NodeKind {
    /// Table holding nodes of this kind.
    pub(crate) fn table(&self) -> &'static str {
        match self {
            NodeKind::Folder => "folders",
            NodeKind::File => "files",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Folder => "folder",
            NodeKind::File => "file",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission carried by an explicit share grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePermission {
    Read,
    Write,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharePermission::Read => "read",
            SharePermission::Write => "write",
        }
    }
}

impl fmt::Display for SharePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SharePermission {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "read" => Ok(SharePermission::Read),
            "write" => Ok(SharePermission::Write),
            _ => Err(DriveError::Validation(format!(
                "unknown share permission: {s}"
            ))),
        }
    }
}

/// One explicit grant in a node's share list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    /// Grantee principal id.
    pub user_id: String,
    /// Granted permission.
    pub permission: SharePermission,
    /// When the grant was created or last changed.
    pub shared_at: DateTime<Utc>,
}

/// Ordered list of grants, stored as a JSON column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedWith(pub Vec<ShareGrant>);

impl SharedWith {
    /// Find the grant for a principal.
    pub fn grant_for(&self, user_id: &str) -> Option<&ShareGrant> {
        self.0.iter().find(|g| g.user_id == user_id)
    }

    /// Insert a grant, or update the permission of an existing one in place.
    pub fn upsert(&mut self, user_id: &str, permission: SharePermission, now: DateTime<Utc>) {
        match self.0.iter_mut().find(|g| g.user_id == user_id) {
            Some(grant) => {
                grant.permission = permission;
                grant.shared_at = now;
            }
            None => self.0.push(ShareGrant {
                user_id: user_id.to_string(),
                permission,
                shared_at: now,
            }),
        }
    }

    /// Remove a principal's grant. Returns `true` if one was removed.
    pub fn remove(&mut self, user_id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|g| g.user_id != user_id);
        self.0.len() != before
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.0)
            .map_err(|e| DriveError::Database(format!("failed to encode share list: {e}")))
    }
}

impl TryFrom<String> for SharedWith {
    type Error = serde_json::Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        serde_json::from_str(&s).map(SharedWith)
    }
}

/// Sharing state of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareSettings {
    pub is_public: bool,
    pub shared_with: Vec<ShareGrant>,
}

/// A folder or a file.
#[derive(Debug, Clone)]
pub enum Node {
    Folder(Folder),
    File(DriveFile),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Folder(_) => NodeKind::Folder,
            Node::File(_) => NodeKind::File,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Node::Folder(f) => &f.id,
            Node::File(f) => &f.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Folder(f) => &f.name,
            Node::File(f) => &f.name,
        }
    }

    pub fn owner_id(&self) -> &str {
        match self {
            Node::Folder(f) => &f.owner_id,
            Node::File(f) => &f.owner_id,
        }
    }

    /// Id of the containing folder (`None` at the drive root).
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Node::Folder(f) => f.parent_id.as_deref(),
            Node::File(f) => f.folder_id.as_deref(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Node::Folder(f) => &f.path,
            Node::File(f) => &f.path,
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            Node::Folder(f) => f.is_deleted,
            Node::File(f) => f.is_deleted,
        }
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Node::Folder(f) => f.deleted_at,
            Node::File(f) => f.deleted_at,
        }
    }

    pub fn is_public(&self) -> bool {
        match self {
            Node::Folder(f) => f.is_public,
            Node::File(f) => f.is_public,
        }
    }

    pub fn shared_with(&self) -> &SharedWith {
        match self {
            Node::Folder(f) => &f.shared_with,
            Node::File(f) => &f.shared_with,
        }
    }

    pub fn share_token(&self) -> Option<&str> {
        match self {
            Node::Folder(f) => f.share_token.as_deref(),
            Node::File(f) => f.share_token.as_deref(),
        }
    }

    pub fn share_settings(&self) -> ShareSettings {
        ShareSettings {
            is_public: self.is_public(),
            shared_with: self.shared_with().0.clone(),
        }
    }

    /// Collaborator-facing description of this node.
    pub fn descriptor(&self) -> NodeDescriptor {
        let (created_at, updated_at) = match self {
            Node::Folder(f) => (f.created_at, f.updated_at),
            Node::File(f) => (f.created_at, f.updated_at),
        };
        let file = match self {
            Node::Folder(_) => None,
            Node::File(f) => Some(FileDetails {
                size: f.size,
                mime_type: f.mime_type.clone(),
                url: f.url.clone(),
                version: f.version,
            }),
        };

        NodeDescriptor {
            id: self.id().to_string(),
            kind: self.kind(),
            name: self.name().to_string(),
            path: self.path().to_string(),
            parent_id: self.parent_id().map(str::to_string),
            owner_id: self.owner_id().to_string(),
            is_deleted: self.is_deleted(),
            created_at,
            updated_at,
            file,
        }
    }
}

impl From<Folder> for Node {
    fn from(folder: Folder) -> Self {
        Node::Folder(folder)
    }
}

impl From<DriveFile> for Node {
    fn from(file: DriveFile) -> Self {
        Node::File(file)
    }
}

/// File-only fields of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDetails {
    pub size: i64,
    pub mime_type: String,
    pub url: String,
    pub version: i64,
}

/// Node descriptor exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDescriptor {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub path: String,
    pub parent_id: Option<String>,
    pub owner_id: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub file: Option<FileDetails>,
}

/// One entry of a breadcrumb trail.
///
/// The first entry is always the synthetic drive root with no id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreadcrumbEntry {
    pub id: Option<String>,
    pub name: String,
    pub path: String,
}

/// Kind-independent node queries.
pub struct NodeStore;

impl NodeStore {
    /// Find a node by id in either table.
    pub async fn find(conn: &mut sqlx::SqliteConnection, id: &str) -> Result<Option<Node>> {
        if let Some(folder) = super::folder::FolderRepository::get_by_id(&mut *conn, id).await? {
            return Ok(Some(Node::Folder(folder)));
        }
        let file = super::file::FileRepository::get_by_id(&mut *conn, id).await?;
        Ok(file.map(Node::File))
    }

    /// Find a node that is not in the trash, or `NotFound`.
    pub async fn find_live(conn: &mut sqlx::SqliteConnection, id: &str) -> Result<Node> {
        match Self::find(conn, id).await? {
            Some(node) if !node.is_deleted() => Ok(node),
            _ => Err(DriveError::NotFound("node".to_string())),
        }
    }

    /// Overwrite a node's share settings.
    pub async fn set_share_settings<'e, E>(
        executor: E,
        kind: NodeKind,
        id: &str,
        is_public: bool,
        shared_with: &SharedWith,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "UPDATE {} SET is_public = ?, shared_with = ?, updated_at = ? WHERE id = ?",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(is_public)
            .bind(shared_with.to_json()?)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Set or clear a node's share token.
    pub async fn set_share_token<'e, E>(
        executor: E,
        kind: NodeKind,
        id: &str,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!(
            "UPDATE {} SET share_token = ?, updated_at = ? WHERE id = ?",
            kind.table()
        );
        sqlx::query(&sql)
            .bind(token)
            .bind(now)
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Check whether a share token is already taken by any node.
    pub async fn share_token_exists<'e, E>(executor: E, token: &str) -> Result<bool>
    where
        E: SqliteExecutor<'e>,
    {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM folders WHERE share_token = ?1)
                 OR EXISTS(SELECT 1 FROM files WHERE share_token = ?1)",
        )
        .bind(token)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    /// Find the node carrying a share token.
    pub async fn find_by_share_token(
        conn: &mut sqlx::SqliteConnection,
        token: &str,
    ) -> Result<Option<Node>> {
        if let Some(folder) =
            super::folder::FolderRepository::get_by_share_token(&mut *conn, token).await?
        {
            return Ok(Some(Node::Folder(folder)));
        }
        let file = super::file::FileRepository::get_by_share_token(&mut *conn, token).await?;
        Ok(file.map(Node::File))
    }
}

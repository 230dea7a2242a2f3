//! Trash lifecycle: soft-delete, restore and permanent deletion.
//!
//! A cascade applies to a node and its whole subtree, including the files
//! inside every folder of that subtree, in one transaction. Blob deletions
//! run after the transaction commits and the owner lock is released.

use chrono::Utc;
use tracing::info;

use super::file::{FileRepository, PurgedBlob};
use super::folder::FolderRepository;
use super::node::{Node, NodeDescriptor, NodeStore};
use super::permission;
use super::quota::{FileEvent, QuotaTracker};
use super::Drive;
use crate::{DriveError, Result};

/// Number of rows a soft-delete or restore changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    pub folders: u64,
    pub files: u64,
}

/// Outcome of a permanent deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub folders: u64,
    pub files: u64,
    /// Total size of the removed files.
    pub bytes_freed: i64,
    /// Blob deletions that failed and were queued for retry.
    pub blob_failures: usize,
}

impl PurgeSummary {
    fn merge(&mut self, other: PurgeSummary) {
        self.folders += other.folders;
        self.files += other.files;
        self.bytes_freed += other.bytes_freed;
        self.blob_failures += other.blob_failures;
    }
}

/// Trashed nodes of an owner.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TrashListing {
    pub folders: Vec<NodeDescriptor>,
    pub files: Vec<NodeDescriptor>,
}

impl TrashListing {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }
}

/// Cascading trash operations. All of them are owner-only.
pub struct TrashCascade<'a> {
    drive: &'a Drive,
}

impl<'a> TrashCascade<'a> {
    pub fn new(drive: &'a Drive) -> Self {
        Self { drive }
    }

    /// Move a live node and everything below it to the trash.
    pub async fn soft_delete(&self, node_id: &str, principal_id: &str) -> Result<CascadeSummary> {
        let owner_id = self.drive.live_node(node_id).await?.owner_id().to_string();
        let _guard = self.drive.locks().lock(&owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        let node = find_in_state(&mut tx, node_id, false).await?;
        permission::require_owner(&node, principal_id)?;

        let now = Utc::now();
        let summary = match &node {
            Node::Folder(folder) => CascadeSummary {
                folders: FolderRepository::mark_subtree(&mut *tx, &folder.id, Some(now)).await?,
                files: FileRepository::mark_subtree(&mut *tx, &folder.id, Some(now)).await?,
            },
            Node::File(file) => CascadeSummary {
                folders: 0,
                files: FileRepository::mark(&mut *tx, &file.id, Some(now)).await?,
            },
        };
        tx.commit().await?;

        info!(
            "Moved {} {} to trash ({} folders, {} files)",
            node.kind(),
            node.path(),
            summary.folders,
            summary.files
        );
        Ok(summary)
    }

    /// Bring a trashed node and everything below it back.
    ///
    /// The node's parent must be live, and no restored folder may collide
    /// with a live sibling.
    pub async fn restore(&self, node_id: &str, principal_id: &str) -> Result<CascadeSummary> {
        let owner_id = self.drive.any_node(node_id).await?.owner_id().to_string();
        let _guard = self.drive.locks().lock(&owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        let node = find_in_state(&mut tx, node_id, true).await?;
        permission::require_owner(&node, principal_id)?;

        if let Some(parent_id) = node.parent_id() {
            let parent = FolderRepository::get_by_id(&mut *tx, parent_id).await?;
            if parent.map_or(true, |p| p.is_deleted) {
                return Err(DriveError::Conflict(format!(
                    "cannot restore '{}': its parent folder is in the trash",
                    node.name()
                )));
            }
        }

        let summary = match &node {
            Node::Folder(folder) => {
                if let Some(conflict) =
                    FolderRepository::find_restore_conflict(&mut *tx, &folder.owner_id, &folder.id)
                        .await?
                {
                    let message = if conflict.within_trash {
                        format!(
                            "cannot restore '{}': it contains two folders named '{}'; \
                             permanently delete the older one first",
                            folder.name, conflict.name
                        )
                    } else {
                        format!("cannot restore: a folder named '{}' already exists", conflict.name)
                    };
                    return Err(DriveError::Conflict(message));
                }
                CascadeSummary {
                    folders: FolderRepository::mark_subtree(&mut *tx, &folder.id, None).await?,
                    files: FileRepository::mark_subtree(&mut *tx, &folder.id, None).await?,
                }
            }
            Node::File(file) => CascadeSummary {
                folders: 0,
                files: FileRepository::mark(&mut *tx, &file.id, None).await?,
            },
        };
        tx.commit().await?;

        info!(
            "Restored {} {} ({} folders, {} files)",
            node.kind(),
            node.path(),
            summary.folders,
            summary.files
        );
        Ok(summary)
    }

    /// Irreversibly remove a trashed node and everything below it.
    ///
    /// Metadata removal and the quota decrement commit together. Blob
    /// deletions follow; their failures are queued, not returned.
    pub async fn permanently_delete(&self, node_id: &str, principal_id: &str) -> Result<PurgeSummary> {
        let owner_id = self.drive.any_node(node_id).await?.owner_id().to_string();

        let (mut summary, blobs) = {
            let _guard = self.drive.locks().lock(&owner_id).await;
            let mut tx = self.drive.db().begin().await?;

            let node = find_in_state(&mut tx, node_id, true).await?;
            permission::require_owner(&node, principal_id)?;

            let (blobs, folders, files) = match &node {
                Node::Folder(folder) => {
                    let blobs = FileRepository::list_subtree_blobs(&mut *tx, &folder.id).await?;
                    let files = FileRepository::delete_subtree(&mut *tx, &folder.id).await?;
                    let folders = FolderRepository::delete_subtree(&mut *tx, &folder.id).await?;
                    (blobs, folders, files)
                }
                Node::File(file) => {
                    let blob = PurgedBlob {
                        id: file.id.clone(),
                        public_id: file.public_id.clone(),
                        size: file.size,
                    };
                    FileRepository::delete(&mut *tx, &file.id).await?;
                    (vec![blob], 0, 1)
                }
            };

            let bytes_freed: i64 = blobs.iter().map(|b| b.size).sum();
            QuotaTracker::record(
                &mut *tx,
                &FileEvent::Purged {
                    owner_id: owner_id.clone(),
                    size: bytes_freed,
                },
            )
            .await?;
            tx.commit().await?;

            info!(
                "Permanently deleted {} {} ({} folders, {} files, {} bytes)",
                node.kind(),
                node.path(),
                folders,
                files,
                bytes_freed
            );
            let summary = PurgeSummary {
                folders,
                files,
                bytes_freed,
                blob_failures: 0,
            };
            (summary, blobs)
        };

        let public_ids: Vec<String> = blobs.into_iter().map(|b| b.public_id).collect();
        summary.blob_failures = self.drive.janitor().delete_or_enqueue(&public_ids).await;
        Ok(summary)
    }

    /// Every trashed node of an owner.
    pub async fn list_trash(&self, owner_id: &str) -> Result<TrashListing> {
        let pool = self.drive.db().pool();
        let folders = FolderRepository::list_deleted(pool, owner_id).await?;
        let files = FileRepository::list_deleted(pool, owner_id).await?;

        Ok(TrashListing {
            folders: folders.into_iter().map(|f| Node::from(f).descriptor()).collect(),
            files: files.into_iter().map(|f| Node::from(f).descriptor()).collect(),
        })
    }

    /// Permanently delete everything in an owner's trash.
    pub async fn empty_trash(&self, owner_id: &str) -> Result<PurgeSummary> {
        let pool = self.drive.db().pool();
        let mut roots = FolderRepository::list_trash_roots(pool, owner_id).await?;
        roots.extend(FileRepository::list_trash_roots(pool, owner_id).await?);

        let mut total = PurgeSummary::default();
        for root_id in roots {
            match self.permanently_delete(&root_id, owner_id).await {
                Ok(summary) => total.merge(summary),
                // Already removed by a concurrent purge
                Err(DriveError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            "Emptied trash of {}: {} folders, {} files, {} bytes",
            owner_id, total.folders, total.files, total.bytes_freed
        );
        Ok(total)
    }
}

/// Load a node inside a transaction, requiring the given delete state.
async fn find_in_state(conn: &mut sqlx::SqliteConnection, id: &str, deleted: bool) -> Result<Node> {
    match NodeStore::find(conn, id).await? {
        Some(node) if node.is_deleted() == deleted => Ok(node),
        Some(_) if deleted => Err(DriveError::NotFound("node in trash".to_string())),
        _ => Err(DriveError::NotFound("node".to_string())),
    }
}

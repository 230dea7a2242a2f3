//! Sharing: explicit grants, the public flag and share links.
//!
//! Grants are node-scoped. Sharing a folder does not give access to the
//! nodes inside it.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use super::file::FileRepository;
use super::folder::FolderRepository;
use super::node::{Node, NodeDescriptor, NodeStore, SharePermission, ShareSettings};
use super::permission;
use super::Drive;
use crate::db::UserRepository;
use crate::{DriveError, Result};

/// Characters share tokens are drawn from.
const TOKEN_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Attempts at drawing an unused token before giving up.
const TOKEN_ATTEMPTS: usize = 5;

/// A share link for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareLink {
    pub node_id: String,
    pub token: String,
    /// Public URL resolving the token.
    pub url: String,
}

/// Generate a random share token.
pub fn generate_token(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..TOKEN_CHARS.len());
            TOKEN_CHARS[idx] as char
        })
        .collect()
}

/// Sharing operations. Everything except opening links and listing
/// requires write access on the node.
pub struct ShareService<'a> {
    drive: &'a Drive,
}

impl<'a> ShareService<'a> {
    pub fn new(drive: &'a Drive) -> Self {
        Self { drive }
    }

    /// Grant access to the user registered under `grantee_email`.
    pub async fn share_with(
        &self,
        node_id: &str,
        principal_id: &str,
        grantee_email: &str,
        permission: SharePermission,
    ) -> Result<ShareSettings> {
        let grantee = UserRepository::get_by_email(self.drive.db().pool(), grantee_email)
            .await?
            .ok_or_else(|| DriveError::NotFound("user".to_string()))?;
        self.share_with_user(node_id, principal_id, &grantee.id, permission)
            .await
    }

    /// Grant access to a user, or change the permission of an existing
    /// grant in place.
    pub async fn share_with_user(
        &self,
        node_id: &str,
        principal_id: &str,
        grantee_id: &str,
        permission: SharePermission,
    ) -> Result<ShareSettings> {
        let owner_id = self.drive.live_node(node_id).await?.owner_id().to_string();
        if grantee_id == owner_id {
            return Err(DriveError::Validation(
                "cannot share a node with its owner".to_string(),
            ));
        }

        let _guard = self.drive.locks().lock(&owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        let node = NodeStore::find_live(&mut tx, node_id).await?;
        permission::require_write(&node, principal_id)?;
        if !UserRepository::exists(&mut *tx, grantee_id).await? {
            return Err(DriveError::NotFound("user".to_string()));
        }

        let mut shared_with = node.shared_with().clone();
        shared_with.upsert(grantee_id, permission, Utc::now());
        NodeStore::set_share_settings(
            &mut *tx,
            node.kind(),
            node.id(),
            node.is_public(),
            &shared_with,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        info!("Shared {} {} with {} ({})", node.kind(), node.path(), grantee_id, permission);
        Ok(ShareSettings {
            is_public: node.is_public(),
            shared_with: shared_with.0,
        })
    }

    /// Remove a user's grant. Removing a missing grant is a no-op.
    pub async fn unshare(
        &self,
        node_id: &str,
        principal_id: &str,
        grantee_id: &str,
    ) -> Result<ShareSettings> {
        let owner_id = self.drive.live_node(node_id).await?.owner_id().to_string();
        let _guard = self.drive.locks().lock(&owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        let node = NodeStore::find_live(&mut tx, node_id).await?;
        permission::require_write(&node, principal_id)?;

        let mut shared_with = node.shared_with().clone();
        if shared_with.remove(grantee_id) {
            NodeStore::set_share_settings(
                &mut *tx,
                node.kind(),
                node.id(),
                node.is_public(),
                &shared_with,
                Utc::now(),
            )
            .await?;
            info!("Unshared {} {} from {}", node.kind(), node.path(), grantee_id);
        }
        tx.commit().await?;

        Ok(ShareSettings {
            is_public: node.is_public(),
            shared_with: shared_with.0,
        })
    }

    /// Make a node readable by anyone, or stop doing so.
    pub async fn set_public(
        &self,
        node_id: &str,
        principal_id: &str,
        is_public: bool,
    ) -> Result<ShareSettings> {
        let owner_id = self.drive.live_node(node_id).await?.owner_id().to_string();
        let _guard = self.drive.locks().lock(&owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        let node = NodeStore::find_live(&mut tx, node_id).await?;
        permission::require_write(&node, principal_id)?;

        NodeStore::set_share_settings(
            &mut *tx,
            node.kind(),
            node.id(),
            is_public,
            node.shared_with(),
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        info!("Set {} {} public={}", node.kind(), node.path(), is_public);
        Ok(ShareSettings {
            is_public,
            ..node.share_settings()
        })
    }

    /// Return the node's share link, creating one if it has none.
    pub async fn create_share_link(&self, node_id: &str, principal_id: &str) -> Result<ShareLink> {
        let owner_id = self.drive.live_node(node_id).await?.owner_id().to_string();
        let _guard = self.drive.locks().lock(&owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        let node = NodeStore::find_live(&mut tx, node_id).await?;
        permission::require_write(&node, principal_id)?;

        let token = match node.share_token() {
            Some(token) => token.to_string(),
            None => {
                let token = self.unused_token(&mut tx).await?;
                NodeStore::set_share_token(&mut *tx, node.kind(), node.id(), Some(&token), Utc::now())
                    .await?;
                info!("Created share link for {} {}", node.kind(), node.path());
                token
            }
        };
        tx.commit().await?;

        Ok(ShareLink {
            node_id: node.id().to_string(),
            url: self.link_url(&token)?,
            token,
        })
    }

    /// Remove the node's share link.
    pub async fn revoke_share_link(&self, node_id: &str, principal_id: &str) -> Result<()> {
        let node = self.drive.live_node(node_id).await?;
        permission::require_write(&node, principal_id)?;

        if node.share_token().is_some() {
            NodeStore::set_share_token(self.drive.db().pool(), node.kind(), node.id(), None, Utc::now())
                .await?;
            info!("Revoked share link for {} {}", node.kind(), node.path());
        }
        Ok(())
    }

    /// Resolve a share link to the live node it points at.
    pub async fn open_share_link(&self, token: &str) -> Result<NodeDescriptor> {
        let mut conn = self.drive.db().pool().acquire().await?;
        match NodeStore::find_by_share_token(&mut conn, token).await? {
            Some(node) if !node.is_deleted() => {
                debug!("Opened share link for {} {}", node.kind(), node.id());
                Ok(node.descriptor())
            }
            _ => Err(DriveError::NotFound("share link".to_string())),
        }
    }

    /// Live nodes that explicitly grant access to a principal.
    pub async fn list_shared_with_me(&self, principal_id: &str) -> Result<Vec<NodeDescriptor>> {
        let pool = self.drive.db().pool();
        let folders = FolderRepository::list_shared_with(pool, principal_id).await?;
        let files = FileRepository::list_shared_with(pool, principal_id).await?;

        Ok(folders
            .into_iter()
            .map(Node::from)
            .chain(files.into_iter().map(Node::from))
            .map(|node| node.descriptor())
            .collect())
    }

    async fn unused_token(&self, conn: &mut sqlx::SqliteConnection) -> Result<String> {
        let length = self.drive.settings().token_length;
        for _ in 0..TOKEN_ATTEMPTS {
            let token = generate_token(length);
            if !NodeStore::share_token_exists(&mut *conn, &token).await? {
                return Ok(token);
            }
        }
        Err(DriveError::Conflict(
            "could not allocate a unique share token".to_string(),
        ))
    }

    fn link_url(&self, token: &str) -> Result<String> {
        self.drive
            .settings()
            .public_base_url
            .join(token)
            .map(|url| url.to_string())
            .map_err(|e| DriveError::Config(format!("cannot build share URL: {e}")))
    }
}

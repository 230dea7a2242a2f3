//! The hierarchical node store.
//!
//! Folders and files live in per-owner trees addressed by materialized
//! paths. [`Drive`] bundles the database, the blob store, the per-owner
//! mutation locks and the settings, and hands out the services that
//! operate on them:
//!
//! - [`TreeMutator`]: create, upload, rename, move, listing, breadcrumbs
//! - [`TrashCascade`]: soft-delete, restore, permanent delete
//! - [`ShareService`]: grants, public flag, share links
//! - [`PermissionResolver`] and [`QuotaTracker`]
//! - [`BlobJanitor`]: retry of failed blob deletions

pub mod blob;
pub mod file;
pub mod folder;
pub mod lock;
pub mod node;
pub mod path;
pub mod permission;
pub mod quota;
pub mod share;
pub mod trash;
pub mod tree;

pub use blob::{
    BlobJanitor, BlobStore, LocalBlobStore, PendingBlobDelete, PendingBlobDeleteRepository,
    RetryReport, StoredBlob,
};
pub use file::{DriveFile, FileRepository, Tags};
pub use folder::{Folder, FolderRepository, NewFolder};
pub use lock::OwnerLocks;
pub use node::{
    BreadcrumbEntry, FileDetails, Node, NodeDescriptor, NodeKind, NodeStore, ShareGrant,
    SharePermission, ShareSettings, SharedWith,
};
pub use path::PathMaterializer;
pub use permission::{Access, Permission, PermissionResolver};
pub use quota::{FileEvent, QuotaTracker, QuotaUsage};
pub use share::{ShareLink, ShareService};
pub use trash::{CascadeSummary, PurgeSummary, TrashCascade, TrashListing};
pub use tree::{Listing, TreeMutator, UploadRequest};

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::Config;
use crate::db::{Database, NewUser, User, UserRepository};
use crate::{DriveError, Result};

/// Maximum length of a folder or file name in characters.
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum number of path segments.
pub const MAX_FOLDER_DEPTH: usize = 32;

/// Color given to folders created without one.
pub const DEFAULT_FOLDER_COLOR: &str = "#5f6368";

/// Display name of the synthetic breadcrumb root.
pub const ROOT_NAME: &str = "My Drive";

/// Runtime settings of the drive, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct DriveSettings {
    /// Largest accepted upload in bytes.
    pub max_upload_size: u64,
    /// Deadline for each blob store call.
    pub blob_timeout: Duration,
    /// Storage limit given to new owners.
    pub default_quota_bytes: i64,
    /// Base URL share tokens are appended to. Always ends with `/`.
    pub public_base_url: Url,
    /// Length of generated share tokens.
    pub token_length: usize,
    /// Attempts before a failed blob deletion is abandoned.
    pub max_blob_retries: i64,
}

impl DriveSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut public_base_url = Url::parse(&config.share.public_base_url).map_err(|e| {
            DriveError::Config(format!(
                "invalid share.public_base_url '{}': {}",
                config.share.public_base_url, e
            ))
        })?;
        if !public_base_url.path().ends_with('/') {
            let path = format!("{}/", public_base_url.path());
            public_base_url.set_path(&path);
        }

        Ok(Self {
            max_upload_size: config.storage.max_upload_size_mb * 1024 * 1024,
            blob_timeout: Duration::from_secs(config.storage.blob_timeout_secs),
            default_quota_bytes: config.storage.default_quota_bytes,
            public_base_url,
            token_length: config.share.token_length,
            max_blob_retries: config.maintenance.max_blob_retries,
        })
    }
}

/// Shared context of the node store.
///
/// Cloning is cheap; clones share the pool, the blob store and the locks.
#[derive(Clone)]
pub struct Drive {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    locks: OwnerLocks,
    settings: Arc<DriveSettings>,
}

impl Drive {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>, settings: DriveSettings) -> Self {
        Self {
            db,
            blobs,
            locks: OwnerLocks::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn locks(&self) -> &OwnerLocks {
        &self.locks
    }

    pub fn settings(&self) -> &DriveSettings {
        &self.settings
    }

    pub fn tree(&self) -> TreeMutator<'_> {
        TreeMutator::new(self)
    }

    pub fn trash(&self) -> TrashCascade<'_> {
        TrashCascade::new(self)
    }

    pub fn shares(&self) -> ShareService<'_> {
        ShareService::new(self)
    }

    pub fn permissions(&self) -> PermissionResolver<'_> {
        PermissionResolver::new(&self.db)
    }

    pub fn quota(&self) -> QuotaTracker<'_> {
        QuotaTracker::new(&self.db)
    }

    pub fn janitor(&self) -> BlobJanitor<'_> {
        BlobJanitor::new(
            &self.db,
            self.blobs.as_ref(),
            self.settings.blob_timeout,
            self.settings.max_blob_retries,
        )
    }

    /// Register an owner with the default storage limit.
    pub async fn register_owner(&self, id: &str, email: &str) -> Result<User> {
        let new_user = NewUser::new(id, email, self.settings.default_quota_bytes);
        let user = UserRepository::create(self.db.pool(), &new_user).await?;
        tracing::info!("Registered owner {} ({} bytes quota)", user.id, user.storage_limit);
        Ok(user)
    }

    /// Load a live node, or `NotFound`.
    pub(crate) async fn live_node(&self, id: &str) -> Result<Node> {
        let mut conn = self.db.pool().acquire().await?;
        NodeStore::find_live(&mut conn, id).await
    }

    /// Load a node whatever its delete state, or `NotFound`.
    pub(crate) async fn any_node(&self, id: &str) -> Result<Node> {
        let mut conn = self.db.pool().acquire().await?;
        NodeStore::find(&mut conn, id)
            .await?
            .ok_or_else(|| DriveError::NotFound("node".to_string()))
    }
}

//! Structural mutations and reads of the node tree.
//!
//! Every mutation takes the owner's lock and runs its checks and writes in
//! one transaction, so the sibling, cycle and path invariants are validated
//! against the state the write commits on.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::blob::{with_timeout, PendingBlobDeleteRepository, StoredBlob};
use super::file::{DriveFile, FileRepository, Tags};
use super::folder::{Folder, FolderRepository, NewFolder};
use super::node::{BreadcrumbEntry, Node, NodeDescriptor, NodeStore, SharedWith};
use super::path::PathMaterializer;
use super::permission::{self, Permission};
use super::quota::{FileEvent, QuotaTracker};
use super::{Drive, MAX_FOLDER_DEPTH, ROOT_NAME};
use crate::db::UserRepository;
use crate::{DriveError, Result};

/// Maximum number of tags on a file.
const MAX_TAGS: usize = 20;

/// Maximum length of a single tag in characters.
const MAX_TAG_LENGTH: usize = 50;

/// A file to store.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Name the file is stored under.
    pub name: String,
    /// Destination folder (None for the drive root).
    pub folder_id: Option<String>,
    pub content: Vec<u8>,
    /// Declared MIME type; guessed from the name when absent.
    pub mime_type: Option<String>,
    pub tags: Vec<String>,
}

impl UploadRequest {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            folder_id: None,
            content,
            mime_type: None,
            tags: Vec::new(),
        }
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Live children of a folder visible to a principal.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Listing {
    pub folders: Vec<NodeDescriptor>,
    pub files: Vec<NodeDescriptor>,
}

/// Create, upload, rename and move operations plus tree reads.
pub struct TreeMutator<'a> {
    drive: &'a Drive,
}

impl<'a> TreeMutator<'a> {
    pub fn new(drive: &'a Drive) -> Self {
        Self { drive }
    }

    /// Create a folder in the owner's drive.
    pub async fn create(&self, owner_id: &str, new_folder: &NewFolder) -> Result<Folder> {
        PathMaterializer::validate_name(&new_folder.name)?;
        validate_color(&new_folder.color)?;

        let _guard = self.drive.locks().lock(owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        if !UserRepository::exists(&mut *tx, owner_id).await? {
            return Err(DriveError::NotFound("owner".to_string()));
        }

        let parent_path = match &new_folder.parent_id {
            Some(parent_id) => {
                let parent = owned_live_folder(&mut tx, owner_id, parent_id).await?;
                Some(parent.path)
            }
            None => None,
        };
        let path = PathMaterializer::compute_path(&new_folder.name, parent_path.as_deref())?;
        check_depth(&path)?;

        let sibling = FolderRepository::find_live_sibling(
            &mut *tx,
            owner_id,
            new_folder.parent_id.as_deref(),
            &new_folder.name,
            None,
        )
        .await?;
        if sibling.is_some() {
            return Err(DriveError::Conflict(format!(
                "a folder named '{}' already exists here",
                new_folder.name
            )));
        }

        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            parent_id: new_folder.parent_id.clone(),
            name: new_folder.name.clone(),
            color: new_folder.color.clone(),
            path,
            is_deleted: false,
            deleted_at: None,
            is_public: false,
            shared_with: SharedWith::default(),
            share_token: None,
            created_at: now,
            updated_at: now,
        };
        FolderRepository::insert(&mut *tx, &folder).await?;
        tx.commit().await?;

        info!("Created folder {} ({}) for {}", folder.path, folder.id, owner_id);
        Ok(folder)
    }

    /// Store a file in the owner's drive.
    ///
    /// The blob is stored before any lock is taken. If the metadata write
    /// then fails, the blob is deleted again.
    pub async fn upload(&self, owner_id: &str, request: &UploadRequest) -> Result<DriveFile> {
        PathMaterializer::validate_name(&request.name)?;
        let size = request.content.len() as u64;
        if size > self.drive.settings().max_upload_size {
            return Err(DriveError::Validation(format!(
                "file is {} bytes, the limit is {} bytes",
                size,
                self.drive.settings().max_upload_size
            )));
        }
        let tags = normalize_tags(&request.tags)?;

        // Fail fast before touching the blob store
        if let Some(folder_id) = &request.folder_id {
            let mut conn = self.drive.db().pool().acquire().await?;
            owned_live_folder(&mut conn, owner_id, folder_id).await?;
        }

        let timeout = self.drive.settings().blob_timeout;
        let blob = with_timeout(
            timeout,
            "blob upload",
            self.drive.blobs().put(&request.content, &request.name),
        )
        .await?;

        match self.commit_upload(owner_id, request, tags, &blob).await {
            Ok(file) => {
                self.warn_if_over_limit(owner_id).await;
                Ok(file)
            }
            Err(e) => {
                warn!("Upload of {} failed, removing blob {}: {}", request.name, blob.public_id, e);
                let rollback =
                    with_timeout(timeout, "blob delete", self.drive.blobs().delete(&blob.public_id))
                        .await;
                if let Err(delete_err) = rollback {
                    warn!("Failed to remove blob {}: {}", blob.public_id, delete_err);
                    if let Err(queue_err) = PendingBlobDeleteRepository::enqueue(
                        self.drive.db().pool(),
                        &blob.public_id,
                        &delete_err.to_string(),
                    )
                    .await
                    {
                        warn!("Failed to queue blob {} for deletion: {}", blob.public_id, queue_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn commit_upload(
        &self,
        owner_id: &str,
        request: &UploadRequest,
        tags: Tags,
        blob: &StoredBlob,
    ) -> Result<DriveFile> {
        let _guard = self.drive.locks().lock(owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        if !UserRepository::exists(&mut *tx, owner_id).await? {
            return Err(DriveError::NotFound("owner".to_string()));
        }

        let parent_path = match &request.folder_id {
            Some(folder_id) => Some(owned_live_folder(&mut tx, owner_id, folder_id).await?.path),
            None => None,
        };
        let path = PathMaterializer::compute_path(&request.name, parent_path.as_deref())?;

        let mime_type = request.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&request.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

        let now = Utc::now();
        let file = DriveFile {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            folder_id: request.folder_id.clone(),
            name: request.name.clone(),
            original_name: request.name.clone(),
            size: request.content.len() as i64,
            mime_type,
            url: blob.url.clone(),
            public_id: blob.public_id.clone(),
            tags,
            version: 1,
            path,
            is_deleted: false,
            deleted_at: None,
            is_public: false,
            shared_with: SharedWith::default(),
            share_token: None,
            created_at: now,
            updated_at: now,
        };
        FileRepository::insert(&mut *tx, &file).await?;
        QuotaTracker::record(
            &mut *tx,
            &FileEvent::Created {
                owner_id: owner_id.to_string(),
                size: file.size,
            },
        )
        .await?;
        tx.commit().await?;

        info!("Uploaded {} ({} bytes) for {}", file.path, file.size, owner_id);
        Ok(file)
    }

    async fn warn_if_over_limit(&self, owner_id: &str) {
        match self.drive.quota().usage(owner_id).await {
            Ok(usage) if usage.is_over_limit() => {
                warn!(
                    "Owner {} is over quota: {} of {} bytes used",
                    owner_id, usage.used, usage.limit
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read quota for {}: {}", owner_id, e),
        }
    }

    /// Rename a node, rewriting the paths of everything below it.
    pub async fn rename(&self, node_id: &str, principal_id: &str, new_name: &str) -> Result<Node> {
        PathMaterializer::validate_name(new_name)?;

        let owner_id = self.drive.live_node(node_id).await?.owner_id().to_string();
        let _guard = self.drive.locks().lock(&owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        let node = NodeStore::find_live(&mut tx, node_id).await?;
        permission::require_write(&node, principal_id)?;

        let parent_path = match node.parent_id() {
            Some(parent_id) => FolderRepository::get_by_id(&mut *tx, parent_id)
                .await?
                .map(|parent| parent.path),
            None => None,
        };
        let new_path = PathMaterializer::compute_path(new_name, parent_path.as_deref())?;
        let now = Utc::now();

        match &node {
            Node::Folder(folder) => {
                let sibling = FolderRepository::find_live_sibling(
                    &mut *tx,
                    &folder.owner_id,
                    folder.parent_id.as_deref(),
                    new_name,
                    Some(&folder.id),
                )
                .await?;
                if sibling.is_some() {
                    return Err(DriveError::Conflict(format!(
                        "a folder named '{new_name}' already exists here"
                    )));
                }
                FolderRepository::set_name(&mut *tx, &folder.id, new_name, now).await?;
                rewrite_paths(&mut tx, &folder.id, &folder.path, &new_path).await?;
            }
            Node::File(file) => {
                FileRepository::set_name(&mut *tx, &file.id, new_name, &new_path, now).await?;
            }
        }

        let renamed = NodeStore::find_live(&mut tx, node_id).await?;
        tx.commit().await?;

        info!("Renamed {} {} -> {}", node.kind(), node.path(), new_path);
        Ok(renamed)
    }

    /// Move a node under another folder, or to the drive root with `None`.
    pub async fn move_node(
        &self,
        node_id: &str,
        principal_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<Node> {
        let owner_id = self.drive.live_node(node_id).await?.owner_id().to_string();
        let _guard = self.drive.locks().lock(&owner_id).await;
        let mut tx = self.drive.db().begin().await?;

        let node = NodeStore::find_live(&mut tx, node_id).await?;
        permission::require_write(&node, principal_id)?;

        if new_parent_id == Some(node_id) {
            return Err(DriveError::CycleViolation(format!(
                "cannot move '{}' into itself",
                node.name()
            )));
        }

        let destination = match new_parent_id {
            Some(parent_id) => {
                let folder = FolderRepository::get_by_id(&mut *tx, parent_id)
                    .await?
                    .filter(|f| !f.is_deleted)
                    .ok_or_else(|| DriveError::NotFound("destination folder".to_string()))?;
                let folder = Node::Folder(folder);
                permission::require_write(&folder, principal_id)?;
                if folder.owner_id() != node.owner_id() {
                    return Err(DriveError::AccessDenied(
                        "cannot move between different drives".to_string(),
                    ));
                }
                Some(folder)
            }
            None => None,
        };

        let destination_path = destination.as_ref().map(|d| d.path());
        if matches!(node, Node::Folder(_)) {
            if let Some(dest_path) = destination_path {
                if PathMaterializer::is_within(dest_path, node.path()) {
                    return Err(DriveError::CycleViolation(format!(
                        "cannot move '{}' into its own subtree",
                        node.name()
                    )));
                }
            }
        }

        let new_path = PathMaterializer::compute_path(node.name(), destination_path)?;
        let now = Utc::now();

        match &node {
            Node::Folder(folder) => {
                let deepest = FolderRepository::max_subtree_depth(&mut *tx, &folder.id).await?;
                let resulting = deepest as usize - PathMaterializer::depth(&folder.path)
                    + PathMaterializer::depth(&new_path);
                if resulting > MAX_FOLDER_DEPTH {
                    return Err(DriveError::Validation(format!(
                        "folders cannot be nested more than {MAX_FOLDER_DEPTH} levels deep"
                    )));
                }

                let sibling = FolderRepository::find_live_sibling(
                    &mut *tx,
                    &folder.owner_id,
                    new_parent_id,
                    &folder.name,
                    Some(&folder.id),
                )
                .await?;
                if sibling.is_some() {
                    return Err(DriveError::Conflict(format!(
                        "a folder named '{}' already exists at the destination",
                        folder.name
                    )));
                }

                FolderRepository::set_parent(&mut *tx, &folder.id, new_parent_id, now).await?;
                rewrite_paths(&mut tx, &folder.id, &folder.path, &new_path).await?;
            }
            Node::File(file) => {
                FileRepository::set_folder(&mut *tx, &file.id, new_parent_id, &new_path, now)
                    .await?;
            }
        }

        let moved = NodeStore::find_live(&mut tx, node_id).await?;
        tx.commit().await?;

        info!("Moved {} {} -> {}", node.kind(), node.path(), new_path);
        Ok(moved)
    }

    /// Change a folder's display color.
    pub async fn set_color(&self, folder_id: &str, principal_id: &str, color: &str) -> Result<Folder> {
        validate_color(color)?;

        let node = self.drive.live_node(folder_id).await?;
        permission::require_write(&node, principal_id)?;
        let Node::Folder(folder) = node else {
            return Err(DriveError::Validation("only folders have a color".to_string()));
        };

        let pool = self.drive.db().pool();
        FolderRepository::set_color(pool, &folder.id, color, Utc::now()).await?;
        FolderRepository::get_by_id(pool, &folder.id)
            .await?
            .ok_or_else(|| DriveError::NotFound("folder".to_string()))
    }

    /// Replace a file's tags.
    pub async fn set_tags(&self, file_id: &str, principal_id: &str, tags: &[String]) -> Result<DriveFile> {
        let tags = normalize_tags(tags)?;

        let node = self.drive.live_node(file_id).await?;
        permission::require_write(&node, principal_id)?;
        let Node::File(file) = node else {
            return Err(DriveError::Validation("only files have tags".to_string()));
        };

        let pool = self.drive.db().pool();
        FileRepository::set_tags(pool, &file.id, &tags, Utc::now()).await?;
        FileRepository::get_by_id(pool, &file.id)
            .await?
            .ok_or_else(|| DriveError::NotFound("file".to_string()))
    }

    /// Descriptor of a live node the principal can read.
    pub async fn get(&self, node_id: &str, principal_id: &str) -> Result<NodeDescriptor> {
        let node = self.drive.live_node(node_id).await?;
        permission::require(&node, principal_id, Permission::Read)?;
        Ok(node.descriptor())
    }

    /// Live children of a folder, or of the principal's own drive root
    /// with `None`.
    ///
    /// Children are filtered by the principal's access to each child.
    pub async fn list_children(&self, parent_id: Option<&str>, principal_id: &str) -> Result<Listing> {
        let owner_id = match parent_id {
            Some(parent_id) => {
                let parent = self.drive.live_node(parent_id).await?;
                if !matches!(parent, Node::Folder(_)) {
                    return Err(DriveError::Validation("not a folder".to_string()));
                }
                permission::require(&parent, principal_id, Permission::Read)?;
                parent.owner_id().to_string()
            }
            None => principal_id.to_string(),
        };

        let pool = self.drive.db().pool();
        let folders = FolderRepository::list_children(pool, &owner_id, parent_id).await?;
        let files = FileRepository::list_children(pool, &owner_id, parent_id).await?;

        let visible = |node: Node| {
            permission::resolve(&node, principal_id)
                .access
                .then(|| node.descriptor())
        };
        let listing = Listing {
            folders: folders.into_iter().map(Node::from).filter_map(visible).collect(),
            files: files.into_iter().map(Node::from).filter_map(visible).collect(),
        };

        debug!(
            "Listed {} folders and {} files under {:?} for {}",
            listing.folders.len(),
            listing.files.len(),
            parent_id,
            principal_id
        );
        Ok(listing)
    }

    /// Root-first trail from the drive root to a node.
    ///
    /// The first entry is the synthetic drive root; the last is the node.
    pub async fn breadcrumb(&self, node_id: &str, principal_id: &str) -> Result<Vec<BreadcrumbEntry>> {
        let node = self.drive.live_node(node_id).await?;
        permission::require(&node, principal_id, Permission::Read)?;

        let mut trail = vec![BreadcrumbEntry {
            id: Some(node.id().to_string()),
            name: node.name().to_string(),
            path: node.path().to_string(),
        }];

        let pool = self.drive.db().pool();
        let mut next = node.parent_id().map(str::to_string);
        let mut steps = 0;
        while let Some(parent_id) = next {
            if steps > MAX_FOLDER_DEPTH {
                warn!("Ancestor chain of {} exceeds {} levels", node_id, MAX_FOLDER_DEPTH);
                break;
            }
            steps += 1;

            let Some(parent) = FolderRepository::get_by_id(pool, &parent_id).await? else {
                break;
            };
            trail.push(BreadcrumbEntry {
                id: Some(parent.id),
                name: parent.name,
                path: parent.path,
            });
            next = parent.parent_id;
        }

        trail.push(BreadcrumbEntry {
            id: None,
            name: ROOT_NAME.to_string(),
            path: "/".to_string(),
        });
        trail.reverse();
        Ok(trail)
    }
}

/// Load a live folder belonging to `owner_id`.
async fn owned_live_folder(
    conn: &mut sqlx::SqliteConnection,
    owner_id: &str,
    folder_id: &str,
) -> Result<Folder> {
    FolderRepository::get_by_id(conn, folder_id)
        .await?
        .filter(|f| f.owner_id == owner_id && !f.is_deleted)
        .ok_or_else(|| DriveError::NotFound("parent folder".to_string()))
}

/// Rewrite the path prefix of a folder subtree and the files inside it.
async fn rewrite_paths(
    conn: &mut sqlx::SqliteConnection,
    folder_id: &str,
    old_path: &str,
    new_path: &str,
) -> Result<()> {
    let folders = FolderRepository::rewrite_subtree_paths(&mut *conn, folder_id, old_path, new_path).await?;
    let files = FileRepository::rewrite_subtree_paths(&mut *conn, folder_id, old_path, new_path).await?;
    debug!("Rewrote {} folder and {} file paths under {}", folders, files, new_path);
    Ok(())
}

fn check_depth(path: &str) -> Result<()> {
    if PathMaterializer::depth(path) > MAX_FOLDER_DEPTH {
        return Err(DriveError::Validation(format!(
            "folders cannot be nested more than {MAX_FOLDER_DEPTH} levels deep"
        )));
    }
    Ok(())
}

/// Validate a `#RRGGBB` color.
fn validate_color(color: &str) -> Result<()> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(DriveError::Validation(format!(
            "invalid color '{color}', expected #RRGGBB"
        )));
    }
    Ok(())
}

/// Trim tags, drop empty ones and duplicates, keeping first-seen order.
fn normalize_tags(tags: &[String]) -> Result<Tags> {
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || normalized.iter().any(|t| t == tag) {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LENGTH {
            return Err(DriveError::Validation(format!(
                "tags must be at most {MAX_TAG_LENGTH} characters"
            )));
        }
        normalized.push(tag.to_string());
    }
    if normalized.len() > MAX_TAGS {
        return Err(DriveError::Validation(format!(
            "a file can have at most {MAX_TAGS} tags"
        )));
    }
    Ok(Tags(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{Database, NewUser};
    use crate::drive::{DriveSettings, LocalBlobStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Drive) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        for id in ["u1", "u2"] {
            UserRepository::create(db.pool(), &NewUser::new(id, format!("{id}@example.com"), 1_000))
                .await
                .unwrap();
        }
        let blobs = LocalBlobStore::new(temp_dir.path().join("blobs")).unwrap();
        let settings = DriveSettings::from_config(&Config::default()).unwrap();
        (temp_dir, Drive::new(db, Arc::new(blobs), settings))
    }

    #[tokio::test]
    async fn test_create_root_and_child() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let docs = tree.create("u1", &NewFolder::new("Docs")).await.unwrap();
        assert_eq!(docs.path, "/Docs");
        assert_eq!(docs.color, crate::drive::DEFAULT_FOLDER_COLOR);

        let year = tree
            .create("u1", &NewFolder::new("2024").with_parent(&docs.id))
            .await
            .unwrap();
        assert_eq!(year.path, "/Docs/2024");
        assert_eq!(year.parent_id.as_deref(), Some(docs.id.as_str()));
    }

    #[tokio::test]
    async fn test_create_under_foreign_parent_is_not_found() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let docs = tree.create("u1", &NewFolder::new("Docs")).await.unwrap();
        let result = tree
            .create("u2", &NewFolder::new("Mine").with_parent(&docs.id))
            .await;
        assert!(matches!(result, Err(DriveError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        assert!(matches!(
            tree.create("u1", &NewFolder::new("a/b")).await,
            Err(DriveError::Validation(_))
        ));
        assert!(matches!(
            tree.create("u1", &NewFolder::new("ok").with_color("red")).await,
            Err(DriveError::Validation(_))
        ));
        assert!(matches!(
            tree.create("ghost", &NewFolder::new("ok")).await,
            Err(DriveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_depth_limit() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let mut parent: Option<String> = None;
        for level in 0..MAX_FOLDER_DEPTH {
            let mut new_folder = NewFolder::new(format!("L{level}"));
            if let Some(p) = &parent {
                new_folder = new_folder.with_parent(p);
            }
            parent = Some(tree.create("u1", &new_folder).await.unwrap().id);
        }

        let too_deep = NewFolder::new("deeper").with_parent(parent.unwrap());
        assert!(matches!(
            tree.create("u1", &too_deep).await,
            Err(DriveError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_folder_rewrites_descendants() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let docs = tree.create("u1", &NewFolder::new("Docs")).await.unwrap();
        let year = tree
            .create("u1", &NewFolder::new("2024").with_parent(&docs.id))
            .await
            .unwrap();
        let file = tree
            .upload("u1", &UploadRequest::new("a.txt", b"hello".to_vec()).in_folder(&year.id))
            .await
            .unwrap();

        let renamed = tree.rename(&docs.id, "u1", "Papers").await.unwrap();
        assert_eq!(renamed.path(), "/Papers");

        let year = FolderRepository::get_by_id(drive.db().pool(), &year.id).await.unwrap().unwrap();
        assert_eq!(year.path, "/Papers/2024");
        let file = FileRepository::get_by_id(drive.db().pool(), &file.id).await.unwrap().unwrap();
        assert_eq!(file.path, "/Papers/2024/a.txt");
    }

    #[tokio::test]
    async fn test_rename_conflict() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        tree.create("u1", &NewFolder::new("A")).await.unwrap();
        let b = tree.create("u1", &NewFolder::new("B")).await.unwrap();

        assert!(matches!(
            tree.rename(&b.id, "u1", "A").await,
            Err(DriveError::Conflict(_))
        ));
        // Renaming to its own name is allowed
        assert!(tree.rename(&b.id, "u1", "B").await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_file() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let file = tree
            .upload("u1", &UploadRequest::new("a.txt", b"x".to_vec()))
            .await
            .unwrap();
        let renamed = tree.rename(&file.id, "u1", "b.txt").await.unwrap();
        assert_eq!(renamed.name(), "b.txt");
        assert_eq!(renamed.path(), "/b.txt");
    }

    #[tokio::test]
    async fn test_rename_requires_write() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let docs = tree.create("u1", &NewFolder::new("Docs")).await.unwrap();
        assert!(matches!(
            tree.rename(&docs.id, "u2", "Mine").await,
            Err(DriveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_move_and_cycle_rejection() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let a = tree.create("u1", &NewFolder::new("A")).await.unwrap();
        let b = tree.create("u1", &NewFolder::new("B").with_parent(&a.id)).await.unwrap();
        let c = tree.create("u1", &NewFolder::new("C")).await.unwrap();

        assert!(matches!(
            tree.move_node(&a.id, "u1", Some(&a.id)).await,
            Err(DriveError::CycleViolation(_))
        ));
        assert!(matches!(
            tree.move_node(&a.id, "u1", Some(&b.id)).await,
            Err(DriveError::CycleViolation(_))
        ));

        let moved = tree.move_node(&a.id, "u1", Some(&c.id)).await.unwrap();
        assert_eq!(moved.path(), "/C/A");
        let b = FolderRepository::get_by_id(drive.db().pool(), &b.id).await.unwrap().unwrap();
        assert_eq!(b.path, "/C/A/B");

        let back = tree.move_node(&a.id, "u1", None).await.unwrap();
        assert_eq!(back.path(), "/A");
    }

    #[tokio::test]
    async fn test_move_sibling_conflict() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let dest = tree.create("u1", &NewFolder::new("Dest")).await.unwrap();
        tree.create("u1", &NewFolder::new("X").with_parent(&dest.id)).await.unwrap();
        let x = tree.create("u1", &NewFolder::new("X")).await.unwrap();

        assert!(matches!(
            tree.move_node(&x.id, "u1", Some(&dest.id)).await,
            Err(DriveError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_move_across_owners_denied() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let mine = tree.create("u1", &NewFolder::new("Mine")).await.unwrap();
        let theirs = tree.create("u2", &NewFolder::new("Theirs")).await.unwrap();

        assert!(matches!(
            tree.move_node(&mine.id, "u1", Some(&theirs.id)).await,
            Err(DriveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_records_quota_and_guesses_mime() {
        let (_tmp, drive) = setup().await;

        let file = drive
            .tree()
            .upload("u1", &UploadRequest::new("notes.txt", vec![0u8; 100]))
            .await
            .unwrap();
        assert_eq!(file.size, 100);
        assert_eq!(file.mime_type, "text/plain");
        assert_eq!(file.version, 1);
        assert_eq!(drive.quota().usage("u1").await.unwrap().used, 100);
    }

    #[tokio::test]
    async fn test_upload_into_missing_folder() {
        let (_tmp, drive) = setup().await;

        let result = drive
            .tree()
            .upload("u1", &UploadRequest::new("a.txt", b"x".to_vec()).in_folder("missing"))
            .await;
        assert!(matches!(result, Err(DriveError::NotFound(_))));
        assert_eq!(drive.quota().usage("u1").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_set_color_and_tags() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let folder = tree.create("u1", &NewFolder::new("Docs")).await.unwrap();
        let folder = tree.set_color(&folder.id, "u1", "#1a73e8").await.unwrap();
        assert_eq!(folder.color, "#1a73e8");

        let file = tree
            .upload("u1", &UploadRequest::new("a.txt", b"x".to_vec()))
            .await
            .unwrap();
        let tags = vec![" work ".to_string(), "work".to_string(), "".to_string(), "2024".to_string()];
        let file = tree.set_tags(&file.id, "u1", &tags).await.unwrap();
        assert_eq!(file.tags, Tags(vec!["work".to_string(), "2024".to_string()]));

        assert!(matches!(
            tree.set_tags(&folder.id, "u1", &[]).await,
            Err(DriveError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_children_and_breadcrumb() {
        let (_tmp, drive) = setup().await;
        let tree = drive.tree();

        let docs = tree.create("u1", &NewFolder::new("Docs")).await.unwrap();
        let year = tree
            .create("u1", &NewFolder::new("2024").with_parent(&docs.id))
            .await
            .unwrap();
        tree.upload("u1", &UploadRequest::new("a.txt", b"x".to_vec()).in_folder(&docs.id))
            .await
            .unwrap();

        let listing = tree.list_children(Some(&docs.id), "u1").await.unwrap();
        assert_eq!(listing.folders.len(), 1);
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].file.as_ref().unwrap().size, 1);

        let root = tree.list_children(None, "u1").await.unwrap();
        assert_eq!(root.folders.len(), 1);

        let trail = tree.breadcrumb(&year.id, "u1").await.unwrap();
        let names: Vec<_> = trail.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![ROOT_NAME, "Docs", "2024"]);
        assert!(trail[0].id.is_none());
        assert_eq!(trail[2].path, "/Docs/2024");
    }

    #[test]
    fn test_validate_color() {
        assert!(validate_color("#5f6368").is_ok());
        assert!(validate_color("#ABCDEF").is_ok());
        assert!(validate_color("5f6368").is_err());
        assert!(validate_color("#5f636").is_err());
        assert!(validate_color("#gggggg").is_err());
    }

    #[test]
    fn test_normalize_tags_limits() {
        let long = vec!["x".repeat(MAX_TAG_LENGTH + 1)];
        assert!(normalize_tags(&long).is_err());

        let many: Vec<String> = (0..=MAX_TAGS).map(|i| format!("t{i}")).collect();
        assert!(normalize_tags(&many).is_err());
    }
}

//! drivetree - a per-owner hierarchical file and folder store
//!
//! Folders and files are kept in materialized-path trees backed by SQLite,
//! with cascading trash, node-scoped sharing and storage quota accounting.
//! File content lives in an external blob store.

pub mod config;
pub mod db;
pub mod drive;
pub mod error;
pub mod logging;

pub use config::Config;
pub use db::{Database, NewUser, User, UserRepository};
pub use drive::{
    BlobStore, Drive, DriveSettings, LocalBlobStore, NewFolder, Node, NodeDescriptor, Permission,
    SharePermission, UploadRequest,
};
pub use error::{DriveError, Result};

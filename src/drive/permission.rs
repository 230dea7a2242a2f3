//! Permission resolution for drive nodes.
//!
//! Access is evaluated per node: a grant on a folder does not extend to
//! the nodes inside it.

use std::fmt;

use tracing::debug;

use super::node::{Node, NodeStore, SharePermission};
use crate::db::Database;
use crate::{DriveError, Result};

/// Effective permission of a principal on a node, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    None,
    Read,
    Write,
    Owner,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::None => "none",
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Owner => "owner",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SharePermission> for Permission {
    fn from(p: SharePermission) -> Self {
        match p {
            SharePermission::Read => Permission::Read,
            SharePermission::Write => Permission::Write,
        }
    }
}

/// Result of resolving a principal against a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub access: bool,
    pub permission: Permission,
}

/// Resolve a principal's access to a node.
///
/// 1. the owner gets `Owner`
/// 2. an explicit grant gives its permission
/// 3. a public node gives `Read`
/// 4. otherwise `None`
pub fn resolve(node: &Node, principal_id: &str) -> Access {
    let permission = if principal_id == node.owner_id() {
        Permission::Owner
    } else if let Some(grant) = node.shared_with().grant_for(principal_id) {
        grant.permission.into()
    } else if node.is_public() {
        Permission::Read
    } else {
        Permission::None
    };

    Access {
        access: permission != Permission::None,
        permission,
    }
}

/// Require at least `required` on a node.
///
/// A principal with no access at all gets `NotFound`, so the node's
/// existence is not revealed; insufficient access gets `AccessDenied`.
pub fn require(node: &Node, principal_id: &str, required: Permission) -> Result<Permission> {
    let access = resolve(node, principal_id);
    if access.permission >= required {
        return Ok(access.permission);
    }
    if !access.access {
        return Err(DriveError::NotFound(node.kind().to_string()));
    }
    Err(DriveError::AccessDenied(format!(
        "{} permission required on {} '{}'",
        required,
        node.kind(),
        node.name()
    )))
}

/// Require write access (owner or write grant).
pub fn require_write(node: &Node, principal_id: &str) -> Result<Permission> {
    require(node, principal_id, Permission::Write)
}

/// Require ownership.
pub fn require_owner(node: &Node, principal_id: &str) -> Result<Permission> {
    require(node, principal_id, Permission::Owner)
}

/// Resolves access by node ID.
pub struct PermissionResolver<'a> {
    db: &'a Database,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Resolve a principal's access to the node with the given ID.
    pub async fn resolve(&self, node_id: &str, principal_id: &str) -> Result<Access> {
        let mut conn = self.db.pool().acquire().await?;
        let node = NodeStore::find(&mut conn, node_id)
            .await?
            .ok_or_else(|| DriveError::NotFound("node".to_string()))?;

        let access = resolve(&node, principal_id);
        debug!(
            "Resolved {} on {} {} for {}",
            access.permission,
            node.kind(),
            node_id,
            principal_id
        );
        Ok(access)
    }
}

//! Owner model for drivetree.
//!
//! Users are the principals that own drives. Their ids are supplied by the
//! external principal resolver and are treated as opaque.

use chrono::{DateTime, Utc};

/// A drive owner.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    /// Opaque principal ID.
    pub id: String,
    /// Email address, used to address share grants.
    pub email: String,
    /// Display name.
    pub display_name: String,
    /// Bytes used by the owner's files.
    pub storage_used: i64,
    /// Storage limit in bytes.
    pub storage_limit: i64,
    /// Account creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Check whether usage is above the configured limit.
    pub fn is_over_limit(&self) -> bool {
        self.storage_used > self.storage_limit
    }
}

/// Data for creating a new owner.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Opaque principal ID.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name (defaults to the ID).
    pub display_name: String,
    /// Storage limit in bytes.
    pub storage_limit: i64,
}

impl NewUser {
    /// Create a new owner with the display name set to the ID.
    pub fn new(id: impl Into<String>, email: impl Into<String>, storage_limit: i64) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            email: email.into(),
            storage_limit,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

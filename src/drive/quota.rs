//! Owner storage accounting.
//!
//! Counters are only ever changed by single `UPDATE` statements, so
//! concurrent uploads and purges for one owner never lose updates.

use sqlx::SqliteExecutor;
use tracing::{debug, info, warn};

use crate::db::{Database, UserRepository};
use crate::{DriveError, Result};

/// File lifecycle events that affect an owner's storage usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// A file was stored.
    Created { owner_id: String, size: i64 },
    /// Files were permanently removed.
    Purged { owner_id: String, size: i64 },
}

/// Storage usage snapshot for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: i64,
    pub limit: i64,
}

impl QuotaUsage {
    pub fn is_over_limit(&self) -> bool {
        self.used > self.limit
    }

    /// Bytes left before the limit, zero once exceeded.
    pub fn remaining(&self) -> i64 {
        (self.limit - self.used).max(0)
    }
}

/// Tracks `storage_used` for owners.
pub struct QuotaTracker<'a> {
    db: &'a Database,
}

impl<'a> QuotaTracker<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Apply a lifecycle event to the owner's counter.
    ///
    /// Decrements are floored at zero.
    pub async fn record<'e, E>(executor: E, event: &FileEvent) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        let (owner_id, delta) = match event {
            FileEvent::Created { owner_id, size } => (owner_id, *size),
            FileEvent::Purged { owner_id, size } => (owner_id, -*size),
        };
        if delta == 0 {
            return Ok(());
        }

        let result = sqlx::query(
            "UPDATE users SET storage_used = MAX(0, storage_used + ?) WHERE id = ?",
        )
        .bind(delta)
        .bind(owner_id)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DriveError::NotFound("owner".to_string()));
        }
        debug!("Storage for {} changed by {} bytes", owner_id, delta);
        Ok(())
    }

    /// Recompute an owner's usage from their stored files and overwrite the
    /// stored counter.
    ///
    /// Trashed files still hold their blobs and count until they are purged,
    /// matching the `Created`/`Purged` events. Returns the new value.
    pub async fn reconcile(&self, owner_id: &str) -> Result<i64> {
        let used: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET storage_used = (
                 SELECT COALESCE(SUM(size), 0) FROM files
                 WHERE owner_id = users.id
             )
             WHERE id = ?
             RETURNING storage_used",
        )
        .bind(owner_id)
        .fetch_optional(self.db.pool())
        .await?;

        let used = used.ok_or_else(|| DriveError::NotFound("owner".to_string()))?;
        debug!("Reconciled storage for {}: {} bytes", owner_id, used);
        Ok(used)
    }

    /// Reconcile every owner. Returns the number of owners processed.
    pub async fn reconcile_all(&self) -> Result<usize> {
        let owners = UserRepository::list_ids(self.db.pool()).await?;
        for owner_id in &owners {
            if let Err(e) = self.reconcile(owner_id).await {
                warn!("Failed to reconcile storage for {}: {}", owner_id, e);
            }
        }
        info!("Reconciled storage for {} owners", owners.len());
        Ok(owners.len())
    }

    /// Current usage and limit of an owner.
    pub async fn usage(&self, owner_id: &str) -> Result<QuotaUsage> {
        let user = UserRepository::get_by_id(self.db.pool(), owner_id)
            .await?
            .ok_or_else(|| DriveError::NotFound("owner".to_string()))?;
        Ok(QuotaUsage {
            used: user.storage_used,
            limit: user.storage_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;

    async fn setup_db() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        UserRepository::create(db.pool(), &NewUser::new("u1", "u1@example.com", 1_000))
            .await
            .unwrap();
        db
    }

    fn created(size: i64) -> FileEvent {
        FileEvent::Created {
            owner_id: "u1".to_string(),
            size,
        }
    }

    fn purged(size: i64) -> FileEvent {
        FileEvent::Purged {
            owner_id: "u1".to_string(),
            size,
        }
    }

    #[tokio::test]
    async fn test_record_increment_and_decrement() {
        let db = setup_db().await;
        let tracker = QuotaTracker::new(&db);

        QuotaTracker::record(db.pool(), &created(300)).await.unwrap();
        QuotaTracker::record(db.pool(), &created(200)).await.unwrap();
        QuotaTracker::record(db.pool(), &purged(100)).await.unwrap();

        assert_eq!(tracker.usage("u1").await.unwrap().used, 400);
    }

    #[tokio::test]
    async fn test_decrement_floors_at_zero() {
        let db = setup_db().await;
        let tracker = QuotaTracker::new(&db);

        QuotaTracker::record(db.pool(), &created(50)).await.unwrap();
        QuotaTracker::record(db.pool(), &purged(80)).await.unwrap();

        assert_eq!(tracker.usage("u1").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_record_unknown_owner() {
        let db = setup_db().await;

        let event = FileEvent::Created {
            owner_id: "ghost".to_string(),
            size: 1,
        };
        let result = QuotaTracker::record(db.pool(), &event).await;
        assert!(matches!(result, Err(DriveError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reconcile_overwrites_drift() {
        let db = setup_db().await;
        let tracker = QuotaTracker::new(&db);

        // Counter drifted without any files existing
        QuotaTracker::record(db.pool(), &created(999)).await.unwrap();

        assert_eq!(tracker.reconcile("u1").await.unwrap(), 0);
        assert_eq!(tracker.reconcile("u1").await.unwrap(), 0);
        assert_eq!(tracker.usage("u1").await.unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_reconcile_unknown_owner() {
        let db = setup_db().await;
        let tracker = QuotaTracker::new(&db);

        assert!(matches!(
            tracker.reconcile("ghost").await,
            Err(DriveError::NotFound(_))
        ));
    }

    #[test]
    fn test_quota_usage_helpers() {
        let usage = QuotaUsage {
            used: 120,
            limit: 100,
        };
        assert!(usage.is_over_limit());
        assert_eq!(usage.remaining(), 0);

        let usage = QuotaUsage { used: 40, limit: 100 };
        assert!(!usage.is_over_limit());
        assert_eq!(usage.remaining(), 60);
    }
}

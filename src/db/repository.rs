//! User repository for drivetree.

use chrono::Utc;
use sqlx::SqliteExecutor;
use validator::ValidateEmail;

use super::user::{NewUser, User};
use crate::{DriveError, Result};

const USER_COLUMNS: &str = "id, email, display_name, storage_used, storage_limit, created_at";

/// Repository for owner rows.
pub struct UserRepository;

impl UserRepository {
    /// Create a new owner.
    ///
    /// Returns the created owner with zero storage used.
    pub async fn create<'e, E>(executor: E, new_user: &NewUser) -> Result<User>
    where
        E: SqliteExecutor<'e>,
    {
        if !new_user.email.validate_email() {
            return Err(DriveError::Validation(format!(
                "invalid email address: {}",
                new_user.email
            )));
        }
        if new_user.storage_limit < 0 {
            return Err(DriveError::Validation(
                "storage limit cannot be negative".to_string(),
            ));
        }

        let sql = format!(
            "INSERT INTO users (id, email, display_name, storage_used, storage_limit, created_at)
             VALUES (?, ?, ?, 0, ?, ?)
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(&new_user.id)
            .bind(&new_user.email)
            .bind(&new_user.display_name)
            .bind(new_user.storage_limit)
            .bind(Utc::now())
            .fetch_one(executor)
            .await?;

        Ok(user)
    }

    /// Get an owner by ID.
    pub async fn get_by_id<'e, E>(executor: E, id: &str) -> Result<Option<User>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(user)
    }

    /// Get an owner by email (case-insensitive).
    pub async fn get_by_email<'e, E>(executor: E, email: &str) -> Result<Option<User>>
    where
        E: SqliteExecutor<'e>,
    {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ? COLLATE NOCASE");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email.trim())
            .fetch_optional(executor)
            .await?;
        Ok(user)
    }

    /// Check whether an owner exists.
    pub async fn exists<'e, E>(executor: E, id: &str) -> Result<bool>
    where
        E: SqliteExecutor<'e>,
    {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
            .bind(id)
            .fetch_one(executor)
            .await?;
        Ok(exists)
    }

    /// List the IDs of all owners.
    pub async fn list_ids<'e, E>(executor: E) -> Result<Vec<String>>
    where
        E: SqliteExecutor<'e>,
    {
        let ids = sqlx::query_scalar("SELECT id FROM users ORDER BY id")
            .fetch_all(executor)
            .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_user() {
        let db = setup_db().await;

        let user = UserRepository::create(
            db.pool(),
            &NewUser::new("u1", "alice@example.com", 1024).with_display_name("Alice"),
        )
        .await
        .unwrap();

        assert_eq!(user.id, "u1");
        assert_eq!(user.display_name, "Alice");
        assert_eq!(user.storage_used, 0);
        assert_eq!(user.storage_limit, 1024);
    }

    #[tokio::test]
    async fn test_create_invalid_email() {
        let db = setup_db().await;

        let result =
            UserRepository::create(db.pool(), &NewUser::new("u1", "not-an-email", 1)).await;
        assert!(matches!(result, Err(DriveError::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_duplicate_email() {
        let db = setup_db().await;

        UserRepository::create(db.pool(), &NewUser::new("u1", "a@example.com", 1))
            .await
            .unwrap();
        let result =
            UserRepository::create(db.pool(), &NewUser::new("u2", "A@example.com", 1)).await;
        assert!(matches!(result, Err(DriveError::Database(_))));
    }

    #[tokio::test]
    async fn test_get_by_email_case_insensitive() {
        let db = setup_db().await;

        UserRepository::create(db.pool(), &NewUser::new("u1", "Alice@Example.com", 1))
            .await
            .unwrap();

        let found = UserRepository::get_by_email(db.pool(), "alice@example.com")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "u1");
        assert!(UserRepository::get_by_email(db.pool(), "bob@example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_exists_and_list_ids() {
        let db = setup_db().await;

        UserRepository::create(db.pool(), &NewUser::new("b", "b@example.com", 1))
            .await
            .unwrap();
        UserRepository::create(db.pool(), &NewUser::new("a", "a@example.com", 1))
            .await
            .unwrap();

        assert!(UserRepository::exists(db.pool(), "a").await.unwrap());
        assert!(!UserRepository::exists(db.pool(), "zzz").await.unwrap());
        assert_eq!(
            UserRepository::list_ids(db.pool()).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(UserRepository::get_by_id(db.pool(), "a").await.unwrap().is_some());
    }
}

//! Account repository
//!
//! This module provides:
//! - `AccountRepository` trait defining the interface for account data access
//! - `SqlxAccountRepository` implementing the trait for SQLite
//!
//! The premium flag is not writable here; it only changes together with a
//! checkout intent in `CheckoutRepository::mark_paid`.

use crate::db::DynDatabasePool;
use crate::models::Account;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account, returning it with its assigned ID
    async fn create(&self, account: &Account) -> Result<Account>;

    /// Get account by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Account>>;

    /// Get account by username
    async fn get_by_username(&self, username: &str) -> Result<Option<Account>>;

    /// Get account by email (case-insensitive)
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Mark the account's email as verified
    async fn set_email_verified(&self, id: i64) -> Result<()>;
}

/// SQLx-based account repository implementation
pub struct SqlxAccountRepository {
    pool: DynDatabasePool,
}

impl SqlxAccountRepository {
    /// Create a new SQLx account repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AccountRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AccountRepository for SqlxAccountRepository {
    async fn create(&self, account: &Account) -> Result<Account> {
        create_account(self.pool.sqlite(), account).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_ACCOUNT))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get account by ID")?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("{} WHERE username = ?", SELECT_ACCOUNT))
            .bind(username)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get account by username")?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("{} WHERE email = ? COLLATE NOCASE", SELECT_ACCOUNT))
            .bind(email)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get account by email")?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn set_email_verified(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET email_verified = 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to mark email verified")?;
        Ok(())
    }
}

const SELECT_ACCOUNT: &str = r#"
    SELECT id, username, email, password_hash, email_verified, created_at,
           trial_ends_at, is_premium, premium_since
    FROM accounts
"#;

async fn create_account(pool: &SqlitePool, account: &Account) -> Result<Account> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (username, email, password_hash, email_verified, created_at,
                              trial_ends_at, is_premium, premium_since)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&account.username)
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(account.email_verified)
    .bind(account.created_at)
    .bind(account.trial_ends_at)
    .bind(account.is_premium)
    .bind(account.premium_since)
    .execute(pool)
    .await
    .context("Failed to create account")?;

    let mut created = account.clone();
    created.id = result.last_insert_rowid();
    Ok(created)
}

pub(crate) fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account> {
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        email_verified: row.try_get("email_verified")?,
        created_at: row.try_get("created_at")?,
        trial_ends_at: row.try_get("trial_ends_at")?,
        is_premium: row.try_get("is_premium")?,
        premium_since: row.try_get("premium_since")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::is_unique_violation;
    use crate::db::{create_test_pool, migrations};
    use chrono::{Duration, Utc};

    async fn setup() -> Arc<dyn AccountRepository> {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        SqlxAccountRepository::boxed(pool)
    }

    fn new_account(username: &str, email: &str) -> Account {
        let now = Utc::now();
        Account::new(
            username.to_string(),
            email.to_string(),
            "hash".to_string(),
            now,
            Some(now + Duration::days(7)),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = setup().await;
        let created = repo.create(&new_account("alice", "a@x.com")).await.unwrap();
        assert!(created.id > 0);

        let by_id = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
        assert_eq!(by_id.trial_ends_at, created.trial_ends_at);
        assert!(!by_id.is_premium);

        let by_name = repo.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);

        let by_email = repo.get_by_email("A@X.COM").await.unwrap().unwrap();
        assert_eq!(by_email.id, created.id);
    }

    #[tokio::test]
    async fn test_missing_account_is_none() {
        let repo = setup().await;
        assert!(repo.get_by_id(42).await.unwrap().is_none());
        assert!(repo.get_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let repo = setup().await;
        repo.create(&new_account("alice", "a@x.com")).await.unwrap();

        let err = repo.create(&new_account("alice2", "a@x.com")).await.unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[tokio::test]
    async fn test_set_email_verified_keeps_trial() {
        let repo = setup().await;
        let created = repo.create(&new_account("alice", "a@x.com")).await.unwrap();

        repo.set_email_verified(created.id).await.unwrap();

        let account = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert!(account.email_verified);
        assert!(account.trial_ends_at.is_some());
    }
}

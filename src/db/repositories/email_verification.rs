//! Pending email verification codes, one per account.

use crate::db::DynDatabasePool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

/// A code mailed to the account's address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailVerification {
    pub account_id: i64,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    /// Wrong guesses against this code so far
    pub failed_attempts: i64,
}

#[async_trait]
pub trait EmailVerificationRepository: Send + Sync {
    /// Store a code, replacing any earlier one (and its failure count)
    async fn upsert(&self, verification: &EmailVerification) -> Result<()>;

    async fn get(&self, account_id: i64) -> Result<Option<EmailVerification>>;

    /// Count a wrong guess; returns the new total, 0 if no code is pending
    async fn record_failure(&self, account_id: i64) -> Result<i64>;

    async fn delete(&self, account_id: i64) -> Result<()>;
}

pub struct SqlxEmailVerificationRepository {
    pool: DynDatabasePool,
}

impl SqlxEmailVerificationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn EmailVerificationRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl EmailVerificationRepository for SqlxEmailVerificationRepository {
    async fn upsert(&self, verification: &EmailVerification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO email_verifications (account_id, code, expires_at, failed_attempts)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(account_id) DO UPDATE SET
                code = excluded.code,
                expires_at = excluded.expires_at,
                failed_attempts = excluded.failed_attempts
            "#,
        )
        .bind(verification.account_id)
        .bind(&verification.code)
        .bind(verification.expires_at)
        .bind(verification.failed_attempts)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to store verification code")?;
        Ok(())
    }

    async fn get(&self, account_id: i64) -> Result<Option<EmailVerification>> {
        let row = sqlx::query(
            "SELECT account_id, code, expires_at, failed_attempts FROM email_verifications WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to get verification code")?;

        match row {
            Some(row) => Ok(Some(EmailVerification {
                account_id: row.try_get("account_id")?,
                code: row.try_get("code")?,
                expires_at: row.try_get("expires_at")?,
                failed_attempts: row.try_get("failed_attempts")?,
            })),
            None => Ok(None),
        }
    }

    async fn record_failure(&self, account_id: i64) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE email_verifications SET failed_attempts = failed_attempts + 1
            WHERE account_id = ?
            RETURNING failed_attempts
            "#,
        )
        .bind(account_id)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to record verification failure")?;

        match row {
            Some(row) => Ok(row.try_get("failed_attempts")?),
            None => Ok(0),
        }
    }

    async fn delete(&self, account_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM email_verifications WHERE account_id = ?")
            .bind(account_id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete verification code")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxAccountRepository;
    use crate::db::{create_test_pool, migrations};
    use crate::models::Account;

    #[tokio::test]
    async fn test_upsert_replaces_code() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let account = SqlxAccountRepository::boxed(pool.clone())
            .create(&Account::new(
                "alice".to_string(),
                "a@x.com".to_string(),
                "hash".to_string(),
                Utc::now(),
                None,
            ))
            .await
            .unwrap();
        let repo = SqlxEmailVerificationRepository::boxed(pool);

        let expires_at = Utc::now();
        for code in ["111111", "222222"] {
            repo.upsert(&EmailVerification {
                account_id: account.id,
                code: code.to_string(),
                expires_at,
                failed_attempts: 0,
            })
            .await
            .unwrap();
            assert_eq!(repo.record_failure(account.id).await.unwrap(), 1);
        }

        let stored = repo.get(account.id).await.unwrap().unwrap();
        assert_eq!(stored.code, "222222");
        assert_eq!(stored.failed_attempts, 1);
        assert_eq!(repo.record_failure(account.id).await.unwrap(), 2);

        repo.delete(account.id).await.unwrap();
        assert!(repo.get(account.id).await.unwrap().is_none());
        assert_eq!(repo.record_failure(account.id).await.unwrap(), 0);
    }
}

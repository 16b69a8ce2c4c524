//! Checkout intent repository
//!
//! Status changes are compare-and-set on `status = 'pending'`, so a terminal
//! intent is never re-opened and a paid transition is applied at most once.

use crate::db::DynDatabasePool;
use crate::models::{CheckoutIntent, CheckoutStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

/// Checkout intent repository trait
#[async_trait]
pub trait CheckoutRepository: Send + Sync {
    /// Insert a new intent; fails if the account already has a pending one
    async fn create(&self, intent: &CheckoutIntent) -> Result<()>;

    /// Get intent by gateway id
    async fn get(&self, id: &str) -> Result<Option<CheckoutIntent>>;

    /// The account's pending intent, if any
    async fn find_pending(&self, account_id: i64) -> Result<Option<CheckoutIntent>>;

    /// Atomically move a pending intent to `paid` and grant premium to its
    /// account. Returns `false` if the intent was no longer pending.
    async fn mark_paid(&self, id: &str, paid_at: DateTime<Utc>) -> Result<bool>;

    /// Move a pending intent to `expired` or `failed`. Returns `false` if
    /// the intent was no longer pending.
    async fn resolve(&self, id: &str, status: CheckoutStatus, at: DateTime<Utc>) -> Result<bool>;
}

/// SQLx-based checkout repository implementation
pub struct SqlxCheckoutRepository {
    pool: DynDatabasePool,
}

impl SqlxCheckoutRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CheckoutRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_INTENT: &str = r#"
    SELECT id, account_id, package_id, checkout_url, status, created_at, resolved_at
    FROM checkout_intents
"#;

#[async_trait]
impl CheckoutRepository for SqlxCheckoutRepository {
    async fn create(&self, intent: &CheckoutIntent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkout_intents (id, account_id, package_id, checkout_url, status,
                                          created_at, resolved_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&intent.id)
        .bind(intent.account_id)
        .bind(&intent.package_id)
        .bind(&intent.checkout_url)
        .bind(intent.status.as_str())
        .bind(intent.created_at)
        .bind(intent.resolved_at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to create checkout intent")?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CheckoutIntent>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_INTENT))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get checkout intent")?;
        row.as_ref().map(row_to_intent).transpose()
    }

    async fn find_pending(&self, account_id: i64) -> Result<Option<CheckoutIntent>> {
        let row = sqlx::query(&format!(
            "{} WHERE account_id = ? AND status = 'pending'",
            SELECT_INTENT
        ))
        .bind(account_id)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to find pending checkout intent")?;
        row.as_ref().map(row_to_intent).transpose()
    }

    async fn mark_paid(&self, id: &str, paid_at: DateTime<Utc>) -> Result<bool> {
        let mut tx = self
            .pool
            .sqlite()
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let updated = sqlx::query(
            "UPDATE checkout_intents SET status = 'paid', resolved_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(paid_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to mark checkout intent paid")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.context("Failed to roll back")?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE accounts
            SET is_premium = 1, premium_since = COALESCE(premium_since, ?)
            WHERE id = (SELECT account_id FROM checkout_intents WHERE id = ?)
            "#,
        )
        .bind(paid_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to grant premium")?;

        tx.commit().await.context("Failed to commit premium upgrade")?;
        Ok(true)
    }

    async fn resolve(&self, id: &str, status: CheckoutStatus, at: DateTime<Utc>) -> Result<bool> {
        anyhow::ensure!(
            matches!(status, CheckoutStatus::Expired | CheckoutStatus::Failed),
            "resolve only records expired or failed, got {}",
            status
        );

        let updated = sqlx::query(
            "UPDATE checkout_intents SET status = ?, resolved_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to resolve checkout intent")?;

        Ok(updated.rows_affected() > 0)
    }
}

fn row_to_intent(row: &sqlx::sqlite::SqliteRow) -> Result<CheckoutIntent> {
    let status: String = row.try_get("status")?;
    Ok(CheckoutIntent {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        package_id: row.try_get("package_id")?,
        checkout_url: row.try_get("checkout_url")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{AccountRepository, SqlxAccountRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::Account;

    async fn setup() -> (Arc<dyn CheckoutRepository>, Arc<dyn AccountRepository>, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let accounts = SqlxAccountRepository::boxed(pool.clone());
        let account = accounts
            .create(&Account::new(
                "alice".to_string(),
                "a@x.com".to_string(),
                "hash".to_string(),
                Utc::now(),
                None,
            ))
            .await
            .unwrap();

        (SqlxCheckoutRepository::boxed(pool), accounts, account.id)
    }

    fn pending(id: &str, account_id: i64) -> CheckoutIntent {
        CheckoutIntent {
            id: id.to_string(),
            account_id,
            package_id: "premium_monthly".to_string(),
            checkout_url: format!("https://pay.example.com/{}", id),
            status: CheckoutStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_pending() {
        let (repo, _, account_id) = setup().await;
        repo.create(&pending("cs_a", account_id)).await.unwrap();

        let found = repo.find_pending(account_id).await.unwrap().unwrap();
        assert_eq!(found.id, "cs_a");
        assert_eq!(found.status, CheckoutStatus::Pending);
        assert!(repo.create(&pending("cs_b", account_id)).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_paid_applies_once() {
        let (repo, accounts, account_id) = setup().await;
        repo.create(&pending("cs_a", account_id)).await.unwrap();

        let first_paid_at = Utc::now();
        assert!(repo.mark_paid("cs_a", first_paid_at).await.unwrap());
        let after_first = accounts.get_by_id(account_id).await.unwrap().unwrap();
        assert!(after_first.is_premium);
        assert!(after_first.premium_since.is_some());

        assert!(!repo.mark_paid("cs_a", first_paid_at + chrono::Duration::hours(1)).await.unwrap());
        let after_second = accounts.get_by_id(account_id).await.unwrap().unwrap();
        assert_eq!(after_first, after_second);

        let intent = repo.get("cs_a").await.unwrap().unwrap();
        assert_eq!(intent.status, CheckoutStatus::Paid);
        assert!(repo.find_pending(account_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_intent_never_reopened() {
        let (repo, accounts, account_id) = setup().await;
        repo.create(&pending("cs_a", account_id)).await.unwrap();

        assert!(repo.resolve("cs_a", CheckoutStatus::Expired, Utc::now()).await.unwrap());
        assert!(!repo.mark_paid("cs_a", Utc::now()).await.unwrap());
        assert!(!repo.resolve("cs_a", CheckoutStatus::Failed, Utc::now()).await.unwrap());

        let intent = repo.get("cs_a").await.unwrap().unwrap();
        assert_eq!(intent.status, CheckoutStatus::Expired);
        assert!(!accounts.get_by_id(account_id).await.unwrap().unwrap().is_premium);
    }

    #[tokio::test]
    async fn test_resolve_rejects_non_failure_status() {
        let (repo, _, account_id) = setup().await;
        repo.create(&pending("cs_a", account_id)).await.unwrap();
        assert!(repo.resolve("cs_a", CheckoutStatus::Paid, Utc::now()).await.is_err());
    }
}

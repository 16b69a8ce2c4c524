//! Ledger of consumed legacy redirect identifiers.

use crate::db::DynDatabasePool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Legacy exchange ledger trait
#[async_trait]
pub trait LegacyExchangeRepository: Send + Sync {
    /// Record the identifier as consumed. Returns `false` if it already was.
    async fn claim(&self, external_session_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Link a consumed identifier to the account it resolved to
    async fn attach_account(&self, external_session_id: &str, account_id: i64) -> Result<()>;
}

pub struct SqlxLegacyExchangeRepository {
    pool: DynDatabasePool,
}

impl SqlxLegacyExchangeRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn LegacyExchangeRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl LegacyExchangeRepository for SqlxLegacyExchangeRepository {
    async fn claim(&self, external_session_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO legacy_exchanges (external_session_id, consumed_at) VALUES (?, ?)",
        )
        .bind(external_session_id)
        .bind(at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to claim legacy session id")?;

        Ok(result.rows_affected() == 1)
    }

    async fn attach_account(&self, external_session_id: &str, account_id: i64) -> Result<()> {
        sqlx::query("UPDATE legacy_exchanges SET account_id = ? WHERE external_session_id = ?")
            .bind(account_id)
            .bind(external_session_id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to attach account to legacy exchange")?;
        Ok(())
    }
}

//! Session store
//!
//! Source of truth for "is this caller authenticated". Tokens are opaque,
//! expiry is checked on every resolve and expired rows are removed when
//! seen.

use crate::db::repositories::{is_unique_violation, SessionRepository};
use crate::models::Session;
use crate::services::clock::DynClock;
use crate::services::error::ServiceError;
use crate::services::password::generate_session_token;
use anyhow::Context;
use chrono::Duration;
use std::sync::Arc;

/// Attempts at drawing a token that is not already in use
const TOKEN_ATTEMPTS: usize = 3;

pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    clock: DynClock,
    lifetime: Duration,
}

impl SessionStore {
    pub fn new(repo: Arc<dyn SessionRepository>, clock: DynClock, expiration_days: i64) -> Self {
        Self {
            repo,
            clock,
            lifetime: Duration::days(expiration_days),
        }
    }

    /// Issue a new session for the account.
    ///
    /// The token never equals a live one: a collision on insert draws a
    /// fresh token.
    pub async fn create(&self, account_id: i64) -> Result<Session, ServiceError> {
        for _ in 0..TOKEN_ATTEMPTS {
            let issued_at = self.clock.now();
            let session = Session {
                token: generate_session_token()?,
                account_id,
                issued_at,
                expires_at: issued_at + self.lifetime,
            };

            match self.repo.create(&session).await {
                Ok(()) => {
                    tracing::debug!(account_id, "session issued");
                    return Ok(session);
                }
                Err(e) if is_unique_violation(&e) => {
                    tracing::warn!(account_id, "session token collision, redrawing");
                }
                Err(e) => return Err(e.context("Failed to store session").into()),
            }
        }

        Err(ServiceError::Internal(anyhow::anyhow!(
            "could not draw an unused session token"
        )))
    }

    /// Resolve a token to its account id.
    pub async fn resolve(&self, token: &str) -> Result<i64, ServiceError> {
        let session = self
            .repo
            .get(token)
            .await
            .context("Failed to look up session")?
            .ok_or(ServiceError::SessionInvalid)?;

        if session.is_expired_at(self.clock.now()) {
            self.repo
                .delete(token)
                .await
                .context("Failed to delete expired session")?;
            tracing::debug!(account_id = session.account_id, "expired session removed");
            return Err(ServiceError::SessionInvalid);
        }

        Ok(session.account_id)
    }

    /// Destroy a session. Unknown tokens are not an error.
    pub async fn destroy(&self, token: &str) -> Result<(), ServiceError> {
        self.repo
            .delete(token)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Remove every expired session, returning how many were dropped
    pub async fn purge_expired(&self) -> Result<u64, ServiceError> {
        let removed = self
            .repo
            .delete_expired(self.clock.now())
            .await
            .context("Failed to purge expired sessions")?;
        if removed > 0 {
            tracing::info!(removed, "purged expired sessions");
        }
        Ok(removed)
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxAccountRepository, SqlxSessionRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::Account;
    use crate::services::clock::ManualClock;
    use chrono::Utc;

    async fn setup() -> (SessionStore, Arc<ManualClock>, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

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

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = SessionStore::new(SqlxSessionRepository::boxed(pool), clock.clone(), 7);
        (store, clock, account.id)
    }

    #[tokio::test]
    async fn test_create_and_resolve() {
        let (store, _, account_id) = setup().await;
        let session = store.create(account_id).await.unwrap();

        assert_eq!(session.expires_at - session.issued_at, Duration::days(7));
        assert_eq!(store.resolve(&session.token).await.unwrap(), account_id);
    }

    #[tokio::test]
    async fn test_multiple_sessions_per_account() {
        let (store, _, account_id) = setup().await;
        let a = store.create(account_id).await.unwrap();
        let b = store.create(account_id).await.unwrap();

        assert_ne!(a.token, b.token);
        assert_eq!(store.resolve(&a.token).await.unwrap(), account_id);
        assert_eq!(store.resolve(&b.token).await.unwrap(), account_id);
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let (store, _, _) = setup().await;
        assert!(matches!(
            store.resolve("nope").await,
            Err(ServiceError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_session_is_invalid_and_removed() {
        let (store, clock, account_id) = setup().await;
        let session = store.create(account_id).await.unwrap();

        clock.advance(Duration::days(7));
        assert!(matches!(
            store.resolve(&session.token).await,
            Err(ServiceError::SessionInvalid)
        ));

        // Winding the clock back cannot revive a removed session
        clock.advance(Duration::days(-7));
        assert!(matches!(
            store.resolve(&session.token).await,
            Err(ServiceError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (store, _, account_id) = setup().await;
        let session = store.create(account_id).await.unwrap();

        store.destroy(&session.token).await.unwrap();
        store.destroy(&session.token).await.unwrap();
        assert!(store.resolve(&session.token).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock, account_id) = setup().await;
        store.create(account_id).await.unwrap();
        clock.advance(Duration::days(3));
        let live = store.create(account_id).await.unwrap();

        clock.advance(Duration::days(5));
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.resolve(&live.token).await.unwrap(), account_id);
    }
}

//! Access controller
//!
//! The one surface the HTTP edge talks to. Every gated call derives a fresh
//! entitlement snapshot from storage and the clock; nothing is cached
//! between requests.

use crate::gateway::{ContentProvider, MarketDataProvider, Quote};
use crate::models::{Account, CheckoutIntent, CheckoutStatus, EntitlementSnapshot, Session, Tier};
use crate::services::auth::{AuthGateway, RegisterInput};
use crate::services::clock::DynClock;
use crate::services::entitlement::EntitlementEvaluator;
use crate::services::error::ServiceError;
use crate::services::payment::{PaymentReconciler, RetryPolicy};
use crate::services::trial_clock::TrialClock;
use std::sync::Arc;

pub struct AccessController {
    auth: Arc<AuthGateway>,
    payments: Arc<PaymentReconciler>,
    evaluator: EntitlementEvaluator,
    trial_clock: TrialClock,
    clock: DynClock,
    market: Arc<dyn MarketDataProvider>,
    content: Arc<dyn ContentProvider>,
    retry_policy: RetryPolicy,
}

impl AccessController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth: Arc<AuthGateway>,
        payments: Arc<PaymentReconciler>,
        evaluator: EntitlementEvaluator,
        trial_clock: TrialClock,
        clock: DynClock,
        market: Arc<dyn MarketDataProvider>,
        content: Arc<dyn ContentProvider>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            auth,
            payments,
            evaluator,
            trial_clock,
            clock,
            market,
            content,
            retry_policy,
        }
    }

    pub fn auth(&self) -> &AuthGateway {
        &self.auth
    }

    pub fn payments(&self) -> &PaymentReconciler {
        &self.payments
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub async fn register(&self, input: RegisterInput) -> Result<Account, ServiceError> {
        self.auth.register(input).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ServiceError> {
        self.auth.login(username, password).await
    }

    pub async fn logout(&self, token: &str) -> Result<(), ServiceError> {
        self.auth.logout(token).await
    }

    pub async fn resolve_session(&self, token: &str) -> Result<Account, ServiceError> {
        self.auth.resolve_session(token).await
    }

    pub async fn exchange_legacy_redirect(
        &self,
        external_session_id: &str,
    ) -> Result<Session, ServiceError> {
        self.auth.exchange_legacy_redirect(external_session_id).await
    }

    pub async fn request_email_verification(&self, account_id: i64) -> Result<(), ServiceError> {
        self.auth.request_email_verification(account_id).await
    }

    pub async fn confirm_email(&self, account_id: i64, code: &str) -> Result<(), ServiceError> {
        self.auth.confirm_email(account_id, code).await
    }

    /// Snapshot for an already resolved account
    pub fn snapshot_for(&self, account: &Account) -> EntitlementSnapshot {
        let trial = self.trial_clock.evaluate(account, self.clock.now());
        self.evaluator.evaluate(Some(account), Some(trial))
    }

    /// Entitlement of the caller.
    ///
    /// No token is an anonymous caller; a token that does not resolve is an
    /// error rather than a silent downgrade.
    pub async fn current_entitlement(
        &self,
        token: Option<&str>,
    ) -> Result<EntitlementSnapshot, ServiceError> {
        match token {
            None => Ok(self.evaluator.evaluate(None, None)),
            Some(token) => {
                let account = self.auth.resolve_session(token).await?;
                Ok(self.snapshot_for(&account))
            }
        }
    }

    /// Fail with `Forbidden(tier)` unless the caller may see `tier`
    pub async fn authorize(
        &self,
        token: Option<&str>,
        tier: Tier,
    ) -> Result<EntitlementSnapshot, ServiceError> {
        let snapshot = self.current_entitlement(token).await?;
        if !snapshot.allows(tier) {
            tracing::debug!(%tier, authenticated = snapshot.is_authenticated, "tier denied");
            return Err(ServiceError::Forbidden(tier));
        }
        Ok(snapshot)
    }

    pub async fn initiate_upgrade(
        &self,
        token: &str,
        package_id: &str,
        origin_url: &str,
    ) -> Result<CheckoutIntent, ServiceError> {
        let account = self.auth.resolve_session(token).await?;
        self.payments
            .initiate(account.id, package_id, origin_url)
            .await
    }

    /// Poll an intent owned by the caller; other accounts' intents are unknown
    pub async fn poll_upgrade(
        &self,
        token: &str,
        intent_id: &str,
    ) -> Result<CheckoutStatus, ServiceError> {
        let account = self.auth.resolve_session(token).await?;
        match self.payments.get_intent(intent_id).await? {
            Some(intent) if intent.account_id == account.id => {
                self.payments.poll(intent_id).await
            }
            _ => Err(ServiceError::IntentNotFound(intent_id.to_string())),
        }
    }

    /// Poll under the configured retry policy until a terminal status
    pub async fn await_upgrade(
        &self,
        token: &str,
        intent_id: &str,
    ) -> Result<CheckoutStatus, ServiceError> {
        self.retry_policy
            .run(|| self.poll_upgrade(token, intent_id))
            .await
    }

    pub async fn quotes(&self, token: Option<&str>, tier: Tier) -> Result<Vec<Quote>, ServiceError> {
        self.authorize(token, tier).await?;
        Ok(self.market.get_quotes(tier).await?)
    }

    /// Weekly picks at the richest tier the caller holds
    pub async fn weekly_picks(&self, token: &str) -> Result<serde_json::Value, ServiceError> {
        let snapshot = self.current_entitlement(Some(token)).await?;
        Ok(self
            .content
            .get_weekly_picks(snapshot.highest_tier())
            .await?)
    }
}

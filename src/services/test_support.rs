//! Scripted collaborators and a fully wired service graph for tests.

use crate::config::{PackageConfig, PaymentConfig};
use crate::db::repositories::{
    AccountRepository, SqlxAccountRepository, SqlxCheckoutRepository,
    SqlxEmailVerificationRepository, SqlxLegacyExchangeRepository, SqlxSessionRepository,
};
use crate::db::{create_test_pool, migrations, DynDatabasePool};
use crate::gateway::{
    ContentProvider, GatewayCheckout, GatewayError, IdentityClaims, LegacyIdentityProvider,
    Mailer, MarketDataProvider, PaymentGateway, Quote,
};
use crate::models::{Account, CheckoutStatus, Tier};
use crate::services::access::AccessController;
use crate::services::auth::{AuthGateway, RegisterInput};
use crate::services::clock::ManualClock;
use crate::services::entitlement::EntitlementEvaluator;
use crate::services::payment::{PaymentReconciler, RetryPolicy};
use crate::services::session_store::SessionStore;
use crate::services::trial_clock::TrialClock;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MASTER_USERNAME: &str = "root";

/// Payment gateway whose session statuses are set by the test
#[derive(Default)]
pub struct ScriptedGateway {
    statuses: Mutex<HashMap<String, CheckoutStatus>>,
    failures: Mutex<VecDeque<GatewayError>>,
    success_urls: Mutex<Vec<String>>,
    status_calls: Mutex<usize>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, id: &str, status: CheckoutStatus) {
        self.statuses.lock().unwrap().insert(id.to_string(), status);
    }

    pub fn fail_next_status(&self, err: GatewayError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn created(&self) -> usize {
        self.success_urls.lock().unwrap().len()
    }

    pub fn last_success_url(&self) -> Option<String> {
        self.success_urls.lock().unwrap().last().cloned()
    }

    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock().unwrap()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_checkout(
        &self,
        _account_id: i64,
        _package: &PackageConfig,
        success_url: &str,
        _cancel_url: &str,
    ) -> Result<GatewayCheckout, GatewayError> {
        let mut urls = self.success_urls.lock().unwrap();
        urls.push(success_url.to_string());
        let id = format!("cs_test_{}", urls.len());
        self.statuses
            .lock()
            .unwrap()
            .insert(id.clone(), CheckoutStatus::Pending);
        Ok(GatewayCheckout {
            url: format!("https://checkout.example/{}", id),
            id,
        })
    }

    async fn get_status(&self, checkout_id: &str) -> Result<CheckoutStatus, GatewayError> {
        *self.status_calls.lock().unwrap() += 1;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.statuses
            .lock()
            .unwrap()
            .get(checkout_id)
            .copied()
            .ok_or_else(|| GatewayError::UnknownReference(checkout_id.to_string()))
    }
}

/// Identity provider replaying a fixed script of answers
#[derive(Clone)]
pub struct ScriptedIdentity {
    inner: Arc<ScriptedIdentityInner>,
}

struct ScriptedIdentityInner {
    fixed: Option<IdentityClaims>,
    script: Mutex<VecDeque<Result<IdentityClaims, GatewayError>>>,
    calls: Mutex<usize>,
}

impl ScriptedIdentity {
    /// Always answers with the same claims
    pub fn ok(email: &str, name: Option<&str>) -> Self {
        Self::build(
            Some(IdentityClaims {
                email: email.to_string(),
                name: name.map(str::to_string),
            }),
            Vec::new(),
        )
    }

    /// Answers in order, then rejects every id
    pub fn sequence(answers: Vec<Result<IdentityClaims, GatewayError>>) -> Self {
        Self::build(None, answers)
    }

    fn build(fixed: Option<IdentityClaims>, answers: Vec<Result<IdentityClaims, GatewayError>>) -> Self {
        Self {
            inner: Arc::new(ScriptedIdentityInner {
                fixed,
                script: Mutex::new(answers.into()),
                calls: Mutex::new(0),
            }),
        }
    }

    pub fn calls(&self) -> usize {
        *self.inner.calls.lock().unwrap()
    }
}

#[async_trait]
impl LegacyIdentityProvider for ScriptedIdentity {
    async fn fetch_session_data(
        &self,
        external_session_id: &str,
    ) -> Result<IdentityClaims, GatewayError> {
        *self.inner.calls.lock().unwrap() += 1;
        if let Some(claims) = &self.inner.fixed {
            return Ok(claims.clone());
        }
        self.inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::UnknownReference(external_session_id.to_string())))
    }
}

/// Mailer that keeps what it was asked to send
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn last(&self) -> Option<(String, String)> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_verification_code(&self, to_email: &str, code: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to_email.to_string(), code.to_string()));
        Ok(())
    }
}

/// Content upstream that echoes the tier it was asked for
pub struct TierEchoContent;

#[async_trait]
impl MarketDataProvider for TierEchoContent {
    async fn get_quotes(&self, tier: Tier) -> Result<Vec<Quote>, GatewayError> {
        Ok(vec![Quote {
            symbol: tier.to_string().to_uppercase(),
            price: 100.0,
            change_percent: 1.5,
            change_24h: 1.5,
        }])
    }
}

#[async_trait]
impl ContentProvider for TierEchoContent {
    async fn get_weekly_picks(&self, tier: Tier) -> Result<serde_json::Value, GatewayError> {
        Ok(serde_json::json!({ "tier": tier.to_string(), "picks": [] }))
    }
}

pub fn test_packages() -> Vec<PackageConfig> {
    PaymentConfig::default().packages
}

/// Every service wired against an in-memory database and scripted gateways
pub struct Harness {
    pub pool: DynDatabasePool,
    pub start: DateTime<Utc>,
    pub clock: Arc<ManualClock>,
    pub accounts: Arc<dyn AccountRepository>,
    pub gateway: Arc<ScriptedGateway>,
    pub mailer: Arc<RecordingMailer>,
    pub auth: Arc<AuthGateway>,
    pub payments: Arc<PaymentReconciler>,
    pub access: Arc<AccessController>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_identity(ScriptedIdentity::sequence(Vec::new())).await
    }

    pub async fn with_identity(identity: ScriptedIdentity) -> Self {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();

        let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let trial_clock = TrialClock::new(7);

        let accounts = SqlxAccountRepository::boxed(pool.clone());
        let sessions = Arc::new(SessionStore::new(
            SqlxSessionRepository::boxed(pool.clone()),
            clock.clone(),
            7,
        ));
        let gateway = Arc::new(ScriptedGateway::new());
        let mailer = Arc::new(RecordingMailer::default());
        let content = Arc::new(TierEchoContent);

        let auth = Arc::new(AuthGateway::new(
            accounts.clone(),
            sessions,
            SqlxLegacyExchangeRepository::boxed(pool.clone()),
            SqlxEmailVerificationRepository::boxed(pool.clone()),
            Arc::new(identity),
            Some(mailer.clone() as Arc<dyn Mailer>),
            trial_clock,
            clock.clone(),
            3,
        ));
        let payments = Arc::new(PaymentReconciler::new(
            SqlxCheckoutRepository::boxed(pool.clone()),
            gateway.clone(),
            test_packages(),
            clock.clone(),
        ));
        let access = Arc::new(AccessController::new(
            auth.clone(),
            payments.clone(),
            EntitlementEvaluator::new(Some(MASTER_USERNAME.to_string())),
            trial_clock,
            clock.clone(),
            content.clone(),
            content,
            RetryPolicy::new(Duration::from_millis(1), 3),
        ));

        Self {
            pool,
            start,
            clock,
            accounts,
            gateway,
            mailer,
            auth,
            payments,
            access,
        }
    }

    /// Register `username` with email `{username}@x.com` and password `pw1`
    pub async fn register(&self, username: &str) -> Account {
        self.auth
            .register(RegisterInput::new(
                username,
                format!("{}@x.com", username),
                "pw1",
            ))
            .await
            .unwrap()
    }

    pub async fn account(&self, id: i64) -> Account {
        self.accounts.get_by_id(id).await.unwrap().unwrap()
    }
}

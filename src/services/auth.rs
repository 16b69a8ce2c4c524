//! Auth gateway
//!
//! Registration, credential login, session resolution and logout, the
//! one-time legacy redirect exchange and email verification.

use crate::db::repositories::{
    is_unique_violation, AccountRepository, EmailVerification, EmailVerificationRepository,
    LegacyExchangeRepository,
};
use crate::gateway::{GatewayError, IdentityClaims, LegacyIdentityProvider, Mailer};
use crate::models::{Account, Session};
use crate::services::clock::DynClock;
use crate::services::error::{DuplicateField, ServiceError};
use crate::services::password::{
    generate_verification_code, hash_password, unusable_password_hash, verify_against_dummy,
    verify_password,
};
use crate::services::rate_limiter::{
    AttemptLimiter, FAILURE_WINDOW_MINUTES, LOGIN_MAX_FAILURES, VERIFY_MAX_FAILURES,
};
use crate::services::session_store::SessionStore;
use crate::services::trial_clock::TrialClock;
use anyhow::Context;
use chrono::Duration;
use std::sync::Arc;

/// Lifetime of an emailed verification code
const VERIFICATION_CODE_MINUTES: i64 = 10;

/// Wrong guesses after which a mailed code is discarded
const VERIFICATION_CODE_MAX_FAILURES: i64 = 5;

/// Longest accepted username
const MAX_USERNAME_LEN: usize = 50;

/// Input for `AuthGateway::register`
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }
}

pub struct AuthGateway {
    accounts: Arc<dyn AccountRepository>,
    sessions: Arc<SessionStore>,
    legacy_ledger: Arc<dyn LegacyExchangeRepository>,
    verifications: Arc<dyn EmailVerificationRepository>,
    identity: Arc<dyn LegacyIdentityProvider>,
    mailer: Option<Arc<dyn Mailer>>,
    trial_clock: TrialClock,
    clock: DynClock,
    min_password_length: usize,
    login_limiter: AttemptLimiter,
    verify_limiter: AttemptLimiter,
}

impl AuthGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        sessions: Arc<SessionStore>,
        legacy_ledger: Arc<dyn LegacyExchangeRepository>,
        verifications: Arc<dyn EmailVerificationRepository>,
        identity: Arc<dyn LegacyIdentityProvider>,
        mailer: Option<Arc<dyn Mailer>>,
        trial_clock: TrialClock,
        clock: DynClock,
        min_password_length: usize,
    ) -> Self {
        let window = Duration::minutes(FAILURE_WINDOW_MINUTES);
        Self {
            accounts,
            sessions,
            legacy_ledger,
            verifications,
            identity,
            mailer,
            trial_clock,
            login_limiter: AttemptLimiter::new(LOGIN_MAX_FAILURES, window, clock.clone()),
            verify_limiter: AttemptLimiter::new(VERIFY_MAX_FAILURES, window, clock.clone()),
            clock,
            min_password_length,
        }
    }

    /// Register a new account and start its trial clock.
    ///
    /// The trial window is fixed here, once; a second registration with
    /// the same email fails instead of resetting it.
    pub async fn register(&self, input: RegisterInput) -> Result<Account, ServiceError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_lowercase();
        self.validate_register_input(&username, &email, &input.password)?;

        if self
            .accounts
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(ServiceError::DuplicateAccount(DuplicateField::Username));
        }
        if self
            .accounts
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(ServiceError::DuplicateAccount(DuplicateField::Email));
        }

        let password_hash = hash_password(&input.password)?;
        let now = self.clock.now();
        let account = Account::new(
            username,
            email,
            password_hash,
            now,
            Some(self.trial_clock.trial_end_for(now)),
        );

        let created = self.insert_account(&account).await?;
        tracing::info!(account_id = created.id, "account registered");
        Ok(created)
    }

    /// Check credentials and issue a session.
    ///
    /// Unknown usernames and wrong passwords fail identically. Repeated
    /// failures for one username are refused with `RateLimited` for a while.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ServiceError> {
        let username = username.trim();
        let limit_key = username.to_lowercase();
        self.login_limiter.check(&limit_key).await?;

        let account = self
            .accounts
            .get_by_username(username)
            .await
            .context("Failed to look up account")?;

        let Some(account) = account else {
            verify_against_dummy(password);
            self.login_limiter.record_failure(&limit_key).await;
            tracing::debug!("login failed");
            return Err(ServiceError::InvalidCredentials);
        };

        let valid = verify_password(password, &account.password_hash)
            .context("Failed to verify password")?;
        if !valid {
            self.login_limiter.record_failure(&limit_key).await;
            tracing::debug!(account_id = account.id, "login failed");
            return Err(ServiceError::InvalidCredentials);
        }

        self.login_limiter.clear(&limit_key).await;
        let session = self.sessions.create(account.id).await?;
        tracing::info!(account_id = account.id, "login succeeded");
        Ok(session)
    }

    /// Resolve a token to its account
    pub async fn resolve_session(&self, token: &str) -> Result<Account, ServiceError> {
        let account_id = self.sessions.resolve(token).await?;
        self.accounts
            .get_by_id(account_id)
            .await
            .context("Failed to load session account")?
            .ok_or(ServiceError::SessionInvalid)
    }

    /// Destroy a session; succeeds for unknown tokens too
    pub async fn logout(&self, token: &str) -> Result<(), ServiceError> {
        self.sessions.destroy(token).await
    }

    /// Exchange a legacy redirect identifier for a local session.
    ///
    /// The identifier is claimed before the provider is contacted, so it
    /// can be used at most once even if the exchange then fails. A
    /// transient provider failure is retried once; after that the
    /// identifier is spent and the exchange fails for good.
    pub async fn exchange_legacy_redirect(
        &self,
        external_session_id: &str,
    ) -> Result<Session, ServiceError> {
        let external_session_id = external_session_id.trim();
        if external_session_id.is_empty() {
            return Err(ServiceError::ExchangeFailed("missing session id".to_string()));
        }

        let claimed = self
            .legacy_ledger
            .claim(external_session_id, self.clock.now())
            .await?;
        if !claimed {
            tracing::warn!("legacy session id replayed");
            return Err(ServiceError::ExchangeFailed(
                "session id already used".to_string(),
            ));
        }

        let claims = match self.identity.fetch_session_data(external_session_id).await {
            Err(GatewayError::Unavailable(reason)) => {
                tracing::warn!(%reason, "identity provider unavailable, retrying once");
                self.identity.fetch_session_data(external_session_id).await
            }
            other => other,
        }
        .map_err(|e| match e {
            other @ GatewayError::NotConfigured(_) => ServiceError::from(other),
            other => {
                tracing::warn!(error = %other, "legacy session exchange failed");
                ServiceError::ExchangeFailed(other.to_string())
            }
        })?;

        let account = self.account_for_claims(&claims).await?;
        self.legacy_ledger
            .attach_account(external_session_id, account.id)
            .await?;

        let session = self.sessions.create(account.id).await?;
        tracing::info!(account_id = account.id, "legacy session exchanged");
        Ok(session)
    }

    /// Mail a fresh verification code to the account's address
    pub async fn request_email_verification(&self, account_id: i64) -> Result<(), ServiceError> {
        let account = self
            .accounts
            .get_by_id(account_id)
            .await
            .context("Failed to load account")?
            .ok_or(ServiceError::SessionInvalid)?;

        if account.email_verified {
            return Ok(());
        }

        let mailer = self.mailer.as_ref().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("email delivery is not configured"))
        })?;

        let code = generate_verification_code()?;
        self.verifications
            .upsert(&EmailVerification {
                account_id,
                code: code.clone(),
                expires_at: self.clock.now() + Duration::minutes(VERIFICATION_CODE_MINUTES),
                failed_attempts: 0,
            })
            .await?;

        mailer
            .send_verification_code(&account.email, &code)
            .await
            .map_err(|e| ServiceError::GatewayUnavailable(e.to_string()))?;
        tracing::info!(account_id, "verification code issued");
        Ok(())
    }

    /// Confirm a mailed code and mark the email verified.
    ///
    /// A code is discarded after a handful of wrong guesses, and the account
    /// is refused with `RateLimited` while its recent failures are too many.
    pub async fn confirm_email(&self, account_id: i64, code: &str) -> Result<(), ServiceError> {
        let limit_key = account_id.to_string();
        self.verify_limiter.check(&limit_key).await?;

        let pending = self
            .verifications
            .get(account_id)
            .await?
            .ok_or(ServiceError::VerificationFailed)?;

        if pending.expires_at <= self.clock.now() {
            self.verifications.delete(account_id).await?;
            return Err(ServiceError::VerificationFailed);
        }
        if pending.code != code.trim() {
            self.verify_limiter.record_failure(&limit_key).await;
            let failures = self.verifications.record_failure(account_id).await?;
            if failures >= VERIFICATION_CODE_MAX_FAILURES {
                self.verifications.delete(account_id).await?;
                tracing::warn!(account_id, failures, "verification code discarded after repeated failures");
            }
            return Err(ServiceError::VerificationFailed);
        }

        self.accounts.set_email_verified(account_id).await?;
        self.verifications.delete(account_id).await?;
        self.verify_limiter.clear(&limit_key).await;
        tracing::info!(account_id, "email verified");
        Ok(())
    }

    /// Forget failed attempts that have aged out of the limit window
    pub async fn cleanup_rate_limits(&self) {
        self.login_limiter.cleanup().await;
        self.verify_limiter.cleanup().await;
    }

    pub async fn get_account(&self, account_id: i64) -> Result<Option<Account>, ServiceError> {
        Ok(self
            .accounts
            .get_by_id(account_id)
            .await
            .context("Failed to load account")?)
    }

    fn validate_register_input(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ServiceError> {
        if username.is_empty() {
            return Err(ServiceError::Validation("Username is required".to_string()));
        }
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(ServiceError::Validation(format!(
                "Username must be at most {} characters",
                MAX_USERNAME_LEN
            )));
        }
        if email.is_empty() || !is_plausible_email(email) {
            return Err(ServiceError::Validation("A valid email is required".to_string()));
        }
        if password.trim().is_empty() || password.chars().count() < self.min_password_length {
            return Err(ServiceError::WeakPassword {
                min_length: self.min_password_length,
            });
        }
        Ok(())
    }

    async fn insert_account(&self, account: &Account) -> Result<Account, ServiceError> {
        match self.accounts.create(account).await {
            Ok(created) => Ok(created),
            // Lost a race with a concurrent registration
            Err(e) if is_unique_violation(&e) => {
                let field = if self
                    .accounts
                    .get_by_username(&account.username)
                    .await
                    .context("Failed to check username")?
                    .is_some()
                {
                    DuplicateField::Username
                } else {
                    DuplicateField::Email
                };
                Err(ServiceError::DuplicateAccount(field))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Find the account for the asserted email, provisioning one if needed
    async fn account_for_claims(&self, claims: &IdentityClaims) -> Result<Account, ServiceError> {
        let email = claims.email.trim().to_lowercase();
        if !is_plausible_email(&email) {
            return Err(ServiceError::ExchangeFailed(
                "provider returned no usable email".to_string(),
            ));
        }

        if let Some(existing) = self
            .accounts
            .get_by_email(&email)
            .await
            .context("Failed to look up account by email")?
        {
            if !existing.email_verified {
                self.accounts.set_email_verified(existing.id).await?;
            }
            return self
                .accounts
                .get_by_id(existing.id)
                .await?
                .ok_or_else(|| ServiceError::InvariantViolation("account vanished".to_string()));
        }

        let base = username_base(claims.name.as_deref(), &email);
        let mut username = base.clone();
        let mut suffix = 1;
        while self
            .accounts
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            suffix += 1;
            username = format!("{}-{}", base, suffix);
        }

        let now = self.clock.now();
        let mut account = Account::new(
            username,
            email,
            unusable_password_hash()?,
            now,
            Some(self.trial_clock.trial_end_for(now)),
        );
        // The provider has already verified the address
        account.email_verified = true;

        let created = self.insert_account(&account).await?;
        tracing::info!(account_id = created.id, "account provisioned from legacy identity");
        Ok(created)
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

/// Username derived from the display name, else the email's local part
fn username_base(name: Option<&str>, email: &str) -> String {
    let source = name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email));

    let cleaned: String = source
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(MAX_USERNAME_LEN - 4)
        .collect();

    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}

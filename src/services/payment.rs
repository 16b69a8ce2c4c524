//! Payment reconciler
//!
//! Owns the checkout intent lifecycle `pending -> {paid, expired, failed}`.
//! The gateway is the only authority on payment state; we mirror it with
//! compare-and-set updates so a confirmation is applied exactly once no
//! matter how many polls or webhooks report it.

use crate::config::{PackageConfig, PaymentConfig};
use crate::db::repositories::{is_unique_violation, CheckoutRepository};
use crate::gateway::PaymentGateway;
use crate::models::{CheckoutIntent, CheckoutStatus};
use crate::services::clock::DynClock;
use crate::services::error::ServiceError;
use anyhow::Context;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Number of cached per-account locks before idle ones are dropped
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Default wait for a delayed payment method to settle
const DEFAULT_ASYNC_PAYMENT_WINDOW_HOURS: i64 = 14 * 24;

/// What a verified gateway webhook says happened to a checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventKind {
    /// Completed, expired or paid; re-read the session
    SessionUpdated,
    /// A delayed payment method was declined after checkout completed
    AsyncPaymentFailed,
}

impl GatewayEventKind {
    /// Classify a gateway event type; `None` for events we do not handle
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "checkout.session.async_payment_failed" => Some(Self::AsyncPaymentFailed),
            t if t.starts_with("checkout.session.") => Some(Self::SessionUpdated),
            _ => None,
        }
    }
}

/// Per-account async mutexes serializing billing writes in this process
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, account_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() >= LOCK_PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(account_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// How a client (or an edge handler) keeps polling a pending intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn from_config(config: &PaymentConfig) -> Self {
        Self::new(
            Duration::from_millis(config.poll_interval_ms),
            config.max_poll_attempts,
        )
    }

    /// Drive `poll` until it reports a terminal status.
    ///
    /// Transient gateway failures count as attempts and are retried; any
    /// other error stops the loop. Running out of attempts is reported as
    /// `ConfirmationTimedOut`, never as an expired payment.
    pub async fn run<F, Fut>(&self, mut poll: F) -> Result<CheckoutStatus, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CheckoutStatus, ServiceError>>,
    {
        for attempt in 1..=self.max_attempts {
            match poll().await {
                Ok(status) if status.is_terminal() => return Ok(status),
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    tracing::debug!(attempt, error = %e, "transient failure while polling");
                }
                Err(e) => return Err(e),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(ServiceError::ConfirmationTimedOut {
            attempts: self.max_attempts,
        })
    }
}

pub struct PaymentReconciler {
    checkouts: Arc<dyn CheckoutRepository>,
    gateway: Arc<dyn PaymentGateway>,
    packages: Vec<PackageConfig>,
    clock: DynClock,
    locks: AccountLocks,
    async_payment_window: chrono::Duration,
}

impl PaymentReconciler {
    pub fn new(
        checkouts: Arc<dyn CheckoutRepository>,
        gateway: Arc<dyn PaymentGateway>,
        packages: Vec<PackageConfig>,
        clock: DynClock,
    ) -> Self {
        Self {
            checkouts,
            gateway,
            packages,
            clock,
            locks: AccountLocks::new(),
            async_payment_window: chrono::Duration::hours(DEFAULT_ASYNC_PAYMENT_WINDOW_HOURS),
        }
    }

    /// How long an intent may stay pending at the gateway before it is
    /// recorded as failed
    pub fn with_async_payment_window(mut self, window: chrono::Duration) -> Self {
        self.async_payment_window = window;
        self
    }

    pub fn package(&self, package_id: &str) -> Option<&PackageConfig> {
        self.packages.iter().find(|p| p.id == package_id)
    }

    /// Start (or resume) an upgrade.
    ///
    /// An account has at most one pending intent; asking again returns it
    /// instead of opening a second checkout, once the gateway confirms it is
    /// still open. A pending intent the gateway has closed is recorded and
    /// replaced; one the gateway reports paid is returned as paid.
    pub async fn initiate(
        &self,
        account_id: i64,
        package_id: &str,
        origin_url: &str,
    ) -> Result<CheckoutIntent, ServiceError> {
        let package = self
            .package(package_id)
            .ok_or_else(|| ServiceError::UnknownPackage(package_id.to_string()))?;

        let _guard = self.locks.lock(account_id).await;

        if let Some(pending) = self.find_pending(account_id).await? {
            let reported = match self.gateway.get_status(&pending.id).await {
                Ok(status) => self.settle_overdue(&pending, status),
                Err(e) => {
                    tracing::warn!(account_id, intent_id = %pending.id, error = %e, "gateway unavailable, reusing pending checkout");
                    return Ok(pending);
                }
            };
            match self.apply_locked(&pending, reported).await? {
                CheckoutStatus::Pending => {
                    tracing::debug!(account_id, intent_id = %pending.id, "reusing pending checkout");
                    return Ok(pending);
                }
                CheckoutStatus::Paid => {
                    return self
                        .get_intent(&pending.id)
                        .await?
                        .ok_or_else(|| ServiceError::IntentNotFound(pending.id.clone()));
                }
                status => {
                    tracing::info!(account_id, intent_id = %pending.id, %status, "pending checkout closed at the gateway, opening a new one");
                }
            }
        }

        let origin = origin_url.trim_end_matches('/');
        let success_url = format!(
            "{}/payment-success?session_id={{CHECKOUT_SESSION_ID}}",
            origin
        );
        let cancel_url = format!("{}/", origin);

        let checkout = self
            .gateway
            .create_checkout(account_id, package, &success_url, &cancel_url)
            .await?;

        let intent = CheckoutIntent {
            id: checkout.id,
            account_id,
            package_id: package.id.clone(),
            checkout_url: checkout.url,
            status: CheckoutStatus::Pending,
            created_at: self.clock.now(),
            resolved_at: None,
        };

        match self.checkouts.create(&intent).await {
            Ok(()) => {}
            // Another process opened one first
            Err(e) if is_unique_violation(&e) => {
                if let Some(pending) = self.find_pending(account_id).await? {
                    return Ok(pending);
                }
                return Err(e.context("Failed to store checkout intent").into());
            }
            Err(e) => return Err(e.context("Failed to store checkout intent").into()),
        }

        tracing::info!(account_id, intent_id = %intent.id, package_id = %intent.package_id, "checkout initiated");
        Ok(intent)
    }

    pub async fn get_intent(&self, intent_id: &str) -> Result<Option<CheckoutIntent>, ServiceError> {
        Ok(self
            .checkouts
            .get(intent_id)
            .await
            .context("Failed to load checkout intent")?)
    }

    /// One reconciliation step.
    ///
    /// Terminal intents answer from storage. Pending ones ask the gateway
    /// and record a terminal answer.
    pub async fn poll(&self, intent_id: &str) -> Result<CheckoutStatus, ServiceError> {
        let intent = self
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| ServiceError::IntentNotFound(intent_id.to_string()))?;

        if intent.status.is_terminal() {
            return Ok(intent.status);
        }

        let reported = self.gateway.get_status(&intent.id).await?;
        let reported = self.settle_overdue(&intent, reported);
        self.apply(&intent, reported).await
    }

    /// React to a verified gateway webhook for `intent_id`.
    ///
    /// The gateway's own status is re-read in every case. A failed delayed
    /// payment closes the intent as failed unless the gateway reports it
    /// paid or expired. Events for checkouts we never opened are ignored.
    pub async fn handle_gateway_event(
        &self,
        intent_id: &str,
        kind: GatewayEventKind,
    ) -> Result<Option<CheckoutStatus>, ServiceError> {
        let result = match kind {
            GatewayEventKind::SessionUpdated => self.poll(intent_id).await,
            GatewayEventKind::AsyncPaymentFailed => self.poll_failed_payment(intent_id).await,
        };

        match result {
            Ok(status) => Ok(Some(status)),
            Err(ServiceError::IntentNotFound(_)) => {
                tracing::warn!(intent_id, "webhook for unknown checkout ignored");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn poll_failed_payment(&self, intent_id: &str) -> Result<CheckoutStatus, ServiceError> {
        let intent = self
            .get_intent(intent_id)
            .await?
            .ok_or_else(|| ServiceError::IntentNotFound(intent_id.to_string()))?;

        if intent.status.is_terminal() {
            return Ok(intent.status);
        }

        let reported = match self.gateway.get_status(&intent.id).await? {
            CheckoutStatus::Pending => CheckoutStatus::Failed,
            status => status,
        };
        self.apply(&intent, reported).await
    }

    /// A checkout still unpaid after the async payment window has failed
    fn settle_overdue(&self, intent: &CheckoutIntent, reported: CheckoutStatus) -> CheckoutStatus {
        if reported == CheckoutStatus::Pending
            && self.clock.now() - intent.created_at >= self.async_payment_window
        {
            tracing::warn!(account_id = intent.account_id, intent_id = %intent.id, "checkout unpaid past the async payment window");
            return CheckoutStatus::Failed;
        }
        reported
    }

    async fn apply(
        &self,
        intent: &CheckoutIntent,
        reported: CheckoutStatus,
    ) -> Result<CheckoutStatus, ServiceError> {
        if reported == CheckoutStatus::Pending {
            return Ok(CheckoutStatus::Pending);
        }

        let _guard = self.locks.lock(intent.account_id).await;
        self.apply_locked(intent, reported).await
    }

    /// Record a gateway answer; the caller holds the account lock
    async fn apply_locked(
        &self,
        intent: &CheckoutIntent,
        reported: CheckoutStatus,
    ) -> Result<CheckoutStatus, ServiceError> {
        if reported == CheckoutStatus::Pending {
            return Ok(CheckoutStatus::Pending);
        }

        let now = self.clock.now();

        let won = match reported {
            CheckoutStatus::Paid => self
                .checkouts
                .mark_paid(&intent.id, now)
                .await
                .context("Failed to record payment")?,
            status => self
                .checkouts
                .resolve(&intent.id, status, now)
                .await
                .context("Failed to resolve checkout intent")?,
        };

        if won {
            if reported == CheckoutStatus::Paid {
                tracing::info!(account_id = intent.account_id, intent_id = %intent.id, "payment confirmed, premium granted");
            } else {
                tracing::info!(account_id = intent.account_id, intent_id = %intent.id, status = %reported, "checkout closed without payment");
            }
            return Ok(reported);
        }

        // Someone else resolved it between our read and our write
        let stored = self
            .get_intent(&intent.id)
            .await?
            .ok_or_else(|| ServiceError::IntentNotFound(intent.id.clone()))?;

        if reported == CheckoutStatus::Paid && stored.status != CheckoutStatus::Paid {
            tracing::error!(intent_id = %intent.id, stored = %stored.status, "gateway reports payment for a closed checkout");
            return Err(ServiceError::InvariantViolation(format!(
                "checkout {} is {} but the gateway reports it paid",
                intent.id, stored.status
            )));
        }

        Ok(stored.status)
    }

    async fn find_pending(&self, account_id: i64) -> Result<Option<CheckoutIntent>, ServiceError> {
        Ok(self
            .checkouts
            .find_pending(account_id)
            .await
            .context("Failed to look up pending checkout")?)
    }
}

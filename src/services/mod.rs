//! Services layer - Business logic
//!
//! This module contains the entitlement and payment services:
//! - Session issuing and resolution
//! - Trial clock and entitlement evaluation
//! - Registration, login and the legacy redirect exchange
//! - Failed-attempt limits on login and email code confirmation
//! - Checkout intent reconciliation against the payment gateway
//! - The access controller the HTTP edge talks to

pub mod access;
pub mod auth;
pub mod clock;
pub mod entitlement;
pub mod error;
pub mod password;
pub mod payment;
pub mod rate_limiter;
pub mod session_store;
pub mod trial_clock;

#[cfg(test)]
pub(crate) mod test_support;

pub use access::AccessController;
pub use auth::{AuthGateway, RegisterInput};
pub use clock::{Clock, DynClock, ManualClock, SystemClock};
pub use entitlement::EntitlementEvaluator;
pub use error::{DuplicateField, ServiceError};
pub use password::{hash_password, verify_password};
pub use payment::{AccountLocks, GatewayEventKind, PaymentReconciler, RetryPolicy};
pub use rate_limiter::AttemptLimiter;
pub use session_store::SessionStore;
pub use trial_clock::TrialClock;

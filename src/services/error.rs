//! Service error taxonomy shared by the auth, payment and access services.

use crate::models::Tier;
use std::fmt;

/// Which unique field a registration collided on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateField {
    Username,
    Email,
}

impl fmt::Display for DuplicateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateField::Username => write!(f, "username"),
            DuplicateField::Email => write!(f, "email"),
        }
    }
}

/// Error types for service operations
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Login failed; never says which half was wrong
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("An account with this {0} already exists")]
    DuplicateAccount(DuplicateField),

    #[error("Password must be at least {min_length} characters")]
    WeakPassword { min_length: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown, expired or destroyed session token
    #[error("Invalid or expired session")]
    SessionInvalid,

    #[error("Access to {0} content requires an upgrade")]
    Forbidden(Tier),

    #[error("Legacy session exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Invalid or expired verification code")]
    VerificationFailed,

    /// Too many failed attempts for this username or account
    #[error("Too many failed attempts, try again in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: i64 },

    #[error("Unknown package: {0}")]
    UnknownPackage(String),

    #[error("Checkout not found: {0}")]
    IntentNotFound(String),

    /// The retry policy ran out of attempts before a terminal status
    #[error("Payment confirmation timed out after {attempts} attempts")]
    ConfirmationTimedOut { attempts: u32 },

    /// Transient failure talking to an external provider
    #[error("Upstream service unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    /// Errors worth another attempt by a polling loop
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::GatewayUnavailable(_))
    }
}

impl From<crate::gateway::GatewayError> for ServiceError {
    fn from(err: crate::gateway::GatewayError) -> Self {
        use crate::gateway::GatewayError;
        match err {
            GatewayError::Unavailable(msg) => ServiceError::GatewayUnavailable(msg),
            GatewayError::UnknownReference(reference) => ServiceError::IntentNotFound(reference),
            GatewayError::Rejected(msg) => ServiceError::GatewayUnavailable(msg),
            GatewayError::NotConfigured(what) => {
                ServiceError::Internal(anyhow::anyhow!("{} is not configured", what))
            }
        }
    }
}

//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the operations for a specific entity.

pub mod account;
pub mod checkout;
pub mod email_verification;
pub mod legacy_exchange;
pub mod session;

pub use account::{AccountRepository, SqlxAccountRepository};
pub use checkout::{CheckoutRepository, SqlxCheckoutRepository};
pub use email_verification::{
    EmailVerification, EmailVerificationRepository, SqlxEmailVerificationRepository,
};
pub use legacy_exchange::{LegacyExchangeRepository, SqlxLegacyExchangeRepository};
pub use session::{SessionRepository, SqlxSessionRepository};

/// Whether a repository error was caused by a UNIQUE constraint
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    }
}

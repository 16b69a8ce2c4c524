//! External collaborators
//!
//! Every outside service sits behind an async trait so the core can be
//! driven by scripted fakes in tests:
//! - `PaymentGateway`: hosted checkout sessions (Stripe REST implementation)
//! - `LegacyIdentityProvider`: resolves legacy redirect session ids
//! - `MarketDataProvider` / `ContentProvider`: upstream quotes and picks
//! - `Mailer`: verification code delivery over SMTP

pub mod content;
pub mod identity;
pub mod mail;
pub mod payment;

pub use content::{ContentProvider, HttpContentProvider, MarketDataProvider, Quote};
pub use identity::{HttpIdentityProvider, IdentityClaims, LegacyIdentityProvider};
pub use mail::{Mailer, SmtpMailer};
pub use payment::{GatewayCheckout, PaymentGateway, StripeCheckoutGateway};

use std::time::Duration;

/// Errors reported by external collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure, timeout or 5xx/429; worth retrying
    #[error("{0}")]
    Unavailable(String),

    /// The remote side does not know the id we sent
    #[error("unknown reference: {0}")]
    UnknownReference(String),

    /// The remote side refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))
}

/// Classify a transport-level reqwest failure
pub(crate) fn transport_error(context: &str, err: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable(format!("{}: {}", context, err))
}

/// Classify a non-success HTTP status
pub(crate) fn status_error(
    context: &str,
    status: reqwest::StatusCode,
    reference: &str,
) -> GatewayError {
    if status == reqwest::StatusCode::NOT_FOUND {
        GatewayError::UnknownReference(reference.to_string())
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        GatewayError::Unavailable(format!("{} returned {}", context, status))
    } else {
        GatewayError::Rejected(format!("{} returned {}", context, status))
    }
}

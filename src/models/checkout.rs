//! Checkout intent model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a checkout intent.
///
/// `Pending` is the only non-terminal state; terminal states are never
/// re-opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    Pending,
    Paid,
    Expired,
    Failed,
}

impl CheckoutStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckoutStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStatus::Pending => "pending",
            CheckoutStatus::Paid => "paid",
            CheckoutStatus::Expired => "expired",
            CheckoutStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckoutStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CheckoutStatus::Pending),
            "paid" => Ok(CheckoutStatus::Paid),
            "expired" => Ok(CheckoutStatus::Expired),
            "failed" => Ok(CheckoutStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid checkout status: {}", s)),
        }
    }
}

/// A request to the payment gateway to collect funds for a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutIntent {
    /// Gateway checkout id
    pub id: String,
    pub account_id: i64,
    pub package_id: String,
    /// Hosted checkout page the user is sent to
    pub checkout_url: String,
    pub status: CheckoutStatus,
    pub created_at: DateTime<Utc>,
    /// When a terminal status was recorded
    pub resolved_at: Option<DateTime<Utc>>,
}

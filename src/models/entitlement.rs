//! Entitlement types
//!
//! Snapshots are derived per request and never stored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Content tier, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Trial,
    Premium,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Trial => write!(f, "trial"),
            Tier::Premium => write!(f, "premium"),
        }
    }
}

impl FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "trial" => Ok(Tier::Trial),
            "premium" => Ok(Tier::Premium),
            _ => Err(anyhow::anyhow!("Invalid tier: {}", s)),
        }
    }
}

/// Result of evaluating the trial clock at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialStatus {
    pub trial_active: bool,
    pub days_remaining: i64,
}

impl TrialStatus {
    pub const INACTIVE: TrialStatus = TrialStatus {
        trial_active: false,
        days_remaining: 0,
    };
}

/// Point-in-time view of what a caller may access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    pub is_authenticated: bool,
    pub is_email_verified: bool,
    pub trial_active: bool,
    pub days_remaining: i64,
    pub is_premium: bool,
    pub accessible_tiers: BTreeSet<Tier>,
}

impl EntitlementSnapshot {
    /// Snapshot for a caller without a session
    pub fn anonymous() -> Self {
        Self {
            is_authenticated: false,
            is_email_verified: false,
            trial_active: false,
            days_remaining: 0,
            is_premium: false,
            accessible_tiers: BTreeSet::from([Tier::Free]),
        }
    }

    pub fn allows(&self, tier: Tier) -> bool {
        self.accessible_tiers.contains(&tier)
    }

    /// Most privileged accessible tier
    pub fn highest_tier(&self) -> Tier {
        self.accessible_tiers
            .iter()
            .next_back()
            .copied()
            .unwrap_or(Tier::Free)
    }
}

//! Trial clock
//!
//! The trial window is fixed once at registration; evaluation is a pure
//! function of the account and the current time.

use crate::models::{Account, TrialStatus};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy)]
pub struct TrialClock {
    length: Duration,
}

impl TrialClock {
    pub fn new(trial_days: i64) -> Self {
        Self {
            length: Duration::days(trial_days),
        }
    }

    /// End of the trial for an account created at `created_at`
    pub fn trial_end_for(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        created_at + self.length
    }

    /// Trial state of `account` at `now`.
    ///
    /// `days_remaining` rounds partial days up and is never negative.
    pub fn evaluate(&self, account: &Account, now: DateTime<Utc>) -> TrialStatus {
        let Some(ends_at) = account.trial_ends_at else {
            return TrialStatus::INACTIVE;
        };

        if now >= ends_at {
            return TrialStatus::INACTIVE;
        }

        let remaining = ends_at - now;
        let whole_days = remaining.num_days();
        let days_remaining = if remaining > Duration::days(whole_days) {
            whole_days + 1
        } else {
            whole_days
        };

        TrialStatus {
            trial_active: true,
            days_remaining,
        }
    }
}

//! Entitlement evaluator
//!
//! Pure mapping from account state and trial status to the set of tiers the
//! caller may access. Missing inputs always produce the most restrictive
//! answer.

use crate::models::{Account, EntitlementSnapshot, Tier, TrialStatus};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct EntitlementEvaluator {
    /// Username that bypasses all gating
    master_username: Option<String>,
}

impl EntitlementEvaluator {
    pub fn new(master_username: Option<String>) -> Self {
        Self {
            master_username: master_username.filter(|m| !m.is_empty()),
        }
    }

    pub fn is_master(&self, account: &Account) -> bool {
        self.master_username.as_deref() == Some(account.username.as_str())
    }

    /// Evaluate a snapshot.
    ///
    /// `trial == None` means the trial state could not be determined and is
    /// treated as inactive.
    pub fn evaluate(
        &self,
        account: Option<&Account>,
        trial: Option<TrialStatus>,
    ) -> EntitlementSnapshot {
        let Some(account) = account else {
            return EntitlementSnapshot::anonymous();
        };

        let trial = trial.unwrap_or(TrialStatus::INACTIVE);
        let mut accessible_tiers = BTreeSet::from([Tier::Free]);

        if self.is_master(account) {
            accessible_tiers.extend([Tier::Trial, Tier::Premium]);
        } else {
            let trial_grant = trial.trial_active && account.email_verified;
            // Tiers are cumulative: premium includes trial content
            if account.is_premium || trial_grant {
                accessible_tiers.extend([Tier::Trial, Tier::Premium]);
            }
        }

        EntitlementSnapshot {
            is_authenticated: true,
            is_email_verified: account.email_verified,
            trial_active: trial.trial_active,
            days_remaining: trial.days_remaining,
            is_premium: account.is_premium,
            accessible_tiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account(username: &str, verified: bool, premium: bool) -> Account {
        let mut account = Account::new(
            username.to_string(),
            format!("{}@x.com", username),
            "hash".to_string(),
            Utc::now(),
            None,
        );
        account.email_verified = verified;
        if premium {
            account.is_premium = true;
            account.premium_since = Some(Utc::now());
        }
        account
    }

    fn active(days: i64) -> Option<TrialStatus> {
        Some(TrialStatus {
            trial_active: true,
            days_remaining: days,
        })
    }

    #[test]
    fn test_anonymous_gets_free_only() {
        let snapshot = EntitlementEvaluator::default().evaluate(None, active(5));
        assert_eq!(snapshot, EntitlementSnapshot::anonymous());
    }

    #[test]
    fn test_verified_trial_unlocks_premium() {
        let snapshot =
            EntitlementEvaluator::default().evaluate(Some(&account("alice", true, false)), active(3));
        assert!(snapshot.allows(Tier::Premium));
        assert!(snapshot.allows(Tier::Trial));
        assert!(!snapshot.is_premium);
        assert_eq!(snapshot.days_remaining, 3);
    }

    #[test]
    fn test_unverified_trial_stays_free() {
        let snapshot =
            EntitlementEvaluator::default().evaluate(Some(&account("alice", false, false)), active(3));
        assert_eq!(snapshot.accessible_tiers, BTreeSet::from([Tier::Free]));
        assert!(snapshot.trial_active);
    }

    #[test]
    fn test_paid_premium_includes_trial_tier() {
        let snapshot = EntitlementEvaluator::default()
            .evaluate(Some(&account("alice", false, true)), Some(TrialStatus::INACTIVE));
        assert!(snapshot.allows(Tier::Premium));
        assert!(snapshot.allows(Tier::Trial));
        assert!(!snapshot.trial_active);
    }

    #[test]
    fn test_unknown_trial_fails_closed() {
        let snapshot =
            EntitlementEvaluator::default().evaluate(Some(&account("alice", true, false)), None);
        assert_eq!(snapshot.accessible_tiers, BTreeSet::from([Tier::Free]));
        assert!(!snapshot.trial_active);
    }

    #[test]
    fn test_master_bypasses_gating() {
        let evaluator = EntitlementEvaluator::new(Some("betty".to_string()));
        let snapshot = evaluator.evaluate(Some(&account("betty", false, false)), None);
        assert!(snapshot.allows(Tier::Premium));
        assert!(snapshot.allows(Tier::Trial));

        let other = evaluator.evaluate(Some(&account("bettyx", false, false)), None);
        assert!(!other.allows(Tier::Premium));
    }

    #[test]
    fn test_empty_master_name_is_ignored() {
        let evaluator = EntitlementEvaluator::new(Some(String::new()));
        let snapshot = evaluator.evaluate(Some(&account("", false, false)), None);
        assert!(!snapshot.allows(Tier::Premium));
    }
}

//! Account model
//!
//! A registered user together with the billing and trial state the
//! entitlement evaluator consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account entity.
///
/// Created at registration (or on the first legacy exchange for an unknown
/// email) and never deleted. `is_premium` is only ever set together with
/// `premium_since`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: i64,
    /// Username (unique)
    pub username: String,
    /// Email address (unique)
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Whether the email address has been confirmed
    pub email_verified: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// End of the trial window, if a trial was granted
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Paid premium flag
    pub is_premium: bool,
    /// When premium was first granted
    pub premium_since: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new, unsaved account.
    ///
    /// The password must already be hashed with
    /// `services::password::hash_password()`.
    pub fn new(
        username: String,
        email: String,
        password_hash: String,
        created_at: DateTime<Utc>,
        trial_ends_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: 0, // Will be set by the database
            username,
            email,
            password_hash,
            email_verified: false,
            created_at,
            trial_ends_at,
            is_premium: false,
            premium_since: None,
        }
    }

    /// Check the premium invariant
    pub fn premium_consistent(&self) -> bool {
        !self.is_premium || self.premium_since.is_some()
    }
}

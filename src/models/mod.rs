//! Data models
//!
//! Database entities (Account, Session, CheckoutIntent) and the derived
//! entitlement types handed to the edge.

mod account;
mod checkout;
mod entitlement;
mod session;

pub use account::Account;
pub use checkout::{CheckoutIntent, CheckoutStatus};
pub use entitlement::{EntitlementSnapshot, Tier, TrialStatus};
pub use session::Session;

//! ShonaliChain decision engine.
//!
//! Pure, IO-free rules the ledger applies before any durable append:
//! - custody: the role-gated transfer precondition chain (first violation wins)
//! - escrow: the Funded -> Released | Refunded | Disputed transition matrix
//! - hoarding: the advisory dwell-time-vs-role-threshold heuristic
//!
//! Nothing here mutates state; the ledger crate owns persistence.

pub mod custody;
pub mod escrow;
pub mod hoarding;

pub use custody::{plan_transfer, validate_registration, TransferPlan};
pub use escrow::{
    plan_dispute, plan_expiry, plan_resolution, releases_on_delivery, status_after_refund,
    validate_fund, ExpireAction,
};
pub use hoarding::{evaluate_dwell, HoardingFlag, HoardingThresholds};

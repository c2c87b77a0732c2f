//! Fraud Review and Penalties
//!
//! Flags suspicious activity, screens payout requests against tiered risk
//! rules, and applies the penalty chain when an operator confirms fraud:
//! trust deduction, flag-count escalation to a permanent ban, device ban,
//! and clawback of the tainted ledger entry.
//!
//! Confirmation resolves the flag first and applies consequences after, so
//! a crash mid-chain can only under-penalize. It never penalizes twice.

mod engine;
mod flag;
mod screen;

pub use engine::{FraudPenaltyEngine, ALERT_AMOUNT_CENTS};
pub use flag::{
    trust_penalty_for, FlagStatus, FraudFlag, FraudHistoryRecord, FraudType, PenaltyResult,
    PERMANENT_BAN_THRESHOLD,
};
pub use screen::{
    AmountTier, PayoutScreen, ScreenOutcome, ScreenVerdict, EVIDENCE_DEADLINE_HOURS,
    NEW_CREATOR_AMOUNT_CENTS, NEW_CREATOR_DAYS,
};

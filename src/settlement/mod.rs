//! Payout Settlement
//!
//! Carries an approved or cleared payout request across the external rail
//! exactly once. The rail call goes first with a deterministic idempotency
//! key; the ledger commit (entries paid, wallet credited, budgets charged,
//! request completed) follows in a single transaction. A commit failure
//! after a successful transfer pages the operators rather than retrying.

mod engine;
mod idempotency;

pub use engine::{SettlementEngine, SweepSummary, SETTLEMENT_SWEEP_JOB};
pub use idempotency::settlement_key;

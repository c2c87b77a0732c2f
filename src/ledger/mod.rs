//! Earnings Ledger
//!
//! Append-oriented record of everything a creator has earned and what has
//! happened to it since. Money enters as held entries, clears through the
//! release window, and leaves through payout settlement or clawback.
//!
//! ## Entry Lifecycle
//!
//! ```text
//! held ──► locked ──► paid
//!   │         │
//!   └─────────┴──► clawed_back (terminal)
//! ```
//!
//! - `held`: accruing, inside the review window, not yet payable
//! - `locked`: cleared for payout, amount frozen, awaiting settlement
//! - `paid`: settled to the external rail, immutable
//! - `clawed_back`: voided by fraud review; paid entries reverse the wallet
//!
//! Amounts are integer cents end to end. Partial payment never happens at
//! settlement; `paid_cents` either equals `accrued_cents` or is zero.

mod accrual;
pub mod entry;
mod memory;
pub mod store;

pub use accrual::{accrual_delta, cpm_cents, AccrualOutcome, AccrualRate};
pub use entry::{
    BrandPayoutSettings, CreatorProfile, DeviceBan, EntryStatus, LedgerEntry, PayoutRequest,
    PayoutSource, PayoutStatus, SourceLifecycle, SourceType, Wallet,
};
pub use memory::MemoryLedgerStore;
pub use store::{LedgerStore, NewEntry, Settlement};

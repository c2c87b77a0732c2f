//! Clearinghouse
//!
//! Payment ledger and payout-clearing engine for creator earnings. Money
//! accrues into held ledger entries, clears a fraud-review window, and
//! settles to an external payout rail exactly once.
//!
//! ## Module Structure
//!
//! ```text
//! clearinghouse/src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Configuration management
//! ├── error.rs       - Ledger error taxonomy
//! ├── ledger/        - Earnings ledger
//! │   ├── entry.rs      - Entries, payout requests, wallets, sources
//! │   ├── accrual.rs    - Rate card math in integer cents
//! │   ├── store.rs      - Storage port (LedgerStore trait)
//! │   └── memory.rs     - In-memory store for tests and local runs
//! ├── release/       - Hold release scheduler
//! ├── settlement/    - Payout settlement engine
//! │   ├── engine.rs     - Rail-first settlement, sweep
//! │   └── idempotency.rs - Deterministic transfer keys
//! ├── fraud/         - Fraud review and penalties
//! │   ├── flag.rs    - Flags, penalty math, audit records
//! │   ├── screen.rs  - Tiered pre-payout screening
//! │   └── engine.rs  - Confirmation chain (penalize, ban, claw back)
//! ├── trust/         - Creator trust scoring
//! ├── rail/          - Payment rail port and in-memory rail
//! ├── notify/        - Notification port (fire and forget)
//! ├── api/           - HTTP API endpoints
//! │   ├── ledger.rs  - Entries, accrual, wallets
//! │   ├── payouts.rs - Requests, screening, batch triggers
//! │   ├── fraud.rs   - Flags and resolution
//! │   ├── trust.rs   - Scores and recalculation
//! │   └── middleware.rs - Admin key auth, rate limiting, headers
//! └── database/      - PostgreSQL persistence
//! ```

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod fraud;
pub mod ledger;
pub mod notify;
pub mod rail;
pub mod release;
pub mod settlement;
pub mod trust;

// Re-export main types for convenience
pub use config::ClearinghouseConfig;
pub use database::DatabasePool;
pub use error::{LedgerError, LedgerResult};
pub use fraud::{
    FlagStatus, FraudFlag, FraudPenaltyEngine, FraudType, PayoutScreen, PenaltyResult,
    ScreenOutcome, ScreenVerdict,
};
pub use ledger::{
    AccrualRate, BrandPayoutSettings, CreatorProfile, EntryStatus, LedgerEntry, LedgerStore,
    MemoryLedgerStore, NewEntry, PayoutRequest, PayoutSource, PayoutStatus, SourceLifecycle,
    SourceType, Wallet,
};
pub use notify::{MemoryNotifier, Notifier, TracingNotifier};
pub use rail::{MemoryRail, PaymentRail, TransferReceipt, TransferRequest, TransferStatus};
pub use release::{ReleaseRunSummary, ReleaseScheduler};
pub use settlement::{settlement_key, SettlementEngine, SweepSummary};
pub use trust::{TrustLevel, TrustScoreCalculator};

// Re-export API types
pub use api::{
    FraudApiState, LedgerApiState, PayoutApiState, SecurityMiddlewareConfig, SecurityState,
    TrustApiState, create_fraud_router, create_ledger_router, create_payout_router,
    create_trust_router,
};

//! PostgreSQL Database Module
//!
//! Provides database operations for ledger entries, payout requests,
//! wallets, fraud records, and trust profiles. `DatabasePool` implements
//! [`crate::ledger::LedgerStore`] over the repositories.

pub mod entries;
pub mod fraud;
pub mod payouts;
pub mod pool;
mod store;
pub mod trust;
pub mod wallets;

pub use entries::EntryRepository;
pub use fraud::FraudRepository;
pub use payouts::PayoutRepository;
pub use pool::DatabasePool;
pub use trust::TrustRepository;
pub use wallets::WalletRepository;

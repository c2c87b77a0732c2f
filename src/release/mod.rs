//! Hold Release Scheduler
//!
//! Moves held ledger entries to locked once their review window has passed
//! and their (user, source) group clears the payout threshold. Groups
//! release all-or-nothing; entries from ended sources release regardless of
//! threshold.

mod scheduler;

pub use scheduler::{ReleaseRunSummary, ReleaseScheduler, RELEASE_JOB_NAME};

//! Storage port for the ledger core
//!
//! Engines depend on this trait, never on a concrete backend. Two
//! implementations ship: the Postgres-backed [`crate::database::DatabasePool`]
//! and the in-memory [`crate::ledger::MemoryLedgerStore`] used by tests and
//! local runs. Multi-row operations (`lock_entries`, `settle_payout`,
//! `reverse_paid_entry`) are atomic in every implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::fraud::{FlagStatus, FraudFlag, FraudHistoryRecord};
use crate::ledger::entry::{
    BrandPayoutSettings, CreatorProfile, DeviceBan, LedgerEntry, PayoutRequest, PayoutSource,
    SourceType, Wallet,
};

/// Parameters for a new held entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub user_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub amount_cents: i64,
    pub release_at: Option<DateTime<Utc>>,
    pub views_snapshot: i64,
}

/// Everything a successful settlement commits in one transaction: entries
/// marked paid, wallet incremented, request completed, source budgets
/// charged.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub request_id: Uuid,
    pub user_id: String,
    /// Entry id and the cents paid against it.
    pub entry_payments: Vec<(Uuid, i64)>,
    pub total_cents: i64,
    pub transfer_id: String,
    pub processed_by: String,
    /// Source id and the cents charged to its budget.
    pub budget_charges: Vec<(String, i64)>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ------------------------------------------------------------------
    // Ledger entries
    // ------------------------------------------------------------------

    /// Creates a held entry. Fails `InvalidAmount` for non-positive cents.
    async fn create_entry(&self, new: NewEntry) -> LedgerResult<LedgerEntry>;

    async fn entry(&self, id: Uuid) -> LedgerResult<Option<LedgerEntry>>;

    async fn entries_for_user(&self, user_id: &str) -> LedgerResult<Vec<LedgerEntry>>;

    /// Adds accrued cents to a held entry and advances its view snapshot.
    async fn accrue(
        &self,
        entry_id: Uuid,
        delta_cents: i64,
        views_snapshot: i64,
        milestone_hit: bool,
    ) -> LedgerResult<()>;

    /// All held entries whose release time has arrived.
    async fn held_entries_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<LedgerEntry>>;

    /// Held entries belonging to sources that have ended, regardless of
    /// release time.
    async fn held_entries_for_ended_sources(&self) -> LedgerResult<Vec<LedgerEntry>>;

    /// Transitions held entries to locked, atomically, all-or-nothing.
    /// Entries no longer held are skipped silently so scheduler retries
    /// stay idempotent. Returns the number actually transitioned.
    async fn lock_entries(&self, ids: &[Uuid]) -> LedgerResult<usize>;

    /// Records a payment against one entry. Fails `Overpayment` when the
    /// amount exceeds the remaining accrual; the entry is left unchanged.
    async fn mark_paid(&self, id: Uuid, paid_cents: i64, request_id: Uuid) -> LedgerResult<()>;

    /// Claws back an unpaid entry. Fails `AlreadyPaid` for paid entries;
    /// those are reversed through `reverse_paid_entry`.
    async fn clawback_entry(&self, id: Uuid, reason: &str) -> LedgerResult<LedgerEntry>;

    /// Reverses an already-paid entry by writing a negative wallet
    /// adjustment in the same transaction that marks the entry clawed
    /// back. Returns the reversed cents.
    async fn reverse_paid_entry(&self, id: Uuid, reason: &str) -> LedgerResult<i64>;

    async fn entries_for_request(&self, request_id: Uuid) -> LedgerResult<Vec<LedgerEntry>>;

    // ------------------------------------------------------------------
    // Sources and thresholds
    // ------------------------------------------------------------------

    async fn source(&self, source_id: &str) -> LedgerResult<Option<PayoutSource>>;

    async fn upsert_source(&self, source: &PayoutSource) -> LedgerResult<()>;

    async fn brand_settings(&self, brand_id: &str) -> LedgerResult<Option<BrandPayoutSettings>>;

    async fn upsert_brand_settings(&self, settings: &BrandPayoutSettings) -> LedgerResult<()>;

    // ------------------------------------------------------------------
    // Payout requests
    // ------------------------------------------------------------------

    /// Gathers the user's locked, unassigned entries into a new pending
    /// request. Fails `NothingToSettle` when none exist.
    async fn open_payout_request(
        &self,
        user_id: &str,
        clearing_ends_at: DateTime<Utc>,
    ) -> LedgerResult<PayoutRequest>;

    async fn payout_request(&self, id: Uuid) -> LedgerResult<Option<PayoutRequest>>;

    /// Compare-and-set from pending/approved to processing. Fails
    /// `AlreadyProcessing` when another worker holds the request and
    /// `NotFound` when it does not exist. Returns the guarded request.
    async fn begin_processing(&self, id: Uuid) -> LedgerResult<PayoutRequest>;

    /// Commits a settlement in one transaction. Any failure leaves every
    /// row untouched.
    async fn settle_payout(&self, settlement: &Settlement) -> LedgerResult<()>;

    /// Marks a processing request failed with an operator-visible reason.
    async fn fail_payout(&self, id: Uuid, reason: &str) -> LedgerResult<()>;

    /// Manual clearing override by an operator.
    async fn approve_payout(&self, id: Uuid, approved_by: &str) -> LedgerResult<()>;

    /// Pending/approved requests whose clearing has elapsed (or that are
    /// approved), ready for the settlement sweep.
    async fn requests_ready_to_settle(&self, now: DateTime<Utc>)
        -> LedgerResult<Vec<PayoutRequest>>;

    async fn completed_payout_count(&self, user_id: &str) -> LedgerResult<i64>;

    // ------------------------------------------------------------------
    // Wallets
    // ------------------------------------------------------------------

    async fn wallet(&self, user_id: &str) -> LedgerResult<Wallet>;

    /// Single atomic balance adjustment outside settlement (admin
    /// corrections, clawback reversals).
    async fn adjust_wallet(&self, user_id: &str, delta_cents: i64, reason: &str)
        -> LedgerResult<()>;

    // ------------------------------------------------------------------
    // Creator profiles and fraud records
    // ------------------------------------------------------------------

    async fn profile(&self, user_id: &str) -> LedgerResult<Option<CreatorProfile>>;

    async fn upsert_profile(&self, profile: &CreatorProfile) -> LedgerResult<()>;

    async fn is_admin(&self, user_id: &str) -> LedgerResult<bool>;

    async fn insert_fraud_flag(&self, flag: &FraudFlag) -> LedgerResult<()>;

    async fn fraud_flag(&self, id: Uuid) -> LedgerResult<Option<FraudFlag>>;

    async fn open_flags_for_user(&self, user_id: &str) -> LedgerResult<Vec<FraudFlag>>;

    /// Moves a flag out of `flagged`, guarded: returns false when the flag
    /// was already resolved, so confirmation is never applied twice.
    async fn resolve_fraud_flag(
        &self,
        id: Uuid,
        resolution: FlagStatus,
        resolved_by: &str,
        trust_penalty: i64,
    ) -> LedgerResult<bool>;

    /// Updates fraud counters and ban state on the profile.
    async fn apply_fraud_penalty(
        &self,
        user_id: &str,
        fraud_flag_count: i64,
        permanent: bool,
        banned_at: Option<DateTime<Utc>>,
        last_fraud_at: DateTime<Utc>,
    ) -> LedgerResult<()>;

    /// Append-only audit trail of confirmed incidents.
    async fn append_fraud_history(&self, record: &FraudHistoryRecord) -> LedgerResult<()>;

    async fn upsert_device_ban(&self, ban: &DeviceBan) -> LedgerResult<()>;

    // ------------------------------------------------------------------
    // Trust scores
    // ------------------------------------------------------------------

    /// Stores the derived score on the profile projection.
    async fn store_trust_score(&self, user_id: &str, score: f64) -> LedgerResult<()>;

    /// Appends one score-change row. Callers only invoke this when the
    /// score actually moved.
    async fn append_score_history(
        &self,
        user_id: &str,
        previous: f64,
        current: f64,
        at: DateTime<Utc>,
    ) -> LedgerResult<()>;

    async fn all_creator_ids(&self) -> LedgerResult<Vec<String>>;

    // ------------------------------------------------------------------
    // Batch job coordination
    // ------------------------------------------------------------------

    /// Advisory lock keyed by job name. Returns false when another run
    /// holds it.
    async fn try_acquire_job_lock(&self, job: &str) -> LedgerResult<bool>;

    async fn release_job_lock(&self, job: &str) -> LedgerResult<()>;
}

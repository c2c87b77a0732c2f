//! Core ledger records: entries, payout requests, wallets, sources
//!
//! All monetary amounts are integer minor units (cents). Statuses are kept
//! as strings at the storage boundary and mapped to enums here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an earning came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Campaign,
    Boost,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Campaign => "campaign",
            SourceType::Boost => "boost",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        match s {
            "campaign" => Some(SourceType::Campaign),
            "boost" => Some(SourceType::Boost),
            _ => None,
        }
    }
}

/// Lifecycle of a ledger entry.
///
/// `Held` entries wait out their release window, `Locked` entries are
/// eligible for settlement, `Paid` entries are immutable, and `ClawedBack`
/// entries were invalidated by confirmed fraud before payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Held,
    Locked,
    Paid,
    ClawedBack,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Held => "held",
            EntryStatus::Locked => "locked",
            EntryStatus::Paid => "paid",
            EntryStatus::ClawedBack => "clawed_back",
        }
    }

    pub fn parse(s: &str) -> Option<EntryStatus> {
        match s {
            "held" => Some(EntryStatus::Held),
            "locked" => Some(EntryStatus::Locked),
            "paid" => Some(EntryStatus::Paid),
            "clawed_back" => Some(EntryStatus::ClawedBack),
            _ => None,
        }
    }
}

/// One unit of accrued value owed to a creator from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub accrued_cents: i64,
    pub paid_cents: i64,
    pub status: EntryStatus,
    pub release_at: Option<DateTime<Utc>>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub last_paid_at: Option<DateTime<Utc>>,
    pub payout_request_id: Option<Uuid>,
    pub clawback_reason: Option<String>,
    pub clawed_back_at: Option<DateTime<Utc>>,
    pub views_snapshot: i64,
    pub milestone_paid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Cents still owed. Invariant: never negative.
    pub fn remaining_cents(&self) -> i64 {
        self.accrued_cents - self.paid_cents
    }

    pub fn is_settled(&self) -> bool {
        self.status == EntryStatus::Paid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Approved,
    Processing,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Approved => "approved",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<PayoutStatus> {
        match s {
            "pending" => Some(PayoutStatus::Pending),
            "approved" => Some(PayoutStatus::Approved),
            "processing" => Some(PayoutStatus::Processing),
            "completed" => Some(PayoutStatus::Completed),
            "failed" => Some(PayoutStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Completed | PayoutStatus::Failed)
    }
}

/// Groups locked entries into a single external transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: Uuid,
    pub user_id: String,
    pub amount_cents: i64,
    pub status: PayoutStatus,
    pub clearing_ends_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub transfer_id: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl PayoutRequest {
    /// A request settles once its clearing window has elapsed, or earlier
    /// under a manual approval override.
    pub fn settleable_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.clearing_ends_at || self.status == PayoutStatus::Approved
    }
}

/// Per-user running balance. Changes only through atomic increments tied to
/// a completed payout or an admin adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    pub balance_cents: i64,
    pub total_earned_cents: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLifecycle {
    Active,
    Completed,
    Cancelled,
}

impl SourceLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLifecycle::Active => "active",
            SourceLifecycle::Completed => "completed",
            SourceLifecycle::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<SourceLifecycle> {
        match s {
            "active" => Some(SourceLifecycle::Active),
            "completed" => Some(SourceLifecycle::Completed),
            "cancelled" => Some(SourceLifecycle::Cancelled),
            _ => None,
        }
    }

    /// Ended sources release their held entries unconditionally.
    pub fn has_ended(&self) -> bool {
        matches!(self, SourceLifecycle::Completed | SourceLifecycle::Cancelled)
    }
}

/// Campaign or boost a ledger entry accrues against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSource {
    pub id: String,
    pub source_type: SourceType,
    pub brand_id: String,
    pub lifecycle: SourceLifecycle,
    /// Boost-level minimum payout override. Falls back to the brand default.
    pub min_payout_cents: Option<i64>,
    pub budget_cents: i64,
    pub budget_used_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandPayoutSettings {
    pub brand_id: String,
    pub default_min_payout_cents: i64,
    pub clearing_period_days: i64,
}

/// Risk inputs attached to a creator account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatorProfile {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub approved_count: i64,
    pub rejected_count: i64,
    pub fraud_flag_count: i64,
    pub fraud_flag_permanent: bool,
    pub last_fraud_at: Option<DateTime<Utc>>,
    pub banned_at: Option<DateTime<Utc>>,
    pub device_fingerprint: Option<String>,
    /// Cached projection of the derived trust score.
    pub trust_score: f64,
    pub is_admin: bool,
}

impl CreatorProfile {
    pub fn account_age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }

    pub fn is_banned(&self) -> bool {
        self.banned_at.is_some()
    }

    pub fn total_submissions(&self) -> i64 {
        self.approved_count + self.rejected_count
    }
}

/// Device-fingerprint ban written when a creator is banned for fraud.
/// Upserted, since the same fingerprint may surface in several incidents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBan {
    pub fingerprint: String,
    pub creator_id: String,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn remaining_tracks_partial_payment() {
        let now = Utc::now();
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: "creator-1".to_string(),
            source_type: SourceType::Campaign,
            source_id: "camp-1".to_string(),
            accrued_cents: 5_000,
            paid_cents: 1_200,
            status: EntryStatus::Locked,
            release_at: Some(now),
            cleared_at: None,
            last_paid_at: None,
            payout_request_id: None,
            clawback_reason: None,
            clawed_back_at: None,
            views_snapshot: 0,
            milestone_paid: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(entry.remaining_cents(), 3_800);
        assert!(!entry.is_settled());
    }

    #[test]
    fn approved_request_settles_before_clearing_ends() {
        let now = Utc::now();
        let mut request = PayoutRequest {
            id: Uuid::new_v4(),
            user_id: "creator-1".to_string(),
            amount_cents: 5_000,
            status: PayoutStatus::Pending,
            clearing_ends_at: now + Duration::days(7),
            approved_by: None,
            processed_at: None,
            processed_by: None,
            transfer_id: None,
            failure_reason: None,
            requested_at: now,
        };
        assert!(!request.settleable_at(now));

        request.status = PayoutStatus::Approved;
        assert!(request.settleable_at(now));

        request.status = PayoutStatus::Pending;
        assert!(request.settleable_at(now + Duration::days(8)));
    }

    #[test]
    fn ended_lifecycles_release_unconditionally() {
        assert!(!SourceLifecycle::Active.has_ended());
        assert!(SourceLifecycle::Completed.has_ended());
        assert!(SourceLifecycle::Cancelled.has_ended());
    }
}

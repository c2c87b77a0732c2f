//! Fraud flags and penalty records
//!
//! A flag is raised against a creator, reviewed, and resolved exactly once:
//! `flagged -> confirmed` applies the penalty irreversibly, `flagged ->
//! dismissed` has no effect. Both outcomes are terminal. Confirmed incidents
//! leave an append-only history row for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Creators are permanently banned at this many confirmed incidents.
pub const PERMANENT_BAN_THRESHOLD: i64 = 3;

/// What raised the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudType {
    /// Engagement rate implausibly low for the claimed view count
    Engagement,

    /// View velocity far above the account's history
    Velocity,

    /// Young account requesting an outsized payout
    NewCreator,

    /// Creator has prior confirmed incidents
    PreviousFraud,

    /// Suspicious view pattern confirmed by review
    ViewPattern,

    /// Bot activity detected
    BotActivity,

    /// Device fingerprint shared with other flagged accounts
    DuplicateDevice,

    /// Raised by an operator directly
    Manual,
}

impl FraudType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudType::Engagement => "engagement",
            FraudType::Velocity => "velocity",
            FraudType::NewCreator => "new_creator",
            FraudType::PreviousFraud => "previous_fraud",
            FraudType::ViewPattern => "view_pattern",
            FraudType::BotActivity => "bot_activity",
            FraudType::DuplicateDevice => "duplicate_device",
            FraudType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<FraudType> {
        match s {
            "engagement" => Some(FraudType::Engagement),
            "velocity" => Some(FraudType::Velocity),
            "new_creator" => Some(FraudType::NewCreator),
            "previous_fraud" => Some(FraudType::PreviousFraud),
            "view_pattern" => Some(FraudType::ViewPattern),
            "bot_activity" => Some(FraudType::BotActivity),
            "duplicate_device" => Some(FraudType::DuplicateDevice),
            "manual" => Some(FraudType::Manual),
            _ => None,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FraudType::Engagement => "Engagement rate below plausible floor",
            FraudType::Velocity => "View velocity far above account history",
            FraudType::NewCreator => "New account requesting large payout",
            FraudType::PreviousFraud => "Prior confirmed fraud on record",
            FraudType::ViewPattern => "Suspicious view pattern confirmed",
            FraudType::BotActivity => "Bot activity detected",
            FraudType::DuplicateDevice => "Device shared with flagged accounts",
            FraudType::Manual => "Raised by operator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Flagged,
    Confirmed,
    Dismissed,
}

impl FlagStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagStatus::Flagged => "flagged",
            FlagStatus::Confirmed => "confirmed",
            FlagStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<FlagStatus> {
        match s {
            "flagged" => Some(FlagStatus::Flagged),
            "confirmed" => Some(FlagStatus::Confirmed),
            "dismissed" => Some(FlagStatus::Dismissed),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, FlagStatus::Confirmed | FlagStatus::Dismissed)
    }
}

/// A suspected fraud incident against one creator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudFlag {
    pub id: Uuid,
    pub creator_id: String,
    pub status: FlagStatus,
    pub fraud_type: FraudType,
    /// Value of the earnings under suspicion, in cents.
    pub fraud_amount_cents: i64,
    /// Penalty applied on confirmation. None while still flagged.
    pub trust_penalty: Option<i64>,
    /// Entry clawed back alongside confirmation, when one was.
    pub clawback_ledger_id: Option<Uuid>,
    pub reason: Option<String>,
    /// Creator has until this time to supply counter-evidence.
    pub evidence_deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl FraudFlag {
    pub fn new(
        creator_id: &str,
        fraud_type: FraudType,
        fraud_amount_cents: i64,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator_id: creator_id.to_string(),
            status: FlagStatus::Flagged,
            fraud_type,
            fraud_amount_cents,
            trust_penalty: None,
            clawback_ledger_id: None,
            reason,
            evidence_deadline: None,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn with_evidence_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.evidence_deadline = Some(deadline);
        self
    }
}

/// Trust penalty for a confirmed incident: 10 points plus one point per
/// whole hundred dollars of fraud value, floored. Exact integer arithmetic;
/// 10_000 cents per point.
pub fn trust_penalty_for(fraud_amount_cents: i64) -> i64 {
    10 + fraud_amount_cents.max(0) / 10_000
}

/// Outcome of confirming a flag.
#[derive(Debug, Clone, Serialize)]
pub struct PenaltyResult {
    pub flag_id: Uuid,
    pub creator_id: String,
    pub trust_penalty: i64,
    pub fraud_count: i64,
    pub banned: bool,
    pub score_before: f64,
    pub score_after: f64,
}

/// Append-only audit row written for every confirmed incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudHistoryRecord {
    pub creator_id: String,
    pub flag_id: Uuid,
    pub fraud_type: FraudType,
    pub fraud_amount_cents: i64,
    pub trust_penalty: i64,
    pub score_before: f64,
    pub score_after: f64,
    pub fraud_count_before: i64,
    pub fraud_count_after: i64,
    pub banned: bool,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_penalty_formula() {
        // $200 fraud: 10 + 2
        assert_eq!(trust_penalty_for(20_000), 12);
        // below $100 adds nothing
        assert_eq!(trust_penalty_for(0), 10);
        assert_eq!(trust_penalty_for(9_999), 10);
        // fractional hundreds floor
        assert_eq!(trust_penalty_for(19_999), 11);
        // garbage negative amounts do not reduce the base penalty
        assert_eq!(trust_penalty_for(-5_000), 10);
    }

    #[test]
    fn test_flag_starts_open() {
        let flag = FraudFlag::new("creator_1", FraudType::Velocity, 5_000, None);
        assert_eq!(flag.status, FlagStatus::Flagged);
        assert!(!flag.status.is_resolved());
        assert!(flag.trust_penalty.is_none());
        assert!(flag.resolved_at.is_none());
    }

    #[test]
    fn test_resolved_statuses_terminal() {
        assert!(FlagStatus::Confirmed.is_resolved());
        assert!(FlagStatus::Dismissed.is_resolved());
        assert!(!FlagStatus::Flagged.is_resolved());
    }
}

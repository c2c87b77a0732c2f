//! Payout risk screening
//!
//! Runs when a payout request is opened, before clearing starts. Produces
//! an auto-approval verdict and writes fraud flags for anything an operator
//! should look at. Screening never mutates money state; the clearing window
//! is the backstop either way.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::fraud::flag::{FraudFlag, FraudType};
use crate::ledger::store::LedgerStore;

/// Accounts younger than this requesting more than the amount below are
/// flagged for review.
pub const NEW_CREATOR_DAYS: i64 = 30;
pub const NEW_CREATOR_AMOUNT_CENTS: i64 = 10_000;

/// Creators get this long to supply counter-evidence for a screening flag.
pub const EVIDENCE_DEADLINE_HOURS: i64 = 48;

/// Payout size bands with per-band approval minimums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountTier {
    Micro,
    Small,
    Medium,
    Large,
}

impl AmountTier {
    pub fn for_amount(cents: i64) -> AmountTier {
        if cents <= 5_000 {
            AmountTier::Micro
        } else if cents <= 20_000 {
            AmountTier::Small
        } else if cents <= 100_000 {
            AmountTier::Medium
        } else {
            AmountTier::Large
        }
    }

    pub fn min_trust_score(&self) -> f64 {
        match self {
            AmountTier::Micro => 60.0,
            AmountTier::Small => 70.0,
            AmountTier::Medium => 80.0,
            AmountTier::Large => 90.0,
        }
    }

    pub fn min_account_age_days(&self) -> i64 {
        match self {
            AmountTier::Micro => 0,
            AmountTier::Small => 14,
            AmountTier::Medium => 30,
            AmountTier::Large => 60,
        }
    }

    pub fn min_completed_payouts(&self) -> i64 {
        match self {
            AmountTier::Micro | AmountTier::Small => 0,
            AmountTier::Medium => 3,
            AmountTier::Large => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AmountTier::Micro => "micro",
            AmountTier::Small => "small",
            AmountTier::Medium => "medium",
            AmountTier::Large => "large",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenVerdict {
    AutoApproved,
    ManualReview,
    Rejected,
}

impl ScreenVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenVerdict::AutoApproved => "auto_approved",
            ScreenVerdict::ManualReview => "manual_review",
            ScreenVerdict::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreenOutcome {
    pub verdict: ScreenVerdict,
    pub tier: AmountTier,
    /// Operator-readable reasons the request did not auto-approve.
    pub reasons: Vec<String>,
    /// Flags written for review, if any.
    pub flags: Vec<FraudFlag>,
}

pub struct PayoutScreen {
    store: Arc<dyn LedgerStore>,
}

impl PayoutScreen {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Screens one payout request.
    pub async fn review(&self, user_id: &str, amount_cents: i64) -> LedgerResult<ScreenOutcome> {
        if amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(amount_cents));
        }

        let profile = self
            .store
            .profile(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("creator {}", user_id)))?;

        let tier = AmountTier::for_amount(amount_cents);

        if profile.is_banned() {
            info!(user_id = %user_id, "Payout screening rejected banned creator");
            return Ok(ScreenOutcome {
                verdict: ScreenVerdict::Rejected,
                tier,
                reasons: vec!["creator is banned".to_string()],
                flags: Vec::new(),
            });
        }

        let now = Utc::now();
        let age_days = profile.account_age_days(now);
        let completed = self.store.completed_payout_count(user_id).await?;

        let mut reasons = Vec::new();
        let mut flags = Vec::new();

        if profile.trust_score < tier.min_trust_score() {
            reasons.push(format!(
                "trust score {:.1} below the {:.0} required for this amount",
                profile.trust_score,
                tier.min_trust_score()
            ));
        }
        if age_days < tier.min_account_age_days() {
            reasons.push(format!(
                "account {} days old, {} required for this amount",
                age_days,
                tier.min_account_age_days()
            ));
        }
        if completed < tier.min_completed_payouts() {
            reasons.push(format!(
                "{} completed payouts, {} required for this amount",
                completed,
                tier.min_completed_payouts()
            ));
        }

        if age_days < NEW_CREATOR_DAYS && amount_cents > NEW_CREATOR_AMOUNT_CENTS {
            flags.push(FraudFlag::new(
                user_id,
                FraudType::NewCreator,
                amount_cents,
                Some(format!("{} day old account requesting large payout", age_days)),
            ));
        }
        if profile.fraud_flag_count > 0 {
            flags.push(FraudFlag::new(
                user_id,
                FraudType::PreviousFraud,
                amount_cents,
                Some(format!(
                    "{} prior confirmed incidents",
                    profile.fraud_flag_count
                )),
            ));
        }

        let deadline = now + Duration::hours(EVIDENCE_DEADLINE_HOURS);
        let mut written = Vec::with_capacity(flags.len());
        for flag in flags {
            let flag = flag.with_evidence_deadline(deadline);
            self.store.insert_fraud_flag(&flag).await?;
            written.push(flag);
        }

        let verdict = if reasons.is_empty() && written.is_empty() {
            ScreenVerdict::AutoApproved
        } else {
            ScreenVerdict::ManualReview
        };
        info!(
            user_id = %user_id,
            amount_cents = amount_cents,
            tier = ?tier,
            verdict = ?verdict,
            flags = written.len(),
            "Payout screening complete"
        );

        Ok(ScreenOutcome {
            verdict,
            tier,
            reasons,
            flags: written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(AmountTier::for_amount(1), AmountTier::Micro);
        assert_eq!(AmountTier::for_amount(5_000), AmountTier::Micro);
        assert_eq!(AmountTier::for_amount(5_001), AmountTier::Small);
        assert_eq!(AmountTier::for_amount(20_000), AmountTier::Small);
        assert_eq!(AmountTier::for_amount(100_000), AmountTier::Medium);
        assert_eq!(AmountTier::for_amount(100_001), AmountTier::Large);
    }

    #[test]
    fn test_tier_minimums_tighten_with_size() {
        assert!(AmountTier::Micro.min_trust_score() < AmountTier::Large.min_trust_score());
        assert_eq!(AmountTier::Micro.min_completed_payouts(), 0);
        assert_eq!(AmountTier::Large.min_completed_payouts(), 5);
        assert_eq!(AmountTier::Medium.min_account_age_days(), 30);
    }
}

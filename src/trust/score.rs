//! Trust score derivation
//!
//! The score is a pure function of account age, submission history, and
//! fraud history. Recomputing with unchanged inputs yields the identical
//! score; callers only persist history when the score actually moved.

use serde::{Deserialize, Serialize};

use crate::ledger::entry::CreatorProfile;
use chrono::{DateTime, Utc};

/// History rows are only appended when the score moves by more than this.
pub const SCORE_CHANGE_EPSILON: f64 = 0.01;

/// Inputs to the score formula. Counts and days, never money.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustInputs {
    pub account_age_days: i64,
    pub approved_count: i64,
    pub rejected_count: i64,
    pub fraud_flag_count: i64,
    pub fraud_flag_permanent: bool,
}

impl TrustInputs {
    pub fn from_profile(profile: &CreatorProfile, now: DateTime<Utc>) -> Self {
        Self {
            account_age_days: profile.account_age_days(now),
            approved_count: profile.approved_count,
            rejected_count: profile.rejected_count,
            fraud_flag_count: profile.fraud_flag_count,
            fraud_flag_permanent: profile.fraud_flag_permanent,
        }
    }

    pub fn total_submissions(&self) -> i64 {
        self.approved_count + self.rejected_count
    }
}

/// Computes the 0..100 trust score.
///
/// base 50, age bonus up to 20 (2 points per 30 days), approval ratio worth
/// up to 20, rejection ratio costing up to 15, 10 per fraud incident, 30 for
/// a permanent flag. Clamped into [0, 100].
pub fn compute_trust_score(inputs: &TrustInputs) -> f64 {
    let base = 50.0;
    let age_bonus = (inputs.account_age_days as f64 / 30.0 * 2.0).min(20.0);

    let total = inputs.total_submissions();
    let (approval_bonus, reject_penalty) = if total > 0 {
        (
            inputs.approved_count as f64 / total as f64 * 20.0,
            inputs.rejected_count as f64 / total as f64 * 15.0,
        )
    } else {
        (0.0, 0.0)
    };

    let fraud_penalty = inputs.fraud_flag_count as f64 * 10.0;
    let permanent_penalty = if inputs.fraud_flag_permanent { 30.0 } else { 0.0 };

    (base + age_bonus + approval_bonus - reject_penalty - fraud_penalty - permanent_penalty)
        .clamp(0.0, 100.0)
}

/// Whether a recomputation is a real change worth a history row.
pub fn score_changed(previous: f64, current: f64) -> bool {
    (previous - current).abs() > SCORE_CHANGE_EPSILON
}

/// Qualitative bands over the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Excellent,
    Good,
    Neutral,
    Risky,
    Blocked,
}

impl TrustLevel {
    pub fn from_score(score: f64) -> TrustLevel {
        if score >= 90.0 {
            TrustLevel::Excellent
        } else if score >= 70.0 {
            TrustLevel::Good
        } else if score >= 50.0 {
            TrustLevel::Neutral
        } else if score >= 30.0 {
            TrustLevel::Risky
        } else {
            TrustLevel::Blocked
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Excellent => "excellent",
            TrustLevel::Good => "good",
            TrustLevel::Neutral => "neutral",
            TrustLevel::Risky => "risky",
            TrustLevel::Blocked => "blocked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> TrustInputs {
        TrustInputs {
            account_age_days: 0,
            approved_count: 0,
            rejected_count: 0,
            fraud_flag_count: 0,
            fraud_flag_permanent: false,
        }
    }

    #[test]
    fn test_fresh_account_scores_base() {
        assert_eq!(compute_trust_score(&inputs()), 50.0);
    }

    #[test]
    fn test_age_bonus_caps_at_twenty() {
        let mut i = inputs();
        i.account_age_days = 90;
        assert_eq!(compute_trust_score(&i), 56.0);

        i.account_age_days = 3_000;
        assert_eq!(compute_trust_score(&i), 70.0);
    }

    #[test]
    fn test_approval_ratio_bonus() {
        let mut i = inputs();
        i.approved_count = 10;
        // all approvals, no rejections: full 20-point bonus
        assert_eq!(compute_trust_score(&i), 70.0);

        i.rejected_count = 10;
        // 50/50 split: +10 approval, -7.5 rejection
        assert_eq!(compute_trust_score(&i), 52.5);
    }

    #[test]
    fn test_fraud_penalties_floor_at_zero() {
        let mut i = inputs();
        i.fraud_flag_count = 3;
        i.fraud_flag_permanent = true;
        // 50 - 30 - 30 clamps to 0
        assert_eq!(compute_trust_score(&i), 0.0);
    }

    #[test]
    fn test_score_is_pure() {
        let mut i = inputs();
        i.account_age_days = 45;
        i.approved_count = 7;
        i.rejected_count = 2;
        i.fraud_flag_count = 1;
        let first = compute_trust_score(&i);
        let second = compute_trust_score(&i);
        assert_eq!(first, second);
    }

    #[test]
    fn test_epsilon_suppresses_noise() {
        assert!(!score_changed(50.0, 50.0));
        assert!(!score_changed(50.0, 50.005));
        assert!(score_changed(50.0, 50.02));
        assert!(score_changed(62.0, 50.0));
    }

    #[test]
    fn test_level_bands() {
        assert_eq!(TrustLevel::from_score(95.0), TrustLevel::Excellent);
        assert_eq!(TrustLevel::from_score(90.0), TrustLevel::Excellent);
        assert_eq!(TrustLevel::from_score(70.0), TrustLevel::Good);
        assert_eq!(TrustLevel::from_score(55.0), TrustLevel::Neutral);
        assert_eq!(TrustLevel::from_score(30.0), TrustLevel::Risky);
        assert_eq!(TrustLevel::from_score(10.0), TrustLevel::Blocked);
    }
}

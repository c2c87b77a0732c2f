//! Creator Trust Scoring
//!
//! Derives a 0-100 trust score from a creator's submission record, account
//! age, and fraud history. The score is pure arithmetic over the profile;
//! recomputing it never touches anything but the stored score and its
//! change history.

mod calculator;
mod score;

pub use calculator::{BulkRecalcSummary, ScoreUpdate, TrustScoreCalculator};
pub use score::{
    compute_trust_score, score_changed, TrustInputs, TrustLevel, SCORE_CHANGE_EPSILON,
};

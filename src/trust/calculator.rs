//! Trust score recalculation
//!
//! Targeted (per creator) and bulk (scheduled) recomputation over the
//! profile projection. Persists the derived score and one history row only
//! when the score actually moved.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::store::LedgerStore;
use crate::trust::score::{compute_trust_score, score_changed, TrustInputs, TrustLevel};

#[derive(Debug, Clone, Serialize)]
pub struct ScoreUpdate {
    pub user_id: String,
    pub previous: f64,
    pub current: f64,
    pub level: TrustLevel,
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BulkRecalcSummary {
    pub scanned: usize,
    pub changed: usize,
    pub failed: usize,
}

pub struct TrustScoreCalculator {
    store: Arc<dyn LedgerStore>,
}

impl TrustScoreCalculator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Recomputes one creator's score from their current profile.
    pub async fn recalculate_user(&self, user_id: &str) -> LedgerResult<ScoreUpdate> {
        let profile = self
            .store
            .profile(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("creator {}", user_id)))?;

        let now = Utc::now();
        let inputs = TrustInputs::from_profile(&profile, now);
        let current = compute_trust_score(&inputs);
        let previous = profile.trust_score;
        let changed = score_changed(previous, current);

        if changed {
            self.store.store_trust_score(user_id, current).await?;
            self.store
                .append_score_history(user_id, previous, current, now)
                .await?;
            debug!(
                user_id = %user_id,
                previous = previous,
                current = current,
                "Trust score updated"
            );
        }

        Ok(ScoreUpdate {
            user_id: user_id.to_string(),
            previous,
            current,
            level: TrustLevel::from_score(current),
            changed,
        })
    }

    /// Scheduled recalculation across every creator. Per-user failures are
    /// logged and counted; the sweep continues.
    pub async fn recalculate_all(&self) -> LedgerResult<BulkRecalcSummary> {
        let ids = self.store.all_creator_ids().await?;
        let mut summary = BulkRecalcSummary::default();

        for user_id in ids {
            summary.scanned += 1;
            match self.recalculate_user(&user_id).await {
                Ok(update) if update.changed => summary.changed += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(user_id = %user_id, error = %e, "Trust recalculation failed");
                }
            }
        }

        info!(
            scanned = summary.scanned,
            changed = summary.changed,
            failed = summary.failed,
            "Trust score sweep complete"
        );
        Ok(summary)
    }
}

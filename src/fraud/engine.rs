//! Fraud penalty application
//!
//! Confirmation is guarded by a compare-and-set on the flag status: a flag
//! leaves `flagged` exactly once, so the penalty can never be applied
//! twice. The penalty itself (trust deduction, fraud counters, possible
//! permanent ban, device ban, history row) is applied after the guard;
//! the operator alert at the end is best-effort and never rolls it back.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::fraud::flag::{
    trust_penalty_for, FlagStatus, FraudFlag, FraudHistoryRecord, FraudType, PenaltyResult,
    PERMANENT_BAN_THRESHOLD,
};
use crate::ledger::entry::DeviceBan;
use crate::ledger::store::LedgerStore;
use crate::notify::{Notifier, NotifyEvent};
use crate::trust::{compute_trust_score, score_changed, TrustInputs};

/// Confirmed incidents at or above this value page the operators.
pub const ALERT_AMOUNT_CENTS: i64 = 50_000;

pub struct FraudPenaltyEngine {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

impl FraudPenaltyEngine {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Raises a new flag against a creator. Screening and operators both
    /// come through here.
    pub async fn raise_flag(&self, flag: FraudFlag) -> LedgerResult<FraudFlag> {
        if flag.fraud_amount_cents < 0 {
            return Err(LedgerError::InvalidAmount(flag.fraud_amount_cents));
        }
        self.store.insert_fraud_flag(&flag).await?;
        info!(
            flag_id = %flag.id,
            creator_id = %flag.creator_id,
            fraud_type = flag.fraud_type.as_str(),
            amount_cents = flag.fraud_amount_cents,
            "Fraud flag raised"
        );
        Ok(flag)
    }

    /// Confirms a flag and irreversibly applies the penalty.
    ///
    /// The flag transition happens first; every later step runs under a
    /// flag that can never be confirmed again, so a crash mid-way
    /// under-penalizes (operator-repairable) rather than double-penalizing.
    pub async fn confirm_fraud(&self, flag_id: Uuid, admin_id: &str) -> LedgerResult<PenaltyResult> {
        if !self.store.is_admin(admin_id).await? {
            return Err(LedgerError::Unauthorized);
        }

        let flag = self
            .store
            .fraud_flag(flag_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("fraud flag {}", flag_id)))?;
        if flag.status.is_resolved() {
            return Err(LedgerError::AlreadyResolved);
        }

        let profile = self
            .store
            .profile(&flag.creator_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("creator {}", flag.creator_id)))?;

        let now = Utc::now();
        let penalty = trust_penalty_for(flag.fraud_amount_cents);
        let count_before = profile.fraud_flag_count;
        let count_after = count_before + 1;
        let permanent = profile.fraud_flag_permanent || count_after >= PERMANENT_BAN_THRESHOLD;
        let newly_banned = permanent && profile.banned_at.is_none();
        let banned_at = profile.banned_at.or(if permanent { Some(now) } else { None });

        let score_before = compute_trust_score(&TrustInputs::from_profile(&profile, now));
        let mut after = profile.clone();
        after.fraud_flag_count = count_after;
        after.fraud_flag_permanent = permanent;
        let score_after = compute_trust_score(&TrustInputs::from_profile(&after, now));

        // The guard. Losing this race means someone else resolved first.
        let transitioned = self
            .store
            .resolve_fraud_flag(flag_id, FlagStatus::Confirmed, admin_id, penalty)
            .await?;
        if !transitioned {
            return Err(LedgerError::AlreadyResolved);
        }

        self.store
            .apply_fraud_penalty(&flag.creator_id, count_after, permanent, banned_at, now)
            .await?;
        self.store
            .store_trust_score(&flag.creator_id, score_after)
            .await?;
        if score_changed(score_before, score_after) {
            self.store
                .append_score_history(&flag.creator_id, score_before, score_after, now)
                .await?;
        }

        // Clawback the tainted entry when the flag names one. A paid entry
        // is reversed through the wallet instead of edited in place.
        if let Some(entry_id) = flag.clawback_ledger_id {
            let reason = format!("fraud confirmed: {}", flag.fraud_type.as_str());
            match self.store.clawback_entry(entry_id, &reason).await {
                Ok(entry) => {
                    info!(entry_id = %entry.id, "Entry clawed back on fraud confirmation");
                }
                Err(LedgerError::AlreadyPaid) => {
                    let reversed = self.store.reverse_paid_entry(entry_id, &reason).await?;
                    info!(
                        entry_id = %entry_id,
                        reversed_cents = reversed,
                        "Paid entry reversed via wallet adjustment"
                    );
                }
                Err(e) => {
                    error!(entry_id = %entry_id, error = %e, "Clawback failed after penalty applied");
                    let _ = self
                        .notifier
                        .alert_operators(
                            "clawback failed after fraud confirmation",
                            serde_json::json!({
                                "flag_id": flag_id,
                                "entry_id": entry_id,
                            }),
                        )
                        .await;
                    return Err(e);
                }
            }
        }

        if permanent {
            if let Some(fingerprint) = &profile.device_fingerprint {
                self.store
                    .upsert_device_ban(&DeviceBan {
                        fingerprint: fingerprint.clone(),
                        creator_id: flag.creator_id.clone(),
                        reason: format!("banned at {} confirmed incidents", count_after),
                        banned_at: now,
                    })
                    .await?;
                info!(creator_id = %flag.creator_id, "Device fingerprint banned");
            }
        }

        self.store
            .append_fraud_history(&FraudHistoryRecord {
                creator_id: flag.creator_id.clone(),
                flag_id,
                fraud_type: flag.fraud_type,
                fraud_amount_cents: flag.fraud_amount_cents,
                trust_penalty: penalty,
                score_before,
                score_after,
                fraud_count_before: count_before,
                fraud_count_after: count_after,
                banned: permanent,
                recorded_at: now,
            })
            .await?;

        info!(
            flag_id = %flag_id,
            creator_id = %flag.creator_id,
            trust_penalty = penalty,
            fraud_count = count_after,
            banned = permanent,
            "Fraud confirmed"
        );

        // Best-effort alerts; the penalty stands whatever happens here.
        if flag.fraud_amount_cents >= ALERT_AMOUNT_CENTS || newly_banned {
            if let Err(e) = self
                .notifier
                .alert_operators(
                    "fraud confirmed",
                    serde_json::json!({
                        "creator_id": flag.creator_id,
                        "fraud_type": flag.fraud_type.as_str(),
                        "amount_cents": flag.fraud_amount_cents,
                        "banned": permanent,
                    }),
                )
                .await
            {
                warn!(error = %e, "Operator alert failed, penalty already applied");
            }
        }
        if let Err(e) = self
            .notifier
            .notify(
                &flag.creator_id,
                NotifyEvent::FraudConfirmed {
                    trust_penalty: penalty,
                    banned: permanent,
                },
            )
            .await
        {
            warn!(creator_id = %flag.creator_id, error = %e, "Creator notification failed");
        }

        Ok(PenaltyResult {
            flag_id,
            creator_id: flag.creator_id,
            trust_penalty: penalty,
            fraud_count: count_after,
            banned: permanent,
            score_before,
            score_after,
        })
    }

    /// Dismisses a flag with no effect on the creator.
    pub async fn dismiss_flag(&self, flag_id: Uuid, admin_id: &str) -> LedgerResult<()> {
        if !self.store.is_admin(admin_id).await? {
            return Err(LedgerError::Unauthorized);
        }

        let flag = self
            .store
            .fraud_flag(flag_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("fraud flag {}", flag_id)))?;
        if flag.status.is_resolved() {
            return Err(LedgerError::AlreadyResolved);
        }

        let transitioned = self
            .store
            .resolve_fraud_flag(flag_id, FlagStatus::Dismissed, admin_id, 0)
            .await?;
        if !transitioned {
            return Err(LedgerError::AlreadyResolved);
        }

        info!(flag_id = %flag_id, admin_id = %admin_id, "Fraud flag dismissed");
        Ok(())
    }

    /// Convenience for operators raising a manual flag.
    pub async fn raise_manual_flag(
        &self,
        creator_id: &str,
        amount_cents: i64,
        reason: &str,
        admin_id: &str,
    ) -> LedgerResult<FraudFlag> {
        if !self.store.is_admin(admin_id).await? {
            return Err(LedgerError::Unauthorized);
        }
        self.raise_flag(FraudFlag::new(
            creator_id,
            FraudType::Manual,
            amount_cents,
            Some(reason.to_string()),
        ))
        .await
    }
}

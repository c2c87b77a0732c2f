//! Payout settlement
//!
//! Converts locked entries into one external transfer per payout request,
//! exactly once. The rail is called strictly before the database commit of
//! `paid` state, with a key derived from the request id; the commit itself
//! is one transaction covering entries, wallet, request, and source
//! budgets. A rail transfer that settles without a matching ledger commit
//! is a fatal inconsistency that halts automated movement.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{EntryStatus, LedgerEntry, PayoutRequest, PayoutStatus};
use crate::ledger::store::{LedgerStore, Settlement};
use crate::notify::{Notifier, NotifyEvent};
use crate::rail::{PaymentRail, TransferRequest};
use crate::settlement::idempotency::settlement_key;

pub const SETTLEMENT_SWEEP_JOB: &str = "settlement_sweep";

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepSummary {
    pub scanned: usize,
    pub settled: usize,
    pub skipped_conflicts: usize,
    pub failed: usize,
    pub total_cents: i64,
    pub skipped_lock_held: bool,
}

pub struct SettlementEngine {
    store: Arc<dyn LedgerStore>,
    rail: Arc<dyn PaymentRail>,
    notifier: Arc<dyn Notifier>,
    clearing_period: Duration,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
        clearing_period: Duration,
    ) -> Self {
        Self {
            store,
            rail,
            notifier,
            clearing_period,
        }
    }

    /// Opens a pending request over the user's locked, unassigned entries.
    /// The clearing window starts now.
    pub async fn open_request(&self, user_id: &str) -> LedgerResult<PayoutRequest> {
        let clearing_ends_at = Utc::now() + self.clearing_period;
        let request = self
            .store
            .open_payout_request(user_id, clearing_ends_at)
            .await?;
        info!(
            user_id = %user_id,
            request_id = %request.id,
            amount_cents = request.amount_cents,
            clearing_ends_at = %request.clearing_ends_at,
            "Payout request opened"
        );
        Ok(request)
    }

    /// Manual clearing override. Only operators may approve.
    pub async fn approve(&self, request_id: Uuid, admin_id: &str) -> LedgerResult<()> {
        if !self.store.is_admin(admin_id).await? {
            return Err(LedgerError::Unauthorized);
        }
        self.store.approve_payout(request_id, admin_id).await?;
        info!(request_id = %request_id, admin_id = %admin_id, "Payout approved for early settlement");
        Ok(())
    }

    /// Settles one payout request. Returns the total cents paid.
    ///
    /// Re-invoking after success is a no-op returning the settled amount;
    /// re-invoking after a rail failure retries with the same idempotency
    /// key, so the provider never sees two live transfers for one request.
    pub async fn complete_payout(&self, request_id: Uuid, operator: &str) -> LedgerResult<i64> {
        let now = Utc::now();
        let request = self
            .store
            .payout_request(request_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("payout request {}", request_id)))?;

        match request.status {
            PayoutStatus::Completed => {
                info!(request_id = %request_id, "Request already completed, nothing to do");
                return Ok(request.amount_cents);
            }
            PayoutStatus::Processing => return Err(LedgerError::AlreadyProcessing),
            PayoutStatus::Pending | PayoutStatus::Approved | PayoutStatus::Failed => {}
        }

        if !request.settleable_at(now) {
            return Err(LedgerError::ClearingNotElapsed);
        }

        let locked = self.locked_entries(request_id).await?;
        if locked.is_empty() {
            return Err(LedgerError::NothingToSettle);
        }

        // Take the processing guard. From here the request runs to
        // completed or failed; a concurrent settle loses the CAS.
        let request = self.store.begin_processing(request_id).await?;

        // Re-read under the guard; the pre-guard set may have raced.
        let locked = self.locked_entries(request_id).await?;
        if locked.is_empty() {
            self.store
                .fail_payout(request_id, "no locked entries at settlement time")
                .await?;
            return Err(LedgerError::NothingToSettle);
        }

        let total_to_pay: i64 = locked.iter().map(|e| e.remaining_cents()).sum();
        if total_to_pay <= 0 {
            self.store
                .fail_payout(request_id, "nothing left to pay")
                .await?;
            return Err(LedgerError::NothingToSettle);
        }

        // Rail call outside any transaction, before committing paid state.
        let key = settlement_key(request_id);
        let transfer = TransferRequest {
            recipient: request.user_id.clone(),
            amount_cents: total_to_pay,
            idempotency_key: key.clone(),
            metadata: serde_json::json!({
                "payout_request_id": request_id,
                "entry_count": locked.len(),
            }),
        };
        let receipt = match self.rail.create_transfer(&transfer).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Transfer rail call failed");
                if let Err(mark) = self
                    .store
                    .fail_payout(request_id, e.public_reason())
                    .await
                {
                    warn!(request_id = %request_id, error = %mark, "Could not mark request failed");
                }
                let _ = self
                    .notifier
                    .notify(
                        &request.user_id,
                        NotifyEvent::PayoutFailed {
                            reason: e.public_reason().to_string(),
                        },
                    )
                    .await;
                return Err(e);
            }
        };
        debug!(
            request_id = %request_id,
            transfer_id = %receipt.transfer_id,
            status = ?receipt.status,
            "Rail transfer settled"
        );

        // Everything below commits in one transaction inside the store.
        let settlement = build_settlement(&request, &locked, total_to_pay, &receipt.transfer_id, operator);
        if let Err(e) = self.store.settle_payout(&settlement).await {
            let detail = format!(
                "transfer {} settled on rail but ledger commit failed: {}",
                receipt.transfer_id, e
            );
            error!(request_id = %request_id, "{}", detail);
            let _ = self
                .notifier
                .alert_operators(
                    "settlement commit failure, manual reconciliation required",
                    serde_json::json!({
                        "payout_request_id": request_id,
                        "transfer_id": receipt.transfer_id,
                        "amount_cents": total_to_pay,
                    }),
                )
                .await;
            return Err(LedgerError::Inconsistency(detail));
        }

        info!(
            request_id = %request_id,
            user_id = %request.user_id,
            total_cents = total_to_pay,
            transfer_id = %receipt.transfer_id,
            "Payout completed"
        );

        // Strictly after the commit; failure here is logged only.
        if let Err(e) = self
            .notifier
            .notify(
                &request.user_id,
                NotifyEvent::PayoutCompleted {
                    amount_cents: total_to_pay,
                    transfer_id: receipt.transfer_id.clone(),
                },
            )
            .await
        {
            warn!(user_id = %request.user_id, error = %e, "Payout notification failed, not rolling back");
        }

        Ok(total_to_pay)
    }

    /// Periodic settlement sweep over every request whose clearing has
    /// elapsed. State conflicts are skipped; a fatal inconsistency aborts
    /// the whole run.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> LedgerResult<SweepSummary> {
        if !self.store.try_acquire_job_lock(SETTLEMENT_SWEEP_JOB).await? {
            info!("Settlement sweep skipped, another run holds the lock");
            return Ok(SweepSummary {
                skipped_lock_held: true,
                ..Default::default()
            });
        }

        let result = self.sweep_locked(now).await;

        if let Err(e) = self.store.release_job_lock(SETTLEMENT_SWEEP_JOB).await {
            warn!(error = %e, "Failed to release sweep job lock");
        }
        result
    }

    async fn sweep_locked(&self, now: DateTime<Utc>) -> LedgerResult<SweepSummary> {
        let due = self.store.requests_ready_to_settle(now).await?;
        let mut summary = SweepSummary {
            scanned: due.len(),
            ..Default::default()
        };

        for request in due {
            match self.complete_payout(request.id, "settlement_sweep").await {
                Ok(total) => {
                    summary.settled += 1;
                    summary.total_cents += total;
                }
                Err(e) if e.is_fatal() => {
                    error!(request_id = %request.id, error = %e, "Sweep aborted on fatal inconsistency");
                    return Err(e);
                }
                Err(e) if e.is_state_conflict() => {
                    debug!(request_id = %request.id, error = %e, "Sweep skipping request");
                    summary.skipped_conflicts += 1;
                }
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Sweep settlement failed, continuing");
                    summary.failed += 1;
                }
            }
        }

        info!(
            scanned = summary.scanned,
            settled = summary.settled,
            skipped = summary.skipped_conflicts,
            failed = summary.failed,
            total_cents = summary.total_cents,
            "Settlement sweep complete"
        );
        Ok(summary)
    }

    async fn locked_entries(&self, request_id: Uuid) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.store.entries_for_request(request_id).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.status == EntryStatus::Locked)
            .collect())
    }
}

fn build_settlement(
    request: &PayoutRequest,
    locked: &[LedgerEntry],
    total_cents: i64,
    transfer_id: &str,
    operator: &str,
) -> Settlement {
    let entry_payments: Vec<(Uuid, i64)> = locked
        .iter()
        .map(|e| (e.id, e.remaining_cents()))
        .collect();

    let mut budgets: HashMap<String, i64> = HashMap::new();
    for entry in locked {
        *budgets.entry(entry.source_id.clone()).or_insert(0) += entry.remaining_cents();
    }

    Settlement {
        request_id: request.id,
        user_id: request.user_id.clone(),
        entry_payments,
        total_cents,
        transfer_id: transfer_id.to_string(),
        processed_by: operator.to_string(),
        budget_charges: budgets.into_iter().collect(),
    }
}

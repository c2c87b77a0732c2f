//! LedgerStore implementation for the Postgres pool
//!
//! Single-table operations delegate to the repositories. Operations that
//! must move several tables together (`open_payout_request`,
//! `settle_payout`, `reverse_paid_entry`) run in one transaction here; an
//! early return drops the transaction and rolls everything back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::database::payouts::request_from_row;
use crate::database::DatabasePool;
use crate::error::{LedgerError, LedgerResult};
use crate::fraud::{FlagStatus, FraudFlag, FraudHistoryRecord};
use crate::ledger::entry::{
    BrandPayoutSettings, CreatorProfile, DeviceBan, LedgerEntry, PayoutRequest, PayoutSource,
    Wallet,
};
use crate::ledger::store::{LedgerStore, NewEntry, Settlement};

#[async_trait]
impl LedgerStore for DatabasePool {
    async fn create_entry(&self, new: NewEntry) -> LedgerResult<LedgerEntry> {
        self.entries().insert(&new).await
    }

    async fn entry(&self, id: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        self.entries().get(id).await
    }

    async fn entries_for_user(&self, user_id: &str) -> LedgerResult<Vec<LedgerEntry>> {
        self.entries().for_user(user_id).await
    }

    async fn accrue(
        &self,
        entry_id: Uuid,
        delta_cents: i64,
        views_snapshot: i64,
        milestone_hit: bool,
    ) -> LedgerResult<()> {
        self.entries()
            .accrue(entry_id, delta_cents, views_snapshot, milestone_hit)
            .await
    }

    async fn held_entries_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<LedgerEntry>> {
        self.entries().held_due(now).await
    }

    async fn held_entries_for_ended_sources(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.entries().held_for_ended_sources().await
    }

    async fn lock_entries(&self, ids: &[Uuid]) -> LedgerResult<usize> {
        self.entries().lock_entries(ids).await
    }

    async fn mark_paid(&self, id: Uuid, paid_cents: i64, request_id: Uuid) -> LedgerResult<()> {
        self.entries().mark_paid(id, paid_cents, request_id).await
    }

    async fn clawback_entry(&self, id: Uuid, reason: &str) -> LedgerResult<LedgerEntry> {
        self.entries().clawback(id, reason).await
    }

    async fn reverse_paid_entry(&self, id: Uuid, reason: &str) -> LedgerResult<i64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to begin reversal: {}", e)))?;

        let row = sqlx::query(
            r#"
            UPDATE ledger.entries
            SET status = 'clawed_back', clawback_reason = $2,
                clawed_back_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'paid'
            RETURNING user_id, source_id, paid_cents
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to reverse entry: {}", e)))?;

        let row = match row {
            Some(row) => row,
            None => {
                return match self.entries().get(id).await? {
                    Some(_) => Err(LedgerError::NotFound(format!("paid entry {}", id))),
                    None => Err(LedgerError::NotFound(format!("entry {}", id))),
                };
            }
        };
        let user_id: String = row.get("user_id");
        let source_id: String = row.get("source_id");
        let reversed: i64 = row.get("paid_cents");

        sqlx::query(
            r#"
            INSERT INTO ledger.wallets (user_id, balance_cents, total_earned_cents, updated_at)
            VALUES ($1, -$2, 0, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                balance_cents = ledger.wallets.balance_cents - $2,
                total_earned_cents = GREATEST(ledger.wallets.total_earned_cents - $2, 0),
                updated_at = NOW()
            "#,
        )
        .bind(&user_id)
        .bind(reversed)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to debit wallet: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO ledger.wallet_adjustments (user_id, delta_cents, reason, recorded_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(&user_id)
        .bind(-reversed)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to record reversal: {}", e)))?;

        sqlx::query(
            "UPDATE payouts.sources SET budget_used_cents = GREATEST(budget_used_cents - $2, 0) WHERE id = $1",
        )
        .bind(&source_id)
        .bind(reversed)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to release budget: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to commit reversal: {}", e)))?;
        Ok(reversed)
    }

    async fn entries_for_request(&self, request_id: Uuid) -> LedgerResult<Vec<LedgerEntry>> {
        self.entries().for_request(request_id).await
    }

    async fn source(&self, source_id: &str) -> LedgerResult<Option<PayoutSource>> {
        self.payouts().get_source(source_id).await
    }

    async fn upsert_source(&self, source: &PayoutSource) -> LedgerResult<()> {
        self.payouts().upsert_source(source).await
    }

    async fn brand_settings(&self, brand_id: &str) -> LedgerResult<Option<BrandPayoutSettings>> {
        self.payouts().get_brand_settings(brand_id).await
    }

    async fn upsert_brand_settings(&self, settings: &BrandPayoutSettings) -> LedgerResult<()> {
        self.payouts().upsert_brand_settings(settings).await
    }

    async fn open_payout_request(
        &self,
        user_id: &str,
        clearing_ends_at: DateTime<Utc>,
    ) -> LedgerResult<PayoutRequest> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to begin request: {}", e)))?;

        let rows = sqlx::query(
            r#"
            SELECT id, accrued_cents - paid_cents AS remaining
            FROM ledger.entries
            WHERE user_id = $1 AND status = 'locked' AND payout_request_id IS NULL
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to gather locked entries: {}", e)))?;

        if rows.is_empty() {
            return Err(LedgerError::NothingToSettle);
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        let total: i64 = rows.iter().map(|r| r.get::<i64, _>("remaining")).sum();

        let row = sqlx::query(
            r#"
            INSERT INTO payouts.requests
            (id, user_id, amount_cents, status, clearing_ends_at, requested_at)
            VALUES ($1, $2, $3, 'pending', $4, NOW())
            RETURNING id, user_id, amount_cents, status, clearing_ends_at, approved_by,
                      processed_at, processed_by, transfer_id, failure_reason, requested_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(total)
        .bind(clearing_ends_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to insert payout request: {}", e)))?;
        let request = request_from_row(&row)?;

        sqlx::query(
            "UPDATE ledger.entries SET payout_request_id = $1, updated_at = NOW() WHERE id = ANY($2)",
        )
        .bind(request.id)
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to assign entries: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to commit request: {}", e)))?;
        Ok(request)
    }

    async fn payout_request(&self, id: Uuid) -> LedgerResult<Option<PayoutRequest>> {
        self.payouts().get(id).await
    }

    async fn begin_processing(&self, id: Uuid) -> LedgerResult<PayoutRequest> {
        self.payouts().begin_processing(id).await
    }

    async fn settle_payout(&self, settlement: &Settlement) -> LedgerResult<()> {
        let checked_total: i64 = settlement.entry_payments.iter().map(|(_, c)| c).sum();
        if checked_total != settlement.total_cents {
            return Err(LedgerError::Inconsistency(format!(
                "entry payments sum {} != settlement total {}",
                checked_total, settlement.total_cents
            )));
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to begin settlement: {}", e)))?;

        for (entry_id, cents) in &settlement.entry_payments {
            let result = sqlx::query(
                r#"
                UPDATE ledger.entries
                SET paid_cents = paid_cents + $2, status = 'paid',
                    last_paid_at = NOW(), updated_at = NOW()
                WHERE id = $1 AND status = 'locked' AND paid_cents + $2 = accrued_cents
                "#,
            )
            .bind(entry_id)
            .bind(cents)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to pay entry: {}", e)))?;

            if result.rows_affected() != 1 {
                return Err(LedgerError::Inconsistency(format!(
                    "entry {} not locked at settlement",
                    entry_id
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO ledger.wallets (user_id, balance_cents, total_earned_cents, updated_at)
            VALUES ($1, $2, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                balance_cents = ledger.wallets.balance_cents + $2,
                total_earned_cents = ledger.wallets.total_earned_cents + $2,
                updated_at = NOW()
            "#,
        )
        .bind(&settlement.user_id)
        .bind(settlement.total_cents)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to credit wallet: {}", e)))?;

        for (source_id, cents) in &settlement.budget_charges {
            sqlx::query(
                "UPDATE payouts.sources SET budget_used_cents = budget_used_cents + $2 WHERE id = $1",
            )
            .bind(source_id)
            .bind(cents)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to charge budget: {}", e)))?;
        }

        let result = sqlx::query(
            r#"
            UPDATE payouts.requests
            SET status = 'completed', amount_cents = $2, processed_at = NOW(),
                processed_by = $3, transfer_id = $4
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(settlement.request_id)
        .bind(settlement.total_cents)
        .bind(&settlement.processed_by)
        .bind(&settlement.transfer_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to complete request: {}", e)))?;

        if result.rows_affected() != 1 {
            return Err(LedgerError::Inconsistency(format!(
                "settle on request {} not in processing",
                settlement.request_id
            )));
        }

        tx.commit()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to commit settlement: {}", e)))?;
        Ok(())
    }

    async fn fail_payout(&self, id: Uuid, reason: &str) -> LedgerResult<()> {
        self.payouts().fail(id, reason).await
    }

    async fn approve_payout(&self, id: Uuid, approved_by: &str) -> LedgerResult<()> {
        self.payouts().approve(id, approved_by).await
    }

    async fn requests_ready_to_settle(
        &self,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<PayoutRequest>> {
        self.payouts().ready_to_settle(now).await
    }

    async fn completed_payout_count(&self, user_id: &str) -> LedgerResult<i64> {
        self.payouts().completed_count(user_id).await
    }

    async fn wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        self.wallets().get(user_id).await
    }

    async fn adjust_wallet(
        &self,
        user_id: &str,
        delta_cents: i64,
        reason: &str,
    ) -> LedgerResult<()> {
        self.wallets().adjust(user_id, delta_cents, reason).await
    }

    async fn profile(&self, user_id: &str) -> LedgerResult<Option<CreatorProfile>> {
        self.trust().get_profile(user_id).await
    }

    async fn upsert_profile(&self, profile: &CreatorProfile) -> LedgerResult<()> {
        self.trust().upsert_profile(profile).await
    }

    async fn is_admin(&self, user_id: &str) -> LedgerResult<bool> {
        self.trust().is_admin(user_id).await
    }

    async fn insert_fraud_flag(&self, flag: &FraudFlag) -> LedgerResult<()> {
        self.fraud().insert_flag(flag).await
    }

    async fn fraud_flag(&self, id: Uuid) -> LedgerResult<Option<FraudFlag>> {
        self.fraud().get_flag(id).await
    }

    async fn open_flags_for_user(&self, user_id: &str) -> LedgerResult<Vec<FraudFlag>> {
        self.fraud().open_flags(user_id).await
    }

    async fn resolve_fraud_flag(
        &self,
        id: Uuid,
        resolution: FlagStatus,
        resolved_by: &str,
        trust_penalty: i64,
    ) -> LedgerResult<bool> {
        self.fraud()
            .resolve_flag(id, resolution, resolved_by, trust_penalty)
            .await
    }

    async fn apply_fraud_penalty(
        &self,
        user_id: &str,
        fraud_flag_count: i64,
        permanent: bool,
        banned_at: Option<DateTime<Utc>>,
        last_fraud_at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.fraud()
            .apply_penalty(user_id, fraud_flag_count, permanent, banned_at, last_fraud_at)
            .await
    }

    async fn append_fraud_history(&self, record: &FraudHistoryRecord) -> LedgerResult<()> {
        self.fraud().append_history(record).await
    }

    async fn upsert_device_ban(&self, ban: &DeviceBan) -> LedgerResult<()> {
        self.fraud().upsert_device_ban(ban).await
    }

    async fn store_trust_score(&self, user_id: &str, score: f64) -> LedgerResult<()> {
        self.trust().store_score(user_id, score).await
    }

    async fn append_score_history(
        &self,
        user_id: &str,
        previous: f64,
        current: f64,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.trust()
            .append_score_history(user_id, previous, current, at)
            .await
    }

    async fn all_creator_ids(&self) -> LedgerResult<Vec<String>> {
        self.trust().all_creator_ids().await
    }

    // Lock rows instead of session-scoped advisory locks; pooled
    // connections cannot guarantee acquire and release land on the same
    // session. A crashed holder is stolen after ten minutes.
    async fn try_acquire_job_lock(&self, job: &str) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger.job_locks (name, locked_at)
            VALUES ($1, NOW())
            ON CONFLICT (name) DO UPDATE SET locked_at = NOW()
            WHERE ledger.job_locks.locked_at < NOW() - INTERVAL '10 minutes'
            "#,
        )
        .bind(job)
        .execute(self.pool())
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to acquire job lock: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_job_lock(&self, job: &str) -> LedgerResult<()> {
        sqlx::query("DELETE FROM ledger.job_locks WHERE name = $1")
            .bind(job)
            .execute(self.pool())
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to release job lock: {}", e)))?;
        Ok(())
    }
}

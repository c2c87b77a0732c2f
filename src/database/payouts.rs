//! Payout Repository - PostgreSQL operations for payout requests and sources

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{
    BrandPayoutSettings, PayoutRequest, PayoutSource, PayoutStatus, SourceLifecycle, SourceType,
};

const REQUEST_COLUMNS: &str = "id, user_id, amount_cents, status, clearing_ends_at, approved_by, \
     processed_at, processed_by, transfer_id, failure_reason, requested_at";

pub(crate) fn request_from_row(row: &PgRow) -> LedgerResult<PayoutRequest> {
    let status: String = row.get("status");
    Ok(PayoutRequest {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount_cents: row.get("amount_cents"),
        status: PayoutStatus::parse(&status)
            .ok_or_else(|| LedgerError::Inconsistency(format!("unknown payout status {}", status)))?,
        clearing_ends_at: row.get("clearing_ends_at"),
        approved_by: row.get("approved_by"),
        processed_at: row.get("processed_at"),
        processed_by: row.get("processed_by"),
        transfer_id: row.get("transfer_id"),
        failure_reason: row.get("failure_reason"),
        requested_at: row.get("requested_at"),
    })
}

fn source_from_row(row: &PgRow) -> LedgerResult<PayoutSource> {
    let source_type: String = row.get("source_type");
    let lifecycle: String = row.get("lifecycle");
    Ok(PayoutSource {
        id: row.get("id"),
        source_type: SourceType::parse(&source_type)
            .ok_or_else(|| LedgerError::Inconsistency(format!("unknown source type {}", source_type)))?,
        brand_id: row.get("brand_id"),
        lifecycle: SourceLifecycle::parse(&lifecycle)
            .ok_or_else(|| LedgerError::Inconsistency(format!("unknown lifecycle {}", lifecycle)))?,
        min_payout_cents: row.get("min_payout_cents"),
        budget_cents: row.get("budget_cents"),
        budget_used_cents: row.get("budget_used_cents"),
    })
}

pub struct PayoutRepository {
    pool: PgPool,
}

impl PayoutRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> LedgerResult<Option<PayoutRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payouts.requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get payout request: {}", e)))?;

        row.as_ref().map(request_from_row).transpose()
    }

    /// Compare-and-set to `processing`. Exactly one concurrent worker wins.
    pub async fn begin_processing(&self, id: Uuid) -> LedgerResult<PayoutRequest> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payouts.requests
            SET status = 'processing'
            WHERE id = $1 AND status IN ('pending', 'approved', 'failed')
            RETURNING {}
            "#,
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to begin processing: {}", e)))?;

        match row {
            Some(row) => request_from_row(&row),
            None => match self.get(id).await? {
                Some(_) => Err(LedgerError::AlreadyProcessing),
                None => Err(LedgerError::NotFound(format!("payout request {}", id))),
            },
        }
    }

    pub async fn fail(&self, id: Uuid, reason: &str) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payouts.requests
            SET status = 'failed', failure_reason = $2
            WHERE id = $1 AND status <> 'completed'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to mark payout failed: {}", e)))?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(_) => Err(LedgerError::Inconsistency(
                    "attempted to fail a completed payout".to_string(),
                )),
                None => Err(LedgerError::NotFound(format!("payout request {}", id))),
            };
        }
        debug!(request_id = %id, reason = %reason, "Payout request failed");
        Ok(())
    }

    pub async fn approve(&self, id: Uuid, approved_by: &str) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payouts.requests
            SET status = 'approved', approved_by = $2
            WHERE id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(id)
        .bind(approved_by)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to approve payout: {}", e)))?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(request) => match request.status {
                    PayoutStatus::Approved => Ok(()),
                    PayoutStatus::Processing => Err(LedgerError::AlreadyProcessing),
                    _ => Err(LedgerError::AlreadyPaid),
                },
                None => Err(LedgerError::NotFound(format!("payout request {}", id))),
            };
        }
        Ok(())
    }

    pub async fn ready_to_settle(&self, now: DateTime<Utc>) -> LedgerResult<Vec<PayoutRequest>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM payouts.requests
            WHERE (status = 'pending' AND clearing_ends_at <= $1) OR status = 'approved'
            ORDER BY requested_at ASC
            "#,
            REQUEST_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get settleable requests: {}", e)))?;

        rows.iter().map(request_from_row).collect()
    }

    pub async fn completed_count(&self, user_id: &str) -> LedgerResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM payouts.requests WHERE user_id = $1 AND status = 'completed'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to count completed payouts: {}", e)))?;

        Ok(row.get("n"))
    }

    pub async fn get_source(&self, source_id: &str) -> LedgerResult<Option<PayoutSource>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_type, brand_id, lifecycle, min_payout_cents,
                   budget_cents, budget_used_cents
            FROM payouts.sources WHERE id = $1
            "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get payout source: {}", e)))?;

        row.as_ref().map(source_from_row).transpose()
    }

    pub async fn upsert_source(&self, source: &PayoutSource) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payouts.sources
            (id, source_type, brand_id, lifecycle, min_payout_cents, budget_cents, budget_used_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                lifecycle = EXCLUDED.lifecycle,
                min_payout_cents = EXCLUDED.min_payout_cents,
                budget_cents = EXCLUDED.budget_cents,
                budget_used_cents = EXCLUDED.budget_used_cents
            "#,
        )
        .bind(&source.id)
        .bind(source.source_type.as_str())
        .bind(&source.brand_id)
        .bind(source.lifecycle.as_str())
        .bind(source.min_payout_cents)
        .bind(source.budget_cents)
        .bind(source.budget_used_cents)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to upsert payout source: {}", e)))?;
        Ok(())
    }

    pub async fn get_brand_settings(
        &self,
        brand_id: &str,
    ) -> LedgerResult<Option<BrandPayoutSettings>> {
        let row = sqlx::query(
            r#"
            SELECT brand_id, default_min_payout_cents, clearing_period_days
            FROM payouts.brand_settings WHERE brand_id = $1
            "#,
        )
        .bind(brand_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get brand settings: {}", e)))?;

        Ok(row.map(|row| BrandPayoutSettings {
            brand_id: row.get("brand_id"),
            default_min_payout_cents: row.get("default_min_payout_cents"),
            clearing_period_days: row.get("clearing_period_days"),
        }))
    }

    pub async fn upsert_brand_settings(&self, settings: &BrandPayoutSettings) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payouts.brand_settings
            (brand_id, default_min_payout_cents, clearing_period_days)
            VALUES ($1, $2, $3)
            ON CONFLICT (brand_id) DO UPDATE SET
                default_min_payout_cents = EXCLUDED.default_min_payout_cents,
                clearing_period_days = EXCLUDED.clearing_period_days
            "#,
        )
        .bind(&settings.brand_id)
        .bind(settings.default_min_payout_cents)
        .bind(settings.clearing_period_days)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to upsert brand settings: {}", e)))?;
        Ok(())
    }
}

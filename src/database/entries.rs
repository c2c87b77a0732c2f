//! Entry Repository - PostgreSQL operations for ledger entries using sqlx

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{EntryStatus, LedgerEntry, SourceType};
use crate::ledger::store::NewEntry;

const ENTRY_COLUMNS: &str = "id, user_id, source_type, source_id, accrued_cents, paid_cents, \
     status, release_at, cleared_at, last_paid_at, payout_request_id, \
     clawback_reason, clawed_back_at, views_snapshot, milestone_paid, \
     created_at, updated_at";

fn entry_from_row(row: &PgRow) -> LedgerResult<LedgerEntry> {
    let source_type: String = row.get("source_type");
    let status: String = row.get("status");
    Ok(LedgerEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        source_type: SourceType::parse(&source_type)
            .ok_or_else(|| LedgerError::Inconsistency(format!("unknown source type {}", source_type)))?,
        source_id: row.get("source_id"),
        accrued_cents: row.get("accrued_cents"),
        paid_cents: row.get("paid_cents"),
        status: EntryStatus::parse(&status)
            .ok_or_else(|| LedgerError::Inconsistency(format!("unknown entry status {}", status)))?,
        release_at: row.get("release_at"),
        cleared_at: row.get("cleared_at"),
        last_paid_at: row.get("last_paid_at"),
        payout_request_id: row.get("payout_request_id"),
        clawback_reason: row.get("clawback_reason"),
        clawed_back_at: row.get("clawed_back_at"),
        views_snapshot: row.get("views_snapshot"),
        milestone_paid: row.get("milestone_paid"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub struct EntryRepository {
    pool: PgPool,
}

impl EntryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: &NewEntry) -> LedgerResult<LedgerEntry> {
        if new.amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(new.amount_cents));
        }
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO ledger.entries
            (id, user_id, source_type, source_id, accrued_cents, paid_cents,
             status, release_at, views_snapshot, milestone_paid, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, 'held', $6, $7, FALSE, NOW(), NOW())
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.user_id)
        .bind(new.source_type.as_str())
        .bind(&new.source_id)
        .bind(new.amount_cents)
        .bind(new.release_at)
        .bind(new.views_snapshot)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to insert ledger entry: {}", e)))?;

        let entry = entry_from_row(&row)?;
        debug!(entry_id = %entry.id, user_id = %entry.user_id, cents = entry.accrued_cents, "Ledger entry created");
        Ok(entry)
    }

    pub async fn get(&self, id: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger.entries WHERE id = $1",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get ledger entry: {}", e)))?;

        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn for_user(&self, user_id: &str) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger.entries WHERE user_id = $1 ORDER BY created_at ASC",
            ENTRY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to list ledger entries: {}", e)))?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn for_request(&self, request_id: Uuid) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger.entries WHERE payout_request_id = $1",
            ENTRY_COLUMNS
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to list request entries: {}", e)))?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Accrual only lands on entries that have not reached a terminal state.
    pub async fn accrue(
        &self,
        entry_id: Uuid,
        delta_cents: i64,
        views_snapshot: i64,
        milestone_hit: bool,
    ) -> LedgerResult<()> {
        if delta_cents < 0 {
            return Err(LedgerError::InvalidAmount(delta_cents));
        }
        let result = sqlx::query(
            r#"
            UPDATE ledger.entries
            SET accrued_cents = accrued_cents + $2,
                views_snapshot = GREATEST(views_snapshot, $3),
                milestone_paid = milestone_paid OR $4,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('held', 'locked')
            "#,
        )
        .bind(entry_id)
        .bind(delta_cents)
        .bind(views_snapshot)
        .bind(milestone_hit)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to accrue on entry: {}", e)))?;

        if result.rows_affected() == 0 {
            return match self.get(entry_id).await? {
                Some(_) => Err(LedgerError::AlreadyPaid),
                None => Err(LedgerError::NotFound(format!("entry {}", entry_id))),
            };
        }
        Ok(())
    }

    pub async fn held_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM ledger.entries
            WHERE status = 'held' AND release_at IS NOT NULL AND release_at <= $1
            ORDER BY release_at ASC
            "#,
            ENTRY_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get due entries: {}", e)))?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn held_for_ended_sources(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM ledger.entries e
            WHERE e.status = 'held'
              AND EXISTS (
                  SELECT 1 FROM payouts.sources s
                  WHERE s.id = e.source_id AND s.lifecycle IN ('completed', 'cancelled')
              )
            "#,
            ENTRY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get ended-source entries: {}", e)))?;

        rows.iter().map(entry_from_row).collect()
    }

    /// One statement, so the transition is atomic across the batch. Rows
    /// no longer held fall out of the predicate instead of failing.
    pub async fn lock_entries(&self, ids: &[Uuid]) -> LedgerResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE ledger.entries
            SET status = 'locked', cleared_at = NOW(), updated_at = NOW()
            WHERE id = ANY($1) AND status = 'held'
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to lock entries: {}", e)))?;

        Ok(result.rows_affected() as usize)
    }

    pub async fn mark_paid(
        &self,
        id: Uuid,
        paid_cents: i64,
        request_id: Uuid,
    ) -> LedgerResult<()> {
        if paid_cents <= 0 {
            return Err(LedgerError::InvalidAmount(paid_cents));
        }
        let result = sqlx::query(
            r#"
            UPDATE ledger.entries
            SET paid_cents = paid_cents + $2,
                status = CASE WHEN paid_cents + $2 = accrued_cents THEN 'paid' ELSE status END,
                last_paid_at = NOW(),
                payout_request_id = $3,
                updated_at = NOW()
            WHERE id = $1
              AND status IN ('held', 'locked')
              AND paid_cents + $2 <= accrued_cents
            "#,
        )
        .bind(id)
        .bind(paid_cents)
        .bind(request_id)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to mark entry paid: {}", e)))?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(entry) => {
                    let remaining = match entry.status {
                        EntryStatus::ClawedBack => 0,
                        _ => entry.remaining_cents(),
                    };
                    Err(LedgerError::Overpayment {
                        attempted: paid_cents,
                        remaining,
                    })
                }
                None => Err(LedgerError::NotFound(format!("entry {}", id))),
            };
        }
        Ok(())
    }

    pub async fn clawback(&self, id: Uuid, reason: &str) -> LedgerResult<LedgerEntry> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE ledger.entries
            SET status = 'clawed_back', clawback_reason = $2,
                clawed_back_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('held', 'locked')
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to claw back entry: {}", e)))?;

        if let Some(row) = row {
            return entry_from_row(&row);
        }
        match self.get(id).await? {
            Some(entry) if entry.status == EntryStatus::ClawedBack => Ok(entry),
            Some(_) => Err(LedgerError::AlreadyPaid),
            None => Err(LedgerError::NotFound(format!("entry {}", id))),
        }
    }
}

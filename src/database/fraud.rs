//! Fraud Repository - PostgreSQL operations for flags, history, device bans

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::fraud::{FlagStatus, FraudFlag, FraudHistoryRecord, FraudType};
use crate::ledger::entry::DeviceBan;

const FLAG_COLUMNS: &str = "id, creator_id, status, fraud_type, fraud_amount_cents, trust_penalty, \
     clawback_ledger_id, reason, evidence_deadline, created_at, resolved_at, resolved_by";

fn flag_from_row(row: &PgRow) -> LedgerResult<FraudFlag> {
    let status: String = row.get("status");
    let fraud_type: String = row.get("fraud_type");
    Ok(FraudFlag {
        id: row.get("id"),
        creator_id: row.get("creator_id"),
        status: FlagStatus::parse(&status)
            .ok_or_else(|| LedgerError::Inconsistency(format!("unknown flag status {}", status)))?,
        fraud_type: FraudType::parse(&fraud_type)
            .ok_or_else(|| LedgerError::Inconsistency(format!("unknown fraud type {}", fraud_type)))?,
        fraud_amount_cents: row.get("fraud_amount_cents"),
        trust_penalty: row.get("trust_penalty"),
        clawback_ledger_id: row.get("clawback_ledger_id"),
        reason: row.get("reason"),
        evidence_deadline: row.get("evidence_deadline"),
        created_at: row.get("created_at"),
        resolved_at: row.get("resolved_at"),
        resolved_by: row.get("resolved_by"),
    })
}

pub struct FraudRepository {
    pool: PgPool,
}

impl FraudRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_flag(&self, flag: &FraudFlag) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fraud.flags
            (id, creator_id, status, fraud_type, fraud_amount_cents, trust_penalty,
             clawback_ledger_id, reason, evidence_deadline, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(flag.id)
        .bind(&flag.creator_id)
        .bind(flag.status.as_str())
        .bind(flag.fraud_type.as_str())
        .bind(flag.fraud_amount_cents)
        .bind(flag.trust_penalty)
        .bind(flag.clawback_ledger_id)
        .bind(&flag.reason)
        .bind(flag.evidence_deadline)
        .bind(flag.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to insert fraud flag: {}", e)))?;

        debug!(flag_id = %flag.id, creator_id = %flag.creator_id, fraud_type = flag.fraud_type.as_str(), "Fraud flag raised");
        Ok(())
    }

    pub async fn get_flag(&self, id: Uuid) -> LedgerResult<Option<FraudFlag>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM fraud.flags WHERE id = $1",
            FLAG_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get fraud flag: {}", e)))?;

        row.as_ref().map(flag_from_row).transpose()
    }

    pub async fn open_flags(&self, creator_id: &str) -> LedgerResult<Vec<FraudFlag>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fraud.flags WHERE creator_id = $1 AND status = 'flagged' ORDER BY created_at ASC",
            FLAG_COLUMNS
        ))
        .bind(creator_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to list open flags: {}", e)))?;

        rows.iter().map(flag_from_row).collect()
    }

    /// The `status = 'flagged'` predicate is the double-resolution guard.
    pub async fn resolve_flag(
        &self,
        id: Uuid,
        resolution: FlagStatus,
        resolved_by: &str,
        trust_penalty: i64,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE fraud.flags
            SET status = $2,
                resolved_at = NOW(),
                resolved_by = $3,
                trust_penalty = CASE WHEN $2 = 'confirmed' THEN $4 ELSE trust_penalty END
            WHERE id = $1 AND status = 'flagged'
            "#,
        )
        .bind(id)
        .bind(resolution.as_str())
        .bind(resolved_by)
        .bind(trust_penalty)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to resolve fraud flag: {}", e)))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.get_flag(id).await? {
            Some(_) => Ok(false),
            None => Err(LedgerError::NotFound(format!("fraud flag {}", id))),
        }
    }

    pub async fn apply_penalty(
        &self,
        user_id: &str,
        fraud_flag_count: i64,
        permanent: bool,
        banned_at: Option<DateTime<Utc>>,
        last_fraud_at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE trust.profiles
            SET fraud_flag_count = $2,
                fraud_flag_permanent = $3,
                banned_at = $4,
                last_fraud_at = $5
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(fraud_flag_count)
        .bind(permanent)
        .bind(banned_at)
        .bind(last_fraud_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to apply fraud penalty: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("creator {}", user_id)));
        }
        Ok(())
    }

    pub async fn append_history(&self, record: &FraudHistoryRecord) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fraud.history
            (creator_id, flag_id, fraud_type, fraud_amount_cents, trust_penalty,
             score_before, score_after, fraud_count_before, fraud_count_after,
             banned, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&record.creator_id)
        .bind(record.flag_id)
        .bind(record.fraud_type.as_str())
        .bind(record.fraud_amount_cents)
        .bind(record.trust_penalty)
        .bind(record.score_before)
        .bind(record.score_after)
        .bind(record.fraud_count_before)
        .bind(record.fraud_count_after)
        .bind(record.banned)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to append fraud history: {}", e)))?;
        Ok(())
    }

    pub async fn upsert_device_ban(&self, ban: &DeviceBan) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fraud.device_bans (fingerprint, creator_id, reason, banned_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (fingerprint) DO UPDATE SET
                creator_id = EXCLUDED.creator_id,
                reason = EXCLUDED.reason,
                banned_at = EXCLUDED.banned_at
            "#,
        )
        .bind(&ban.fingerprint)
        .bind(&ban.creator_id)
        .bind(&ban.reason)
        .bind(ban.banned_at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to upsert device ban: {}", e)))?;

        debug!(fingerprint = %ban.fingerprint, creator_id = %ban.creator_id, "Device banned");
        Ok(())
    }
}

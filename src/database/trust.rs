//! Trust Repository - PostgreSQL operations for creator profiles and scores

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::CreatorProfile;

const PROFILE_COLUMNS: &str = "user_id, created_at, approved_count, rejected_count, fraud_flag_count, \
     fraud_flag_permanent, last_fraud_at, banned_at, device_fingerprint, trust_score, is_admin";

fn profile_from_row(row: &PgRow) -> CreatorProfile {
    CreatorProfile {
        user_id: row.get("user_id"),
        created_at: row.get("created_at"),
        approved_count: row.get("approved_count"),
        rejected_count: row.get("rejected_count"),
        fraud_flag_count: row.get("fraud_flag_count"),
        fraud_flag_permanent: row.get("fraud_flag_permanent"),
        last_fraud_at: row.get("last_fraud_at"),
        banned_at: row.get("banned_at"),
        device_fingerprint: row.get("device_fingerprint"),
        trust_score: row.get("trust_score"),
        is_admin: row.get("is_admin"),
    }
}

pub struct TrustRepository {
    pool: PgPool,
}

impl TrustRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_profile(&self, user_id: &str) -> LedgerResult<Option<CreatorProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trust.profiles WHERE user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get profile: {}", e)))?;

        Ok(row.as_ref().map(profile_from_row))
    }

    pub async fn upsert_profile(&self, profile: &CreatorProfile) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trust.profiles
            (user_id, created_at, approved_count, rejected_count, fraud_flag_count,
             fraud_flag_permanent, last_fraud_at, banned_at, device_fingerprint,
             trust_score, is_admin)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id) DO UPDATE SET
                approved_count = EXCLUDED.approved_count,
                rejected_count = EXCLUDED.rejected_count,
                fraud_flag_count = EXCLUDED.fraud_flag_count,
                fraud_flag_permanent = EXCLUDED.fraud_flag_permanent,
                last_fraud_at = EXCLUDED.last_fraud_at,
                banned_at = EXCLUDED.banned_at,
                device_fingerprint = EXCLUDED.device_fingerprint,
                trust_score = EXCLUDED.trust_score,
                is_admin = EXCLUDED.is_admin
            "#,
        )
        .bind(&profile.user_id)
        .bind(profile.created_at)
        .bind(profile.approved_count)
        .bind(profile.rejected_count)
        .bind(profile.fraud_flag_count)
        .bind(profile.fraud_flag_permanent)
        .bind(profile.last_fraud_at)
        .bind(profile.banned_at)
        .bind(&profile.device_fingerprint)
        .bind(profile.trust_score)
        .bind(profile.is_admin)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to upsert profile: {}", e)))?;
        Ok(())
    }

    pub async fn is_admin(&self, user_id: &str) -> LedgerResult<bool> {
        let row = sqlx::query("SELECT is_admin FROM trust.profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to check admin: {}", e)))?;

        Ok(row.map(|r| r.get("is_admin")).unwrap_or(false))
    }

    pub async fn store_score(&self, user_id: &str, score: f64) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE trust.profiles SET trust_score = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(score)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to store trust score: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("creator {}", user_id)));
        }
        Ok(())
    }

    pub async fn append_score_history(
        &self,
        user_id: &str,
        previous: f64,
        current: f64,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trust.score_history (user_id, previous_score, current_score, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(previous)
        .bind(current)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to append score history: {}", e)))?;
        Ok(())
    }

    pub async fn all_creator_ids(&self) -> LedgerResult<Vec<String>> {
        let rows = sqlx::query("SELECT user_id FROM trust.profiles ORDER BY user_id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to list creators: {}", e)))?;

        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }
}

//! Wallet Repository - PostgreSQL operations for creator wallets

use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::Wallet;

pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Missing wallets read as zero; the row is created on first credit.
    pub async fn get(&self, user_id: &str) -> LedgerResult<Wallet> {
        let row = sqlx::query(
            "SELECT user_id, balance_cents, total_earned_cents, updated_at FROM ledger.wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to get wallet: {}", e)))?;

        Ok(match row {
            Some(row) => Wallet {
                user_id: row.get("user_id"),
                balance_cents: row.get("balance_cents"),
                total_earned_cents: row.get("total_earned_cents"),
                updated_at: row.get("updated_at"),
            },
            None => Wallet {
                user_id: user_id.to_string(),
                balance_cents: 0,
                total_earned_cents: 0,
                updated_at: chrono::Utc::now(),
            },
        })
    }

    /// Balance moves only by increment; the adjustment row is the audit
    /// record. Negative deltas never reduce lifetime earnings below zero.
    pub async fn adjust(&self, user_id: &str, delta_cents: i64, reason: &str) -> LedgerResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to begin adjustment: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO ledger.wallets (user_id, balance_cents, total_earned_cents, updated_at)
            VALUES ($1, $2, GREATEST($2, 0), NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                balance_cents = ledger.wallets.balance_cents + $2,
                total_earned_cents = ledger.wallets.total_earned_cents + GREATEST($2, 0),
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(delta_cents)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to adjust wallet: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO ledger.wallet_adjustments (user_id, delta_cents, reason, recorded_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(user_id)
        .bind(delta_cents)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Database(format!("Failed to record adjustment: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to commit adjustment: {}", e)))?;

        debug!(user_id = %user_id, delta_cents, reason = %reason, "Wallet adjusted");
        Ok(())
    }
}

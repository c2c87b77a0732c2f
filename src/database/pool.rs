//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::database::entries::EntryRepository;
use crate::database::fraud::FraudRepository;
use crate::database::payouts::PayoutRepository;
use crate::database::trust::TrustRepository;
use crate::database::wallets::WalletRepository;
use crate::error::{LedgerError, LedgerResult};

const TABLES: &[(&str, &str)] = &[
    (
        "ledger.entries",
        r#"
        CREATE TABLE IF NOT EXISTS ledger.entries (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            accrued_cents BIGINT NOT NULL,
            paid_cents BIGINT NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'held',
            release_at TIMESTAMPTZ,
            cleared_at TIMESTAMPTZ,
            last_paid_at TIMESTAMPTZ,
            payout_request_id UUID,
            clawback_reason TEXT,
            clawed_back_at TIMESTAMPTZ,
            views_snapshot BIGINT NOT NULL DEFAULT 0,
            milestone_paid BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CHECK (accrued_cents > 0),
            CHECK (paid_cents >= 0 AND paid_cents <= accrued_cents)
        )
        "#,
    ),
    (
        "ledger.wallets",
        r#"
        CREATE TABLE IF NOT EXISTS ledger.wallets (
            user_id TEXT PRIMARY KEY,
            balance_cents BIGINT NOT NULL DEFAULT 0,
            total_earned_cents BIGINT NOT NULL DEFAULT 0,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "ledger.wallet_adjustments",
        r#"
        CREATE TABLE IF NOT EXISTS ledger.wallet_adjustments (
            id BIGSERIAL PRIMARY KEY,
            user_id TEXT NOT NULL,
            delta_cents BIGINT NOT NULL,
            reason TEXT NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "ledger.job_locks",
        r#"
        CREATE TABLE IF NOT EXISTS ledger.job_locks (
            name TEXT PRIMARY KEY,
            locked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "payouts.requests",
        r#"
        CREATE TABLE IF NOT EXISTS payouts.requests (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            amount_cents BIGINT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            clearing_ends_at TIMESTAMPTZ NOT NULL,
            approved_by TEXT,
            processed_at TIMESTAMPTZ,
            processed_by TEXT,
            transfer_id TEXT,
            failure_reason TEXT,
            requested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "payouts.sources",
        r#"
        CREATE TABLE IF NOT EXISTS payouts.sources (
            id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            brand_id TEXT NOT NULL,
            lifecycle TEXT NOT NULL DEFAULT 'active',
            min_payout_cents BIGINT,
            budget_cents BIGINT NOT NULL DEFAULT 0,
            budget_used_cents BIGINT NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "payouts.brand_settings",
        r#"
        CREATE TABLE IF NOT EXISTS payouts.brand_settings (
            brand_id TEXT PRIMARY KEY,
            default_min_payout_cents BIGINT NOT NULL DEFAULT 0,
            clearing_period_days BIGINT NOT NULL DEFAULT 7
        )
        "#,
    ),
    (
        "fraud.flags",
        r#"
        CREATE TABLE IF NOT EXISTS fraud.flags (
            id UUID PRIMARY KEY,
            creator_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'flagged',
            fraud_type TEXT NOT NULL,
            fraud_amount_cents BIGINT NOT NULL DEFAULT 0,
            trust_penalty BIGINT,
            clawback_ledger_id UUID,
            reason TEXT,
            evidence_deadline TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            resolved_at TIMESTAMPTZ,
            resolved_by TEXT
        )
        "#,
    ),
    (
        "fraud.history",
        r#"
        CREATE TABLE IF NOT EXISTS fraud.history (
            id BIGSERIAL PRIMARY KEY,
            creator_id TEXT NOT NULL,
            flag_id UUID NOT NULL,
            fraud_type TEXT NOT NULL,
            fraud_amount_cents BIGINT NOT NULL,
            trust_penalty BIGINT NOT NULL,
            score_before DOUBLE PRECISION NOT NULL,
            score_after DOUBLE PRECISION NOT NULL,
            fraud_count_before BIGINT NOT NULL,
            fraud_count_after BIGINT NOT NULL,
            banned BOOLEAN NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "fraud.device_bans",
        r#"
        CREATE TABLE IF NOT EXISTS fraud.device_bans (
            fingerprint TEXT PRIMARY KEY,
            creator_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            banned_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "trust.profiles",
        r#"
        CREATE TABLE IF NOT EXISTS trust.profiles (
            user_id TEXT PRIMARY KEY,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            approved_count BIGINT NOT NULL DEFAULT 0,
            rejected_count BIGINT NOT NULL DEFAULT 0,
            fraud_flag_count BIGINT NOT NULL DEFAULT 0,
            fraud_flag_permanent BOOLEAN NOT NULL DEFAULT FALSE,
            last_fraud_at TIMESTAMPTZ,
            banned_at TIMESTAMPTZ,
            device_fingerprint TEXT,
            trust_score DOUBLE PRECISION NOT NULL DEFAULT 50,
            is_admin BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    ),
    (
        "trust.score_history",
        r#"
        CREATE TABLE IF NOT EXISTS trust.score_history (
            id BIGSERIAL PRIMARY KEY,
            user_id TEXT NOT NULL,
            previous_score DOUBLE PRECISION NOT NULL,
            current_score DOUBLE PRECISION NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS entries_user_status ON ledger.entries (user_id, status)",
    "CREATE INDEX IF NOT EXISTS entries_release ON ledger.entries (status, release_at)",
    "CREATE INDEX IF NOT EXISTS entries_request ON ledger.entries (payout_request_id)",
    "CREATE INDEX IF NOT EXISTS requests_user_status ON payouts.requests (user_id, status)",
    "CREATE INDEX IF NOT EXISTS flags_creator_status ON fraud.flags (creator_id, status)",
];

pub struct DatabasePool {
    pool: PgPool,
    entries: EntryRepository,
    payouts: PayoutRepository,
    wallets: WalletRepository,
    fraud: FraudRepository,
    trust: TrustRepository,
}

impl DatabasePool {
    pub async fn new(connection_string: &str) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await
            .map_err(|e| LedgerError::Database(format!("Failed to connect to PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        let entries = EntryRepository::new(pool.clone());
        let payouts = PayoutRepository::new(pool.clone());
        let wallets = WalletRepository::new(pool.clone());
        let fraud = FraudRepository::new(pool.clone());
        let trust = TrustRepository::new(pool.clone());

        Ok(Self {
            pool,
            entries,
            payouts,
            wallets,
            fraud,
            trust,
        })
    }

    pub async fn init_schema(&self) -> LedgerResult<()> {
        info!("Initializing database schema...");

        for schema in ["ledger", "payouts", "fraud", "trust"] {
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    LedgerError::Database(format!("Failed to create {} schema: {}", schema, e))
                })?;
        }

        for (name, ddl) in TABLES {
            sqlx::query(ddl).execute(&self.pool).await.map_err(|e| {
                LedgerError::Database(format!("Failed to create {} table: {}", name, e))
            })?;
        }

        for ddl in INDEXES {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::Database(format!("Failed to create index: {}", e)))?;
        }

        info!("Database schema initialized");
        Ok(())
    }

    pub fn entries(&self) -> &EntryRepository {
        &self.entries
    }

    pub fn payouts(&self) -> &PayoutRepository {
        &self.payouts
    }

    pub fn wallets(&self) -> &WalletRepository {
        &self.wallets
    }

    pub fn fraud(&self) -> &FraudRepository {
        &self.fraud
    }

    pub fn trust(&self) -> &TrustRepository {
        &self.trust
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

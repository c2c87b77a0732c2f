use anyhow::Result;
use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{Level, error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use clearinghouse::{
    ClearinghouseConfig, DatabasePool, FraudApiState, FraudPenaltyEngine, LedgerApiState,
    LedgerStore, MemoryLedgerStore, MemoryRail, PaymentRail, PayoutApiState, PayoutScreen,
    ReleaseScheduler, SecurityMiddlewareConfig, SecurityState, SettlementEngine, TracingNotifier,
    TrustApiState, TrustScoreCalculator,
    api::{
        auth_middleware, body_size_middleware, create_fraud_router, create_ledger_router,
        create_payout_router, create_trust_router, logging_middleware, rate_limit_middleware,
        security_headers_middleware,
    },
    config::sanitize_for_logging,
    notify::Notifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all security requirements
    let config = Arc::new(ClearinghouseConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check environment variables and security settings.");
        e
    })?);

    init_logging(&config)?;

    info!("Starting clearinghouse payout server");
    info!(
        "Security settings: Auth enabled: {}, Rate limit: {}/min",
        config.security.enable_auth, config.security.rate_limit_per_minute
    );

    // Storage backend
    let store = build_store(&config).await?;

    // Engine wiring. The in-process rail records transfers locally; a
    // provider adapter replaces it at the PaymentRail seam.
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let rail: Arc<dyn PaymentRail> = Arc::new(MemoryRail::new());
    warn!("Using in-process payment rail; transfers settle locally only");

    let clearing_period = chrono::Duration::days(config.settlement.clearing_period_days);
    let settlement = Arc::new(SettlementEngine::new(
        store.clone(),
        rail,
        notifier.clone(),
        clearing_period,
    ));
    let release = Arc::new(ReleaseScheduler::new(store.clone(), notifier.clone()));
    let fraud_engine = Arc::new(FraudPenaltyEngine::new(store.clone(), notifier.clone()));
    let screen = Arc::new(PayoutScreen::new(store.clone()));
    let calculator = Arc::new(TrustScoreCalculator::new(store.clone()));

    info!(
        "Engines wired: clearing period {} days, release every {}s, sweep every {}s",
        config.settlement.clearing_period_days,
        config.settlement.release_interval_secs,
        config.settlement.sweep_interval_secs
    );

    // Security middleware
    let security_config = SecurityMiddlewareConfig {
        enable_auth: config.security.enable_auth,
        admin_api_key: config.security.admin_api_key.clone(),
        rate_limit_per_minute: config.security.rate_limit_per_minute,
        max_request_size: config.security.max_request_size,
        log_requests: config.logging.log_requests,
        public_paths: vec!["/health".to_string()],
    };
    let security_state = SecurityState::new(security_config);

    // Background jobs
    spawn_release_job(release.clone(), config.settlement.release_interval_secs);
    spawn_sweep_job(settlement.clone(), config.settlement.sweep_interval_secs);
    spawn_rate_limit_cleanup(security_state.clone());

    // Build the application with routes and security middleware
    let app = Router::new()
        // Ledger entries and wallets
        .nest("/ledger", create_ledger_router(LedgerApiState::new(store.clone())))
        // Payout requests, screening, batch triggers
        .nest(
            "/payouts",
            create_payout_router(PayoutApiState::new(
                store.clone(),
                settlement.clone(),
                screen.clone(),
                release.clone(),
            )),
        )
        // Fraud flags and resolution
        .nest(
            "/fraud",
            create_fraud_router(FraudApiState::new(store.clone(), fraud_engine.clone())),
        )
        // Trust scores
        .nest(
            "/trust",
            create_trust_router(TrustApiState::new(store.clone(), calculator.clone())),
        )
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Apply security middleware layers (order matters!)
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            body_size_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            logging_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http());

    // Start the server on configured host/port
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Clearinghouse server listening on {}", bind_addr);
    info!(
        "Security middleware: Auth={}, Rate limit={}/min, Max body={}KB",
        config.security.enable_auth,
        config.security.rate_limit_per_minute,
        config.security.max_request_size / 1024
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize logging from the configured level
fn init_logging(config: &ClearinghouseConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// Select the storage backend from configuration
async fn build_store(config: &ClearinghouseConfig) -> Result<Arc<dyn LedgerStore>> {
    if config.database.postgres_enabled {
        info!(
            "Connecting to PostgreSQL at {}",
            sanitize_for_logging(&config.database.postgres_url)
        );
        let pool = DatabasePool::new(&config.database.postgres_url).await?;
        pool.init_schema().await?;
        info!("PostgreSQL store initialized");
        Ok(Arc::new(pool))
    } else {
        warn!("PostgreSQL disabled; using in-memory store (state is volatile)");
        Ok(Arc::new(MemoryLedgerStore::new()))
    }
}

/// Run the release scheduler on a fixed interval. A fatal ledger
/// inconsistency stops scheduled runs; conflicts and transient errors are
/// logged and retried next tick.
fn spawn_release_job(release: Arc<ReleaseScheduler>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match release.run_once(chrono::Utc::now()).await {
                Ok(summary) if summary.skipped_lock_held => {
                    info!("Release run skipped; another worker holds the job lock");
                }
                Ok(summary) => {
                    if summary.entries_released > 0 {
                        info!(
                            released = summary.entries_released,
                            groups = summary.groups_released,
                            "Release run complete"
                        );
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal error in release run; stopping scheduled releases");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Release run failed; will retry next interval");
                }
            }
        }
    });
}

/// Run the settlement sweep on a fixed interval with the same halt rule.
fn spawn_sweep_job(settlement: Arc<SettlementEngine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match settlement.run_sweep(chrono::Utc::now()).await {
                Ok(summary) if summary.skipped_lock_held => {
                    info!("Settlement sweep skipped; another worker holds the job lock");
                }
                Ok(summary) => {
                    if summary.settled > 0 || summary.failed > 0 {
                        info!(
                            settled = summary.settled,
                            failed = summary.failed,
                            total_cents = summary.total_cents,
                            "Settlement sweep complete"
                        );
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal error in settlement sweep; stopping scheduled sweeps");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Settlement sweep failed; will retry next interval");
                }
            }
        }
    });
}

/// Periodically drop idle rate-limit windows
fn spawn_rate_limit_cleanup(security_state: SecurityState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            ticker.tick().await;
            security_state.rate_limiter.cleanup();
        }
    });
}

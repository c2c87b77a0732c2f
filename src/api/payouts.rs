//! Payout API endpoints for requests, settlement, and release runs
//!
//! Endpoints:
//!   POST /requests               -> Open a payout request
//!   GET  /requests/:id           -> Get request by id
//!   POST /requests/:id/approve   -> Approve early settlement (admin)
//!   POST /requests/:id/complete  -> Settle one request now
//!   POST /screen                 -> Pre-payout fraud screening
//!   POST /sweep                  -> Run the settlement sweep
//!   POST /release/run            -> Run the release scheduler once
//!   POST /sources                -> Upsert a payout source
//!   GET  /sources/:id            -> Get source by id
//!   POST /brands/:brand_id/settings -> Upsert brand payout settings

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::error_response;
use crate::error::LedgerError;
use crate::fraud::{PayoutScreen, ScreenOutcome};
use crate::ledger::entry::{
    BrandPayoutSettings, PayoutRequest, PayoutSource, SourceLifecycle, SourceType,
};
use crate::ledger::store::LedgerStore;
use crate::release::{ReleaseRunSummary, ReleaseScheduler};
use crate::settlement::{SettlementEngine, SweepSummary};

// ============================================================================
// State
// ============================================================================

/// Payout API state
#[derive(Clone)]
pub struct PayoutApiState {
    pub store: Arc<dyn LedgerStore>,
    pub settlement: Arc<SettlementEngine>,
    pub screen: Arc<PayoutScreen>,
    pub release: Arc<ReleaseScheduler>,
}

impl PayoutApiState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        settlement: Arc<SettlementEngine>,
        screen: Arc<PayoutScreen>,
        release: Arc<ReleaseScheduler>,
    ) -> Self {
        Self {
            store,
            settlement,
            screen,
            release,
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Payout request opening body
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenRequestBody {
    pub user_id: String,
}

/// Payout request summary for API responses
#[derive(Debug, Serialize)]
pub struct RequestSummary {
    pub id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub clearing_ends_at: String,
    pub approved_by: Option<String>,
    pub processed_at: Option<String>,
    pub transfer_id: Option<String>,
    pub failure_reason: Option<String>,
    pub requested_at: String,
}

impl From<PayoutRequest> for RequestSummary {
    fn from(request: PayoutRequest) -> Self {
        Self {
            id: request.id.to_string(),
            user_id: request.user_id.clone(),
            amount_cents: request.amount_cents,
            status: request.status.as_str().to_string(),
            clearing_ends_at: request.clearing_ends_at.to_rfc3339(),
            approved_by: request.approved_by.clone(),
            processed_at: request.processed_at.map(|t| t.to_rfc3339()),
            transfer_id: request.transfer_id.clone(),
            failure_reason: request.failure_reason.clone(),
            requested_at: request.requested_at.to_rfc3339(),
        }
    }
}

/// Approval body
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproveBody {
    pub admin_id: String,
}

/// Completion body
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteBody {
    pub operator: String,
}

/// Completion response
#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub request_id: String,
    pub settled_cents: i64,
}

/// Screening request
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenBody {
    pub user_id: String,
    pub amount_cents: i64,
}

/// Screening response
#[derive(Debug, Serialize)]
pub struct ScreenResponse {
    pub verdict: String,
    pub tier: String,
    pub reasons: Vec<String>,
    pub flags_raised: usize,
}

impl From<ScreenOutcome> for ScreenResponse {
    fn from(outcome: ScreenOutcome) -> Self {
        Self {
            verdict: outcome.verdict.as_str().to_string(),
            tier: outcome.tier.as_str().to_string(),
            reasons: outcome.reasons,
            flags_raised: outcome.flags.len(),
        }
    }
}

/// Source upsert body
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceBody {
    pub id: String,
    pub source_type: SourceType,
    pub brand_id: String,
    pub lifecycle: SourceLifecycle,
    pub min_payout_cents: Option<i64>,
    pub budget_cents: i64,
    #[serde(default)]
    pub budget_used_cents: i64,
}

/// Source summary for API responses
#[derive(Debug, Serialize)]
pub struct SourceSummary {
    pub id: String,
    pub source_type: String,
    pub brand_id: String,
    pub lifecycle: String,
    pub min_payout_cents: Option<i64>,
    pub budget_cents: i64,
    pub budget_used_cents: i64,
    pub budget_remaining_cents: i64,
}

impl From<PayoutSource> for SourceSummary {
    fn from(source: PayoutSource) -> Self {
        Self {
            id: source.id.clone(),
            source_type: source.source_type.as_str().to_string(),
            brand_id: source.brand_id.clone(),
            lifecycle: source.lifecycle.as_str().to_string(),
            min_payout_cents: source.min_payout_cents,
            budget_cents: source.budget_cents,
            budget_used_cents: source.budget_used_cents,
            budget_remaining_cents: source.budget_cents - source.budget_used_cents,
        }
    }
}

/// Brand settings upsert body
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrandSettingsBody {
    pub default_min_payout_cents: i64,
    pub clearing_period_days: i64,
}

// ============================================================================
// API Handlers
// ============================================================================

/// Open a payout request over the user's locked entries
pub async fn open_request(
    State(state): State<PayoutApiState>,
    Json(body): Json<OpenRequestBody>,
) -> Result<Json<RequestSummary>, (StatusCode, String)> {
    let request = state
        .settlement
        .open_request(&body.user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(request.into()))
}

/// Get a payout request by id
pub async fn get_request(
    State(state): State<PayoutApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RequestSummary>, (StatusCode, String)> {
    let request = state
        .store
        .payout_request(id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(LedgerError::NotFound(format!("payout request {}", id))))?;
    Ok(Json(request.into()))
}

/// Approve a request for settlement before its clearing window ends
pub async fn approve_request(
    State(state): State<PayoutApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<RequestSummary>, (StatusCode, String)> {
    state
        .settlement
        .approve(id, &body.admin_id)
        .await
        .map_err(error_response)?;

    let request = state
        .store
        .payout_request(id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(LedgerError::NotFound(format!("payout request {}", id))))?;
    Ok(Json(request.into()))
}

/// Settle one request now. Idempotent: re-invoking a completed request
/// returns its settled amount without a second transfer.
pub async fn complete_request(
    State(state): State<PayoutApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteBody>,
) -> Result<Json<CompleteResponse>, (StatusCode, String)> {
    let settled_cents = state
        .settlement
        .complete_payout(id, &body.operator)
        .await
        .map_err(error_response)?;

    Ok(Json(CompleteResponse {
        request_id: id.to_string(),
        settled_cents,
    }))
}

/// Screen a prospective payout for fraud signals
pub async fn screen_payout(
    State(state): State<PayoutApiState>,
    Json(body): Json<ScreenBody>,
) -> Result<Json<ScreenResponse>, (StatusCode, String)> {
    let outcome = state
        .screen
        .review(&body.user_id, body.amount_cents)
        .await
        .map_err(error_response)?;

    info!(
        user_id = %body.user_id,
        amount_cents = body.amount_cents,
        verdict = ?outcome.verdict,
        "Payout screened"
    );
    Ok(Json(outcome.into()))
}

/// Run the settlement sweep over every request whose clearing has elapsed
pub async fn run_sweep(
    State(state): State<PayoutApiState>,
) -> Result<Json<SweepSummary>, (StatusCode, String)> {
    let summary = state
        .settlement
        .run_sweep(Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

/// Run the release scheduler once
pub async fn run_release(
    State(state): State<PayoutApiState>,
) -> Result<Json<ReleaseRunSummary>, (StatusCode, String)> {
    let summary = state
        .release
        .run_once(Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

/// Upsert a payout source
pub async fn upsert_source(
    State(state): State<PayoutApiState>,
    Json(body): Json<SourceBody>,
) -> Result<Json<SourceSummary>, (StatusCode, String)> {
    let source = PayoutSource {
        id: body.id,
        source_type: body.source_type,
        brand_id: body.brand_id,
        lifecycle: body.lifecycle,
        min_payout_cents: body.min_payout_cents,
        budget_cents: body.budget_cents,
        budget_used_cents: body.budget_used_cents,
    };

    state
        .store
        .upsert_source(&source)
        .await
        .map_err(error_response)?;

    info!(
        source_id = %source.id,
        lifecycle = source.lifecycle.as_str(),
        "Payout source upserted"
    );
    Ok(Json(source.into()))
}

/// Get a payout source by id
pub async fn get_source(
    State(state): State<PayoutApiState>,
    Path(id): Path<String>,
) -> Result<Json<SourceSummary>, (StatusCode, String)> {
    let source = state
        .store
        .source(&id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(LedgerError::NotFound(format!("source {}", id))))?;
    Ok(Json(source.into()))
}

/// Upsert brand payout settings
pub async fn upsert_brand_settings(
    State(state): State<PayoutApiState>,
    Path(brand_id): Path<String>,
    Json(body): Json<BrandSettingsBody>,
) -> Result<Json<BrandPayoutSettings>, (StatusCode, String)> {
    let settings = BrandPayoutSettings {
        brand_id,
        default_min_payout_cents: body.default_min_payout_cents,
        clearing_period_days: body.clearing_period_days,
    };

    state
        .store
        .upsert_brand_settings(&settings)
        .await
        .map_err(error_response)?;
    Ok(Json(settings))
}

// ============================================================================
// Router
// ============================================================================

/// Create the payout API router
pub fn create_payout_router(state: PayoutApiState) -> Router {
    Router::new()
        // Requests
        .route("/requests", post(open_request))
        .route("/requests/{id}", get(get_request))
        .route("/requests/{id}/approve", post(approve_request))
        .route("/requests/{id}/complete", post(complete_request))
        // Screening
        .route("/screen", post(screen_payout))
        // Batch triggers
        .route("/sweep", post(run_sweep))
        .route("/release/run", post(run_release))
        // Sources and thresholds
        .route("/sources", post(upsert_source))
        .route("/sources/{id}", get(get_source))
        .route("/brands/{brand_id}/settings", post(upsert_brand_settings))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::{AmountTier, ScreenVerdict};
    use crate::ledger::entry::PayoutStatus;

    #[test]
    fn request_summary_from_request() {
        let now = Utc::now();
        let request = PayoutRequest {
            id: Uuid::new_v4(),
            user_id: "creator-1".to_string(),
            amount_cents: 30_000,
            status: PayoutStatus::Pending,
            clearing_ends_at: now,
            approved_by: None,
            processed_at: None,
            processed_by: None,
            transfer_id: None,
            failure_reason: None,
            requested_at: now,
        };

        let summary: RequestSummary = request.into();
        assert_eq!(summary.amount_cents, 30_000);
        assert_eq!(summary.status, "pending");
        assert!(summary.transfer_id.is_none());
    }

    #[test]
    fn screen_response_flattens_outcome() {
        let outcome = ScreenOutcome {
            verdict: ScreenVerdict::ManualReview,
            tier: AmountTier::Medium,
            reasons: vec!["trust score 61.0 below 80 required for tier".to_string()],
            flags: vec![],
        };

        let response: ScreenResponse = outcome.into();
        assert_eq!(response.verdict, "manual_review");
        assert_eq!(response.tier, "medium");
        assert_eq!(response.flags_raised, 0);
        assert_eq!(response.reasons.len(), 1);
    }

    #[test]
    fn source_summary_reports_budget_remaining() {
        let source = PayoutSource {
            id: "boost-1".to_string(),
            source_type: SourceType::Boost,
            brand_id: "brand-1".to_string(),
            lifecycle: SourceLifecycle::Active,
            min_payout_cents: Some(3_000),
            budget_cents: 100_000,
            budget_used_cents: 42_000,
        };

        let summary: SourceSummary = source.into();
        assert_eq!(summary.budget_remaining_cents, 58_000);
        assert_eq!(summary.lifecycle, "active");
    }
}

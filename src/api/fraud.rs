//! Fraud API endpoints for flags and penalty resolution
//!
//! Endpoints:
//!   POST /flags              -> Raise a manual flag (admin)
//!   GET  /flags/:id          -> Get flag by id
//!   POST /flags/:id/confirm  -> Confirm fraud and apply penalties (admin)
//!   POST /flags/:id/dismiss  -> Dismiss a flag (admin)
//!   GET  /users/:user_id/flags -> Open flags for a creator

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error_response;
use crate::error::LedgerError;
use crate::fraud::{FraudFlag, FraudPenaltyEngine, PenaltyResult};
use crate::ledger::store::LedgerStore;

// ============================================================================
// State
// ============================================================================

/// Fraud API state
#[derive(Clone)]
pub struct FraudApiState {
    pub store: Arc<dyn LedgerStore>,
    pub engine: Arc<FraudPenaltyEngine>,
}

impl FraudApiState {
    pub fn new(store: Arc<dyn LedgerStore>, engine: Arc<FraudPenaltyEngine>) -> Self {
        Self { store, engine }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Manual flag request
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManualFlagBody {
    pub creator_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub admin_id: String,
}

/// Flag summary for API responses
#[derive(Debug, Serialize)]
pub struct FlagSummary {
    pub id: String,
    pub creator_id: String,
    pub status: String,
    pub fraud_type: String,
    pub fraud_amount_cents: i64,
    pub trust_penalty: Option<i64>,
    pub reason: Option<String>,
    pub evidence_deadline: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub resolved_by: Option<String>,
}

impl From<FraudFlag> for FlagSummary {
    fn from(flag: FraudFlag) -> Self {
        Self {
            id: flag.id.to_string(),
            creator_id: flag.creator_id.clone(),
            status: flag.status.as_str().to_string(),
            fraud_type: flag.fraud_type.as_str().to_string(),
            fraud_amount_cents: flag.fraud_amount_cents,
            trust_penalty: flag.trust_penalty,
            reason: flag.reason.clone(),
            evidence_deadline: flag.evidence_deadline.map(|t| t.to_rfc3339()),
            created_at: flag.created_at.to_rfc3339(),
            resolved_at: flag.resolved_at.map(|t| t.to_rfc3339()),
            resolved_by: flag.resolved_by.clone(),
        }
    }
}

/// Resolution body shared by confirm and dismiss
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveBody {
    pub admin_id: String,
}

/// Confirmation response
#[derive(Debug, Serialize)]
pub struct PenaltyResponse {
    pub flag_id: String,
    pub creator_id: String,
    pub trust_penalty: i64,
    pub fraud_count: i64,
    pub banned: bool,
    pub score_before: f64,
    pub score_after: f64,
}

impl From<PenaltyResult> for PenaltyResponse {
    fn from(result: PenaltyResult) -> Self {
        Self {
            flag_id: result.flag_id.to_string(),
            creator_id: result.creator_id.clone(),
            trust_penalty: result.trust_penalty,
            fraud_count: result.fraud_count,
            banned: result.banned,
            score_before: result.score_before,
            score_after: result.score_after,
        }
    }
}

/// Dismissal response
#[derive(Debug, Serialize)]
pub struct DismissResponse {
    pub flag_id: String,
    pub status: String,
}

/// Open flag list response
#[derive(Debug, Serialize)]
pub struct FlagListResponse {
    pub flags: Vec<FlagSummary>,
    pub total: usize,
}

// ============================================================================
// API Handlers
// ============================================================================

/// Raise a manual fraud flag
pub async fn raise_flag(
    State(state): State<FraudApiState>,
    Json(body): Json<ManualFlagBody>,
) -> Result<Json<FlagSummary>, (StatusCode, String)> {
    let flag = state
        .engine
        .raise_manual_flag(
            &body.creator_id,
            body.amount_cents,
            &body.reason,
            &body.admin_id,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(flag.into()))
}

/// Get a fraud flag by id
pub async fn get_flag(
    State(state): State<FraudApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlagSummary>, (StatusCode, String)> {
    let flag = state
        .store
        .fraud_flag(id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(LedgerError::NotFound(format!("fraud flag {}", id))))?;
    Ok(Json(flag.into()))
}

/// Confirm fraud: resolve the flag, penalize the creator, claw back
pub async fn confirm_flag(
    State(state): State<FraudApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<PenaltyResponse>, (StatusCode, String)> {
    let result = state
        .engine
        .confirm_fraud(id, &body.admin_id)
        .await
        .map_err(error_response)?;
    Ok(Json(result.into()))
}

/// Dismiss a flag without penalty
pub async fn dismiss_flag(
    State(state): State<FraudApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<DismissResponse>, (StatusCode, String)> {
    state
        .engine
        .dismiss_flag(id, &body.admin_id)
        .await
        .map_err(error_response)?;

    Ok(Json(DismissResponse {
        flag_id: id.to_string(),
        status: "dismissed".to_string(),
    }))
}

/// List a creator's open flags
pub async fn list_open_flags(
    State(state): State<FraudApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<FlagListResponse>, (StatusCode, String)> {
    let flags = state
        .store
        .open_flags_for_user(&user_id)
        .await
        .map_err(error_response)?;

    let summaries: Vec<FlagSummary> = flags.into_iter().map(|f| f.into()).collect();
    let total = summaries.len();

    Ok(Json(FlagListResponse {
        flags: summaries,
        total,
    }))
}

// ============================================================================
// Router
// ============================================================================

/// Create the fraud API router
pub fn create_fraud_router(state: FraudApiState) -> Router {
    Router::new()
        .route("/flags", post(raise_flag))
        .route("/flags/{id}", get(get_flag))
        .route("/flags/{id}/confirm", post(confirm_flag))
        .route("/flags/{id}/dismiss", post(dismiss_flag))
        .route("/users/{user_id}/flags", get(list_open_flags))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================

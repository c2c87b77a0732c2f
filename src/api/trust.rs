//! Trust API endpoints for score reads and recalculation
//!
//! Endpoints:
//!   GET  /score/:user_id        -> Current cached score and level
//!   POST /recalculate/:user_id  -> Recompute one creator's score
//!   POST /recalculate-all       -> Recompute every creator's score

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;

use crate::api::error_response;
use crate::error::LedgerError;
use crate::ledger::store::LedgerStore;
use crate::trust::{BulkRecalcSummary, ScoreUpdate, TrustLevel, TrustScoreCalculator};

// ============================================================================
// State
// ============================================================================

/// Trust API state
#[derive(Clone)]
pub struct TrustApiState {
    pub store: Arc<dyn LedgerStore>,
    pub calculator: Arc<TrustScoreCalculator>,
}

impl TrustApiState {
    pub fn new(store: Arc<dyn LedgerStore>, calculator: Arc<TrustScoreCalculator>) -> Self {
        Self { store, calculator }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Cached score response
#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub user_id: String,
    pub score: f64,
    pub level: String,
    pub fraud_flag_count: i64,
    pub banned: bool,
}

/// Recalculation response
#[derive(Debug, Serialize)]
pub struct ScoreUpdateResponse {
    pub user_id: String,
    pub previous: f64,
    pub current: f64,
    pub level: String,
    pub changed: bool,
}

impl From<ScoreUpdate> for ScoreUpdateResponse {
    fn from(update: ScoreUpdate) -> Self {
        Self {
            user_id: update.user_id,
            previous: update.previous,
            current: update.current,
            level: update.level.as_str().to_string(),
            changed: update.changed,
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// Read the cached trust score for a creator
pub async fn get_score(
    State(state): State<TrustApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<ScoreResponse>, (StatusCode, String)> {
    let profile = state
        .store
        .profile(&user_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(LedgerError::NotFound(format!("creator {}", user_id))))?;

    Ok(Json(ScoreResponse {
        user_id: profile.user_id.clone(),
        score: profile.trust_score,
        level: TrustLevel::from_score(profile.trust_score).as_str().to_string(),
        fraud_flag_count: profile.fraud_flag_count,
        banned: profile.is_banned(),
    }))
}

/// Recompute one creator's score from their profile
pub async fn recalculate_user(
    State(state): State<TrustApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<ScoreUpdateResponse>, (StatusCode, String)> {
    let update = state
        .calculator
        .recalculate_user(&user_id)
        .await
        .map_err(error_response)?;
    Ok(Json(update.into()))
}

/// Recompute every creator's score
pub async fn recalculate_all(
    State(state): State<TrustApiState>,
) -> Result<Json<BulkRecalcSummary>, (StatusCode, String)> {
    let summary = state
        .calculator
        .recalculate_all()
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

// ============================================================================
// Router
// ============================================================================

/// Create the trust API router
pub fn create_trust_router(state: TrustApiState) -> Router {
    Router::new()
        .route("/score/{user_id}", get(get_score))
        .route("/recalculate/{user_id}", post(recalculate_user))
        .route("/recalculate-all", post(recalculate_all))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_update_response_carries_level() {
        let update = ScoreUpdate {
            user_id: "creator-1".to_string(),
            previous: 50.0,
            current: 72.5,
            level: TrustLevel::Good,
            changed: true,
        };

        let response: ScoreUpdateResponse = update.into();
        assert_eq!(response.level, "good");
        assert!(response.changed);
        assert_eq!(response.current, 72.5);
    }
}

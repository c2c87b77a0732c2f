//! Ledger API endpoints for entries, accrual, and wallets
//!
//! Endpoints:
//!   POST /entries                 -> Create a held entry
//!   GET  /entries/:id             -> Get entry by id
//!   POST /entries/:id/accrue      -> Apply a view-count accrual
//!   POST /entries/:id/clawback    -> Claw back an unpaid entry (admin)
//!   POST /entries/:id/reverse     -> Reverse an already-paid entry (admin)
//!   GET  /users/:user_id/entries  -> List a user's entries
//!   GET  /users/:user_id/wallet   -> Get a user's wallet

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::error_response;
use crate::error::LedgerError;
use crate::ledger::entry::{LedgerEntry, SourceType, Wallet};
use crate::ledger::store::{LedgerStore, NewEntry};
use crate::ledger::{accrual_delta, AccrualRate};

// ============================================================================
// State
// ============================================================================

/// Ledger API state
#[derive(Clone)]
pub struct LedgerApiState {
    pub store: Arc<dyn LedgerStore>,
}

impl LedgerApiState {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Entry creation request
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEntryRequest {
    pub user_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub amount_cents: i64,
    /// When the hold expires. None means the entry waits for its source
    /// to end.
    pub release_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub views_snapshot: i64,
}

/// Entry summary for API responses
#[derive(Debug, Serialize)]
pub struct EntrySummary {
    pub id: String,
    pub user_id: String,
    pub source_type: String,
    pub source_id: String,
    pub accrued_cents: i64,
    pub paid_cents: i64,
    pub remaining_cents: i64,
    pub status: String,
    pub release_at: Option<String>,
    pub payout_request_id: Option<String>,
    pub views_snapshot: i64,
    pub milestone_paid: bool,
    pub created_at: String,
}

impl From<LedgerEntry> for EntrySummary {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            user_id: entry.user_id.clone(),
            source_type: entry.source_type.as_str().to_string(),
            source_id: entry.source_id.clone(),
            accrued_cents: entry.accrued_cents,
            paid_cents: entry.paid_cents,
            remaining_cents: entry.remaining_cents(),
            status: entry.status.as_str().to_string(),
            release_at: entry.release_at.map(|t| t.to_rfc3339()),
            payout_request_id: entry.payout_request_id.map(|id| id.to_string()),
            views_snapshot: entry.views_snapshot,
            milestone_paid: entry.milestone_paid,
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// Entry list response
#[derive(Debug, Serialize)]
pub struct EntryListResponse {
    pub entries: Vec<EntrySummary>,
    pub total: usize,
    pub total_remaining_cents: i64,
}

/// Accrual request. The caller owns the rate card; sources carry no rate
/// columns, so every accrual submits the card it was priced under.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccrueRequest {
    pub views: i64,
    pub rate: AccrualRate,
}

/// Accrual response
#[derive(Debug, Serialize)]
pub struct AccrueResponse {
    pub entry_id: String,
    pub delta_cents: i64,
    pub milestone_hit: bool,
    /// False when the view count did not advance past the snapshot.
    pub applied: bool,
}

/// Clawback request
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClawbackRequest {
    pub reason: String,
    pub admin_id: String,
}

/// Paid-entry reversal request
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReverseRequest {
    pub reason: String,
    pub admin_id: String,
}

/// Paid-entry reversal response
#[derive(Debug, Serialize)]
pub struct ReverseResponse {
    pub entry_id: String,
    pub reversed_cents: i64,
}

/// Wallet response
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub user_id: String,
    pub balance_cents: i64,
    pub total_earned_cents: i64,
    pub updated_at: String,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            user_id: wallet.user_id,
            balance_cents: wallet.balance_cents,
            total_earned_cents: wallet.total_earned_cents,
            updated_at: wallet.updated_at.to_rfc3339(),
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// Create a held ledger entry
pub async fn create_entry(
    State(state): State<LedgerApiState>,
    Json(request): Json<CreateEntryRequest>,
) -> Result<Json<EntrySummary>, (StatusCode, String)> {
    let entry = state
        .store
        .create_entry(NewEntry {
            user_id: request.user_id,
            source_type: request.source_type,
            source_id: request.source_id,
            amount_cents: request.amount_cents,
            release_at: request.release_at,
            views_snapshot: request.views_snapshot,
        })
        .await
        .map_err(error_response)?;

    info!(
        entry_id = %entry.id,
        user_id = %entry.user_id,
        amount_cents = entry.accrued_cents,
        "Ledger entry created"
    );
    Ok(Json(entry.into()))
}

/// Get an entry by id
pub async fn get_entry(
    State(state): State<LedgerApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EntrySummary>, (StatusCode, String)> {
    let entry = state
        .store
        .entry(id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(LedgerError::NotFound(format!("entry {}", id))))?;
    Ok(Json(entry.into()))
}

/// List a user's entries
pub async fn list_user_entries(
    State(state): State<LedgerApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<EntryListResponse>, (StatusCode, String)> {
    let entries = state
        .store
        .entries_for_user(&user_id)
        .await
        .map_err(error_response)?;

    let total_remaining_cents = entries.iter().map(|e| e.remaining_cents()).sum();
    let summaries: Vec<EntrySummary> = entries.into_iter().map(|e| e.into()).collect();
    let total = summaries.len();

    Ok(Json(EntryListResponse {
        entries: summaries,
        total,
        total_remaining_cents,
    }))
}

/// Apply an accrual evaluated against the submitted rate card. The delta
/// between the card's total at `views` and the entry's recorded accrual is
/// added; a stale or repeated view count applies nothing.
pub async fn accrue_entry(
    State(state): State<LedgerApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AccrueRequest>,
) -> Result<Json<AccrueResponse>, (StatusCode, String)> {
    let entry = state
        .store
        .entry(id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(LedgerError::NotFound(format!("entry {}", id))))?;

    let outcome = accrual_delta(
        request.views,
        entry.views_snapshot,
        entry.accrued_cents,
        entry.milestone_paid,
        &request.rate,
    )
    .map_err(error_response)?;

    if outcome.total_cents == 0 {
        return Ok(Json(AccrueResponse {
            entry_id: id.to_string(),
            delta_cents: 0,
            milestone_hit: false,
            applied: false,
        }));
    }

    state
        .store
        .accrue(id, outcome.total_cents, request.views, outcome.milestone_hit)
        .await
        .map_err(error_response)?;

    info!(
        entry_id = %id,
        delta_cents = outcome.total_cents,
        views = request.views,
        milestone_hit = outcome.milestone_hit,
        "Accrual applied"
    );
    Ok(Json(AccrueResponse {
        entry_id: id.to_string(),
        delta_cents: outcome.total_cents,
        milestone_hit: outcome.milestone_hit,
        applied: true,
    }))
}

/// Claw back an unpaid entry. Paid entries must go through /reverse.
pub async fn clawback_entry(
    State(state): State<LedgerApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ClawbackRequest>,
) -> Result<Json<EntrySummary>, (StatusCode, String)> {
    require_admin(&state, &request.admin_id).await?;

    let entry = state
        .store
        .clawback_entry(id, &request.reason)
        .await
        .map_err(error_response)?;

    info!(
        entry_id = %id,
        admin_id = %request.admin_id,
        reason = %request.reason,
        "Entry clawed back"
    );
    Ok(Json(entry.into()))
}

/// Reverse an already-paid entry via a negative wallet adjustment.
pub async fn reverse_entry(
    State(state): State<LedgerApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReverseRequest>,
) -> Result<Json<ReverseResponse>, (StatusCode, String)> {
    require_admin(&state, &request.admin_id).await?;

    let reversed_cents = state
        .store
        .reverse_paid_entry(id, &request.reason)
        .await
        .map_err(error_response)?;

    info!(
        entry_id = %id,
        admin_id = %request.admin_id,
        reversed_cents = reversed_cents,
        "Paid entry reversed"
    );
    Ok(Json(ReverseResponse {
        entry_id: id.to_string(),
        reversed_cents,
    }))
}

/// Get a user's wallet
pub async fn get_wallet(
    State(state): State<LedgerApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<WalletResponse>, (StatusCode, String)> {
    let wallet = state.store.wallet(&user_id).await.map_err(error_response)?;
    Ok(Json(wallet.into()))
}

async fn require_admin(
    state: &LedgerApiState,
    admin_id: &str,
) -> Result<(), (StatusCode, String)> {
    match state.store.is_admin(admin_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(error_response(LedgerError::Unauthorized)),
        Err(e) => Err(error_response(e)),
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the ledger API router
pub fn create_ledger_router(state: LedgerApiState) -> Router {
    Router::new()
        // Entries
        .route("/entries", post(create_entry))
        .route("/entries/{id}", get(get_entry))
        .route("/entries/{id}/accrue", post(accrue_entry))
        .route("/entries/{id}/clawback", post(clawback_entry))
        .route("/entries/{id}/reverse", post(reverse_entry))
        // Per-user views
        .route("/users/{user_id}/entries", get(list_user_entries))
        .route("/users/{user_id}/wallet", get(get_wallet))
        .with_state(state)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::EntryStatus;

    fn sample_entry() -> LedgerEntry {
        let now = Utc::now();
        LedgerEntry {
            id: Uuid::new_v4(),
            user_id: "creator-1".to_string(),
            source_type: SourceType::Boost,
            source_id: "boost-9".to_string(),
            accrued_cents: 12_500,
            paid_cents: 2_500,
            status: EntryStatus::Locked,
            release_at: Some(now),
            cleared_at: None,
            last_paid_at: None,
            payout_request_id: None,
            clawback_reason: None,
            clawed_back_at: None,
            views_snapshot: 4_000,
            milestone_paid: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn entry_summary_carries_remaining() {
        let entry = sample_entry();
        let summary: EntrySummary = entry.into();

        assert_eq!(summary.remaining_cents, 10_000);
        assert_eq!(summary.status, "locked");
        assert_eq!(summary.source_type, "boost");
        assert!(summary.milestone_paid);
    }

    #[test]
    fn wallet_response_from_wallet() {
        let wallet = Wallet {
            user_id: "creator-1".to_string(),
            balance_cents: 7_200,
            total_earned_cents: 31_000,
            updated_at: Utc::now(),
        };
        let response: WalletResponse = wallet.into();

        assert_eq!(response.user_id, "creator-1");
        assert_eq!(response.balance_cents, 7_200);
        assert_eq!(response.total_earned_cents, 31_000);
    }
}

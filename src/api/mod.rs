//! HTTP API for the clearinghouse
//!
//! Provides REST APIs for:
//! - Ledger entries, accrual, and wallets
//! - Payout requests, screening, and batch triggers
//! - Fraud flags and penalty resolution
//! - Trust score reads and recalculation
//! - Security middleware (admin key auth, rate limiting, headers)

use axum::http::StatusCode;

use crate::error::LedgerError;

pub mod fraud;
pub mod ledger;
pub mod middleware;
pub mod payouts;
pub mod trust;

pub use fraud::{FraudApiState, create_fraud_router};
pub use ledger::{LedgerApiState, create_ledger_router};
pub use middleware::{
    RateLimiter, SecurityMiddlewareConfig, SecurityState, auth_middleware, body_size_middleware,
    logging_middleware, rate_limit_middleware, security_headers_middleware,
};
pub use payouts::{PayoutApiState, create_payout_router};
pub use trust::{TrustApiState, create_trust_router};

/// Maps a ledger error to an HTTP status and an operator-safe message.
/// Internal detail (driver errors, row ids) stays in the logs.
pub fn error_response(e: LedgerError) -> (StatusCode, String) {
    let status = match &e {
        LedgerError::InvalidAmount(_) | LedgerError::Overpayment { .. } => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Unauthorized => StatusCode::FORBIDDEN,
        LedgerError::AlreadyPaid
        | LedgerError::AlreadyResolved
        | LedgerError::ClearingNotElapsed
        | LedgerError::NothingToSettle
        | LedgerError::AlreadyProcessing => StatusCode::CONFLICT,
        LedgerError::Rail(_) => StatusCode::BAD_GATEWAY,
        LedgerError::Database(_) | LedgerError::Inconsistency(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "API request failed");
    }
    (status, e.public_reason().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_map_by_class() {
        let (status, _) = error_response(LedgerError::NotFound("entry x".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = error_response(LedgerError::AlreadyProcessing);
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = error_response(LedgerError::Unauthorized);
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, msg) = error_response(LedgerError::Database("pg down at 10.1.2.3".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!msg.contains("10.1.2.3"));

        let (status, _) = error_response(LedgerError::Rail("provider 503".to_string()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}

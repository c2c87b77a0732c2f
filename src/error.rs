//! Error taxonomy for the ledger core
//!
//! Validation errors are rejected synchronously and never partially applied.
//! State-conflict errors are surfaced to the caller without engine-side
//! retries. Transient rail errors are retried with the same idempotency key.
//! A detected money-state inconsistency halts the batch that found it.

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Accrual or payout amount is zero, negative, or otherwise unusable.
    #[error("invalid amount: {0} cents")]
    InvalidAmount(i64),

    /// Attempted to pay more than the remaining accrued balance of an entry.
    #[error("overpayment: attempted {attempted} cents, {remaining} cents remaining")]
    Overpayment { attempted: i64, remaining: i64 },

    /// Clawback requested on an entry that has already been paid out.
    #[error("entry already paid; reverse via wallet adjustment instead")]
    AlreadyPaid,

    /// Fraud flag was already confirmed or dismissed.
    #[error("fraud flag already resolved")]
    AlreadyResolved,

    /// Payout request has not finished its clearing window and was not
    /// manually approved.
    #[error("clearing period has not elapsed")]
    ClearingNotElapsed,

    /// Payout request references no locked entries.
    #[error("no locked entries to settle")]
    NothingToSettle,

    /// Another worker holds the request; it is already being settled.
    #[error("payout request is already processing")]
    AlreadyProcessing,

    #[error("not found: {0}")]
    NotFound(String),

    /// Caller is not an operator.
    #[error("admin authorization required")]
    Unauthorized,

    /// Transfer rail failure. Retryable with the same idempotency key.
    #[error("payment rail error: {0}")]
    Rail(String),

    #[error("database error: {0}")]
    Database(String),

    /// Money state failed to commit atomically. The batch that observed
    /// this must stop moving money.
    #[error("fatal ledger inconsistency: {0}")]
    Inconsistency(String),
}

impl LedgerError {
    /// Conflicts are expected under concurrent operators and retried
    /// sweeps; a batch skips the affected request and continues.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::AlreadyPaid
                | LedgerError::AlreadyResolved
                | LedgerError::ClearingNotElapsed
                | LedgerError::NothingToSettle
                | LedgerError::AlreadyProcessing
        )
    }

    /// True for failures that must halt automated money movement.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::Inconsistency(_))
    }

    /// Human-readable reason safe to show an operator. Never includes
    /// internal ids or driver detail.
    pub fn public_reason(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "amount must be positive",
            LedgerError::Overpayment { .. } => "payment exceeds remaining balance",
            LedgerError::AlreadyPaid => "entry was already paid",
            LedgerError::AlreadyResolved => "flag was already resolved",
            LedgerError::ClearingNotElapsed => "clearing period has not elapsed",
            LedgerError::NothingToSettle => "no eligible entries to settle",
            LedgerError::AlreadyProcessing => "payout is already being processed",
            LedgerError::NotFound(_) => "record not found",
            LedgerError::Unauthorized => "admin authorization required",
            LedgerError::Rail(_) => "transfer provider unavailable",
            LedgerError::Database(_) => "storage unavailable",
            LedgerError::Inconsistency(_) => "ledger inconsistency detected",
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => LedgerError::NotFound("row".to_string()),
            other => LedgerError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_not_fatal() {
        assert!(LedgerError::AlreadyResolved.is_state_conflict());
        assert!(LedgerError::NothingToSettle.is_state_conflict());
        assert!(!LedgerError::AlreadyResolved.is_fatal());
        assert!(LedgerError::Inconsistency("wallet".into()).is_fatal());
        assert!(!LedgerError::Inconsistency("wallet".into()).is_state_conflict());
    }

    #[test]
    fn public_reasons_hide_internals() {
        let e = LedgerError::Database("connection refused on 10.0.0.3".into());
        assert!(!e.public_reason().contains("10.0.0.3"));
    }
}

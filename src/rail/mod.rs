//! Payment rail boundary
//!
//! The engine hands cleared totals to an external transfer provider through
//! this trait. The rail must honor idempotency keys: a retried request with
//! a key it has already seen returns the original transfer instead of
//! creating a second one. An in-memory rail ships for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub recipient: String,
    pub amount_cents: i64,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// A new transfer was created.
    Completed,
    /// The idempotency key was seen before; this is the original transfer.
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub status: TransferStatus,
}

impl TransferReceipt {
    /// Both outcomes mean the money moved exactly once.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Completed | TransferStatus::Duplicate
        )
    }
}

#[async_trait]
pub trait PaymentRail: Send + Sync {
    async fn create_transfer(&self, request: &TransferRequest) -> LedgerResult<TransferReceipt>;
}

#[derive(Debug, Clone)]
struct StoredTransfer {
    transfer_id: String,
    recipient: String,
    amount_cents: i64,
}

/// In-memory rail keyed by idempotency key.
///
/// Mirrors provider semantics closely enough for the engine's guarantees to
/// be tested: duplicate keys return the original transfer, and an injected
/// outage makes every call fail until cleared.
pub struct MemoryRail {
    transfers: RwLock<HashMap<String, StoredTransfer>>,
    fail_requests: AtomicBool,
}

impl MemoryRail {
    pub fn new() -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
            fail_requests: AtomicBool::new(false),
        }
    }

    /// Simulate a provider outage. Calls fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.fail_requests.store(failing, Ordering::SeqCst);
    }

    pub async fn transfer_count(&self) -> usize {
        self.transfers.read().await.len()
    }

    pub async fn total_transferred_cents(&self, recipient: &str) -> i64 {
        self.transfers
            .read()
            .await
            .values()
            .filter(|t| t.recipient == recipient)
            .map(|t| t.amount_cents)
            .sum()
    }
}

impl Default for MemoryRail {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentRail for MemoryRail {
    async fn create_transfer(&self, request: &TransferRequest) -> LedgerResult<TransferReceipt> {
        if self.fail_requests.load(Ordering::SeqCst) {
            warn!(key = %request.idempotency_key, "Transfer rail unavailable");
            return Err(LedgerError::Rail("provider unavailable".to_string()));
        }
        if request.amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(request.amount_cents));
        }

        let mut transfers = self.transfers.write().await;
        if let Some(existing) = transfers.get(&request.idempotency_key) {
            debug!(
                key = %request.idempotency_key,
                transfer_id = %existing.transfer_id,
                "Duplicate idempotency key, returning original transfer"
            );
            return Ok(TransferReceipt {
                transfer_id: existing.transfer_id.clone(),
                status: TransferStatus::Duplicate,
            });
        }

        let transfer_id = format!("tr_{}", Uuid::new_v4().simple());
        transfers.insert(
            request.idempotency_key.clone(),
            StoredTransfer {
                transfer_id: transfer_id.clone(),
                recipient: request.recipient.clone(),
                amount_cents: request.amount_cents,
            },
        );
        debug!(
            key = %request.idempotency_key,
            transfer_id = %transfer_id,
            amount_cents = request.amount_cents,
            "Transfer created"
        );

        Ok(TransferReceipt {
            transfer_id,
            status: TransferStatus::Completed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, cents: i64) -> TransferRequest {
        TransferRequest {
            recipient: "creator_1".to_string(),
            amount_cents: cents,
            idempotency_key: key.to_string(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_original() {
        let rail = MemoryRail::new();
        let first = rail.create_transfer(&request("key-1", 500)).await.unwrap();
        let second = rail.create_transfer(&request("key-1", 500)).await.unwrap();

        assert_eq!(first.status, TransferStatus::Completed);
        assert_eq!(second.status, TransferStatus::Duplicate);
        assert_eq!(first.transfer_id, second.transfer_id);
        assert_eq!(rail.transfer_count().await, 1);
    }

    #[tokio::test]
    async fn test_outage_then_retry_with_same_key() {
        let rail = MemoryRail::new();
        rail.set_failing(true);
        assert!(rail.create_transfer(&request("key-2", 500)).await.is_err());

        rail.set_failing(false);
        let receipt = rail.create_transfer(&request("key-2", 500)).await.unwrap();
        assert_eq!(receipt.status, TransferStatus::Completed);
        assert_eq!(rail.transfer_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amounts() {
        let rail = MemoryRail::new();
        assert!(matches!(
            rail.create_transfer(&request("key-3", 0)).await,
            Err(LedgerError::InvalidAmount(0))
        ));
    }
}

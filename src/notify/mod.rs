//! Notification boundary
//!
//! Fire-and-forget. Dispatch failures are logged and dropped; they never
//! roll back a ledger transition or a settlement. Engines call `notify`
//! strictly after their database work has committed.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// One per user per scheduler run, covering every entry released.
    EarningsReleased {
        total_cents: i64,
        entry_count: usize,
    },
    PayoutCompleted {
        amount_cents: i64,
        transfer_id: String,
    },
    PayoutFailed {
        reason: String,
    },
    FraudConfirmed {
        trust_penalty: i64,
        banned: bool,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, event: NotifyEvent) -> LedgerResult<()>;

    /// Out-of-band operator alert (large fraud, fatal inconsistency).
    /// Best-effort like everything else here.
    async fn alert_operators(&self, message: &str, payload: serde_json::Value)
        -> LedgerResult<()>;
}

/// Production default: structured log lines on the notification channel's
/// behalf. A real channel adapter slots in behind the same trait.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: &str, event: NotifyEvent) -> LedgerResult<()> {
        info!(user_id = %user_id, event = ?event, "Notification dispatched");
        Ok(())
    }

    async fn alert_operators(
        &self,
        message: &str,
        payload: serde_json::Value,
    ) -> LedgerResult<()> {
        error!(payload = %payload, "OPERATOR ALERT: {}", message);
        Ok(())
    }
}

/// Recording notifier for tests: captures events, optionally fails every
/// dispatch to prove failures never roll money back.
pub struct MemoryNotifier {
    events: RwLock<VecDeque<(String, NotifyEvent)>>,
    alerts: RwLock<Vec<String>>,
    fail_dispatch: std::sync::atomic::AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(Vec::new()),
            fail_dispatch: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_dispatch
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn events_for(&self, user_id: &str) -> Vec<NotifyEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(u, _)| u == user_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn alert_count(&self) -> usize {
        self.alerts.read().await.len()
    }
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, user_id: &str, event: NotifyEvent) -> LedgerResult<()> {
        if self.fail_dispatch.load(std::sync::atomic::Ordering::SeqCst) {
            warn!(user_id = %user_id, "Notification channel down, dropping event");
            return Err(LedgerError::Rail("notification channel down".to_string()));
        }
        self.events
            .write()
            .await
            .push_back((user_id.to_string(), event));
        Ok(())
    }

    async fn alert_operators(
        &self,
        message: &str,
        _payload: serde_json::Value,
    ) -> LedgerResult<()> {
        self.alerts.write().await.push(message.to_string());
        Ok(())
    }
}

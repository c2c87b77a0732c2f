//! In-memory ledger store
//!
//! Backs tests and rail-less local runs. Every guarded transition and
//! multi-row operation has the same semantics as the Postgres store: the
//! single state lock makes `lock_entries`, `settle_payout`, and
//! `reverse_paid_entry` atomic, and settlement validates the full batch
//! before mutating anything.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::fraud::{FlagStatus, FraudFlag, FraudHistoryRecord};
use crate::ledger::entry::{
    BrandPayoutSettings, CreatorProfile, DeviceBan, EntryStatus, LedgerEntry, PayoutRequest,
    PayoutSource, PayoutStatus, Wallet,
};
use crate::ledger::store::{LedgerStore, NewEntry, Settlement};

#[derive(Debug, Clone)]
pub struct ScoreHistoryRow {
    pub user_id: String,
    pub previous: f64,
    pub current: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<Uuid, LedgerEntry>,
    requests: HashMap<Uuid, PayoutRequest>,
    wallets: HashMap<String, Wallet>,
    wallet_adjustments: Vec<(String, i64, String)>,
    sources: HashMap<String, PayoutSource>,
    brand_settings: HashMap<String, BrandPayoutSettings>,
    profiles: HashMap<String, CreatorProfile>,
    flags: HashMap<Uuid, FraudFlag>,
    fraud_history: Vec<FraudHistoryRecord>,
    device_bans: HashMap<String, DeviceBan>,
    score_history: Vec<ScoreHistoryRow>,
    job_locks: HashSet<String>,
}

pub struct MemoryLedgerStore {
    state: RwLock<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }

    // Inspection helpers for tests.

    pub async fn score_history_for(&self, user_id: &str) -> Vec<ScoreHistoryRow> {
        self.state
            .read()
            .await
            .score_history
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn fraud_history_for(&self, user_id: &str) -> Vec<FraudHistoryRecord> {
        self.state
            .read()
            .await
            .fraud_history
            .iter()
            .filter(|r| r.creator_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn device_ban(&self, fingerprint: &str) -> Option<DeviceBan> {
        self.state.read().await.device_bans.get(fingerprint).cloned()
    }

    pub async fn adjustments_for(&self, user_id: &str) -> Vec<(i64, String)> {
        self.state
            .read()
            .await
            .wallet_adjustments
            .iter()
            .filter(|(u, _, _)| u == user_id)
            .map(|(_, cents, reason)| (*cents, reason.clone()))
            .collect()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wallet_mut<'a>(wallets: &'a mut HashMap<String, Wallet>, user_id: &str) -> &'a mut Wallet {
    wallets.entry(user_id.to_string()).or_insert_with(|| Wallet {
        user_id: user_id.to_string(),
        balance_cents: 0,
        total_earned_cents: 0,
        updated_at: Utc::now(),
    })
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn create_entry(&self, new: NewEntry) -> LedgerResult<LedgerEntry> {
        if new.amount_cents <= 0 {
            return Err(LedgerError::InvalidAmount(new.amount_cents));
        }
        let now = Utc::now();
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            source_type: new.source_type,
            source_id: new.source_id,
            accrued_cents: new.amount_cents,
            paid_cents: 0,
            status: EntryStatus::Held,
            release_at: new.release_at,
            cleared_at: None,
            last_paid_at: None,
            payout_request_id: None,
            clawback_reason: None,
            clawed_back_at: None,
            views_snapshot: new.views_snapshot,
            milestone_paid: false,
            created_at: now,
            updated_at: now,
        };
        self.state
            .write()
            .await
            .entries
            .insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn entry(&self, id: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.state.read().await.entries.get(&id).cloned())
    }

    async fn entries_for_user(&self, user_id: &str) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self
            .state
            .read()
            .await
            .entries
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn accrue(
        &self,
        entry_id: Uuid,
        delta_cents: i64,
        views_snapshot: i64,
        milestone_hit: bool,
    ) -> LedgerResult<()> {
        if delta_cents < 0 {
            return Err(LedgerError::InvalidAmount(delta_cents));
        }
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| LedgerError::NotFound(format!("entry {}", entry_id)))?;
        match entry.status {
            EntryStatus::Held | EntryStatus::Locked => {}
            EntryStatus::Paid | EntryStatus::ClawedBack => return Err(LedgerError::AlreadyPaid),
        }
        entry.accrued_cents += delta_cents;
        entry.views_snapshot = views_snapshot.max(entry.views_snapshot);
        entry.milestone_paid |= milestone_hit;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn held_entries_due(&self, now: DateTime<Utc>) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self
            .state
            .read()
            .await
            .entries
            .values()
            .filter(|e| {
                e.status == EntryStatus::Held
                    && e.release_at.map(|at| at <= now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn held_entries_for_ended_sources(&self) -> LedgerResult<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|e| {
                e.status == EntryStatus::Held
                    && state
                        .sources
                        .get(&e.source_id)
                        .map(|s| s.lifecycle.has_ended())
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn lock_entries(&self, ids: &[Uuid]) -> LedgerResult<usize> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let mut locked = 0;
        for id in ids {
            if let Some(entry) = state.entries.get_mut(id) {
                // Non-held entries are skipped, not errored; retried runs
                // must stay idempotent.
                if entry.status == EntryStatus::Held {
                    entry.status = EntryStatus::Locked;
                    entry.cleared_at = Some(now);
                    entry.updated_at = now;
                    locked += 1;
                }
            }
        }
        Ok(locked)
    }

    async fn mark_paid(&self, id: Uuid, paid_cents: i64, request_id: Uuid) -> LedgerResult<()> {
        if paid_cents <= 0 {
            return Err(LedgerError::InvalidAmount(paid_cents));
        }
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("entry {}", id)))?;

        // A clawed-back entry has nothing payable left.
        let remaining = match entry.status {
            EntryStatus::ClawedBack => 0,
            _ => entry.remaining_cents(),
        };
        if paid_cents > remaining {
            return Err(LedgerError::Overpayment {
                attempted: paid_cents,
                remaining,
            });
        }

        let now = Utc::now();
        entry.paid_cents += paid_cents;
        entry.last_paid_at = Some(now);
        entry.payout_request_id = Some(request_id);
        entry.updated_at = now;
        if entry.paid_cents == entry.accrued_cents {
            entry.status = EntryStatus::Paid;
        }
        Ok(())
    }

    async fn clawback_entry(&self, id: Uuid, reason: &str) -> LedgerResult<LedgerEntry> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("entry {}", id)))?;
        match entry.status {
            EntryStatus::Paid => return Err(LedgerError::AlreadyPaid),
            EntryStatus::ClawedBack => return Ok(entry.clone()),
            EntryStatus::Held | EntryStatus::Locked => {}
        }
        let now = Utc::now();
        entry.status = EntryStatus::ClawedBack;
        entry.clawback_reason = Some(reason.to_string());
        entry.clawed_back_at = Some(now);
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn reverse_paid_entry(&self, id: Uuid, reason: &str) -> LedgerResult<i64> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("entry {}", id)))?;
        if entry.status != EntryStatus::Paid {
            return Err(LedgerError::NotFound(format!("paid entry {}", id)));
        }

        let reversed = entry.paid_cents;
        let user_id = entry.user_id.clone();
        let source_id = entry.source_id.clone();
        entry.status = EntryStatus::ClawedBack;
        entry.clawback_reason = Some(reason.to_string());
        entry.clawed_back_at = Some(now);
        entry.updated_at = now;

        let wallet = wallet_mut(&mut state.wallets, &user_id);
        wallet.balance_cents -= reversed;
        wallet.total_earned_cents = (wallet.total_earned_cents - reversed).max(0);
        wallet.updated_at = now;
        state
            .wallet_adjustments
            .push((user_id, -reversed, reason.to_string()));

        if let Some(source) = state.sources.get_mut(&source_id) {
            source.budget_used_cents = (source.budget_used_cents - reversed).max(0);
        }
        Ok(reversed)
    }

    async fn entries_for_request(&self, request_id: Uuid) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self
            .state
            .read()
            .await
            .entries
            .values()
            .filter(|e| e.payout_request_id == Some(request_id))
            .cloned()
            .collect())
    }

    async fn source(&self, source_id: &str) -> LedgerResult<Option<PayoutSource>> {
        Ok(self.state.read().await.sources.get(source_id).cloned())
    }

    async fn upsert_source(&self, source: &PayoutSource) -> LedgerResult<()> {
        self.state
            .write()
            .await
            .sources
            .insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn brand_settings(&self, brand_id: &str) -> LedgerResult<Option<BrandPayoutSettings>> {
        Ok(self.state.read().await.brand_settings.get(brand_id).cloned())
    }

    async fn upsert_brand_settings(&self, settings: &BrandPayoutSettings) -> LedgerResult<()> {
        self.state
            .write()
            .await
            .brand_settings
            .insert(settings.brand_id.clone(), settings.clone());
        Ok(())
    }

    async fn open_payout_request(
        &self,
        user_id: &str,
        clearing_ends_at: DateTime<Utc>,
    ) -> LedgerResult<PayoutRequest> {
        let mut state = self.state.write().await;
        let unassigned: Vec<(Uuid, i64)> = state
            .entries
            .values()
            .filter(|e| {
                e.user_id == user_id
                    && e.status == EntryStatus::Locked
                    && e.payout_request_id.is_none()
            })
            .map(|e| (e.id, e.remaining_cents()))
            .collect();
        if unassigned.is_empty() {
            return Err(LedgerError::NothingToSettle);
        }

        let total: i64 = unassigned.iter().map(|(_, cents)| cents).sum();
        let request = PayoutRequest {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            amount_cents: total,
            status: PayoutStatus::Pending,
            clearing_ends_at,
            approved_by: None,
            processed_at: None,
            processed_by: None,
            transfer_id: None,
            failure_reason: None,
            requested_at: Utc::now(),
        };
        for (id, _) in &unassigned {
            if let Some(entry) = state.entries.get_mut(id) {
                entry.payout_request_id = Some(request.id);
            }
        }
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn payout_request(&self, id: Uuid) -> LedgerResult<Option<PayoutRequest>> {
        Ok(self.state.read().await.requests.get(&id).cloned())
    }

    async fn begin_processing(&self, id: Uuid) -> LedgerResult<PayoutRequest> {
        let mut state = self.state.write().await;
        let request = state
            .requests
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("payout request {}", id)))?;
        match request.status {
            PayoutStatus::Pending | PayoutStatus::Approved | PayoutStatus::Failed => {
                request.status = PayoutStatus::Processing;
                Ok(request.clone())
            }
            PayoutStatus::Processing | PayoutStatus::Completed => {
                Err(LedgerError::AlreadyProcessing)
            }
        }
    }

    async fn settle_payout(&self, settlement: &Settlement) -> LedgerResult<()> {
        let mut state = self.state.write().await;

        // Validate the whole batch before touching anything.
        let request = state
            .requests
            .get(&settlement.request_id)
            .ok_or_else(|| LedgerError::NotFound(format!("payout request {}", settlement.request_id)))?;
        if request.status != PayoutStatus::Processing {
            return Err(LedgerError::Inconsistency(format!(
                "settle on request in state {}",
                request.status.as_str()
            )));
        }
        let mut checked_total = 0i64;
        for (entry_id, cents) in &settlement.entry_payments {
            let entry = state
                .entries
                .get(entry_id)
                .ok_or_else(|| LedgerError::NotFound(format!("entry {}", entry_id)))?;
            if entry.status != EntryStatus::Locked {
                return Err(LedgerError::Inconsistency(format!(
                    "entry {} not locked at settlement",
                    entry_id
                )));
            }
            if *cents > entry.remaining_cents() {
                return Err(LedgerError::Overpayment {
                    attempted: *cents,
                    remaining: entry.remaining_cents(),
                });
            }
            checked_total += cents;
        }
        if checked_total != settlement.total_cents {
            return Err(LedgerError::Inconsistency(format!(
                "entry payments sum {} != settlement total {}",
                checked_total, settlement.total_cents
            )));
        }

        // Apply. One lock, so all-or-nothing from every reader's view.
        let now = Utc::now();
        for (entry_id, cents) in &settlement.entry_payments {
            if let Some(entry) = state.entries.get_mut(entry_id) {
                entry.paid_cents += cents;
                entry.status = EntryStatus::Paid;
                entry.last_paid_at = Some(now);
                entry.updated_at = now;
            }
        }

        let wallet = wallet_mut(&mut state.wallets, &settlement.user_id);
        wallet.balance_cents += settlement.total_cents;
        wallet.total_earned_cents += settlement.total_cents;
        wallet.updated_at = now;

        for (source_id, cents) in &settlement.budget_charges {
            if let Some(source) = state.sources.get_mut(source_id) {
                source.budget_used_cents += cents;
            }
        }

        if let Some(request) = state.requests.get_mut(&settlement.request_id) {
            request.status = PayoutStatus::Completed;
            request.amount_cents = settlement.total_cents;
            request.processed_at = Some(now);
            request.processed_by = Some(settlement.processed_by.clone());
            request.transfer_id = Some(settlement.transfer_id.clone());
        }
        Ok(())
    }

    async fn fail_payout(&self, id: Uuid, reason: &str) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let request = state
            .requests
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("payout request {}", id)))?;
        if request.status == PayoutStatus::Completed {
            return Err(LedgerError::Inconsistency(
                "attempted to fail a completed payout".to_string(),
            ));
        }
        request.status = PayoutStatus::Failed;
        request.failure_reason = Some(reason.to_string());
        Ok(())
    }

    async fn approve_payout(&self, id: Uuid, approved_by: &str) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let request = state
            .requests
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("payout request {}", id)))?;
        match request.status {
            PayoutStatus::Pending | PayoutStatus::Failed => {
                request.status = PayoutStatus::Approved;
                request.approved_by = Some(approved_by.to_string());
                Ok(())
            }
            PayoutStatus::Approved => Ok(()),
            PayoutStatus::Processing => Err(LedgerError::AlreadyProcessing),
            PayoutStatus::Completed => Err(LedgerError::AlreadyPaid),
        }
    }

    async fn requests_ready_to_settle(
        &self,
        now: DateTime<Utc>,
    ) -> LedgerResult<Vec<PayoutRequest>> {
        Ok(self
            .state
            .read()
            .await
            .requests
            .values()
            .filter(|r| match r.status {
                PayoutStatus::Pending => r.clearing_ends_at <= now,
                PayoutStatus::Approved => true,
                _ => false,
            })
            .cloned()
            .collect())
    }

    async fn completed_payout_count(&self, user_id: &str) -> LedgerResult<i64> {
        Ok(self
            .state
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.user_id == user_id && r.status == PayoutStatus::Completed)
            .count() as i64)
    }

    async fn wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        Ok(self
            .state
            .read()
            .await
            .wallets
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| Wallet {
                user_id: user_id.to_string(),
                balance_cents: 0,
                total_earned_cents: 0,
                updated_at: Utc::now(),
            }))
    }

    async fn adjust_wallet(
        &self,
        user_id: &str,
        delta_cents: i64,
        reason: &str,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let wallet = wallet_mut(&mut state.wallets, user_id);
        wallet.balance_cents += delta_cents;
        if delta_cents > 0 {
            wallet.total_earned_cents += delta_cents;
        }
        wallet.updated_at = Utc::now();
        state
            .wallet_adjustments
            .push((user_id.to_string(), delta_cents, reason.to_string()));
        Ok(())
    }

    async fn profile(&self, user_id: &str) -> LedgerResult<Option<CreatorProfile>> {
        Ok(self.state.read().await.profiles.get(user_id).cloned())
    }

    async fn upsert_profile(&self, profile: &CreatorProfile) -> LedgerResult<()> {
        self.state
            .write()
            .await
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn is_admin(&self, user_id: &str) -> LedgerResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .profiles
            .get(user_id)
            .map(|p| p.is_admin)
            .unwrap_or(false))
    }

    async fn insert_fraud_flag(&self, flag: &FraudFlag) -> LedgerResult<()> {
        self.state
            .write()
            .await
            .flags
            .insert(flag.id, flag.clone());
        Ok(())
    }

    async fn fraud_flag(&self, id: Uuid) -> LedgerResult<Option<FraudFlag>> {
        Ok(self.state.read().await.flags.get(&id).cloned())
    }

    async fn open_flags_for_user(&self, user_id: &str) -> LedgerResult<Vec<FraudFlag>> {
        Ok(self
            .state
            .read()
            .await
            .flags
            .values()
            .filter(|f| f.creator_id == user_id && f.status == FlagStatus::Flagged)
            .cloned()
            .collect())
    }

    async fn resolve_fraud_flag(
        &self,
        id: Uuid,
        resolution: FlagStatus,
        resolved_by: &str,
        trust_penalty: i64,
    ) -> LedgerResult<bool> {
        let mut state = self.state.write().await;
        let flag = state
            .flags
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("fraud flag {}", id)))?;
        if flag.status != FlagStatus::Flagged {
            return Ok(false);
        }
        flag.status = resolution;
        flag.resolved_at = Some(Utc::now());
        flag.resolved_by = Some(resolved_by.to_string());
        if resolution == FlagStatus::Confirmed {
            flag.trust_penalty = Some(trust_penalty);
        }
        Ok(true)
    }

    async fn apply_fraud_penalty(
        &self,
        user_id: &str,
        fraud_flag_count: i64,
        permanent: bool,
        banned_at: Option<DateTime<Utc>>,
        last_fraud_at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::NotFound(format!("creator {}", user_id)))?;
        profile.fraud_flag_count = fraud_flag_count;
        profile.fraud_flag_permanent = permanent;
        profile.banned_at = banned_at;
        profile.last_fraud_at = Some(last_fraud_at);
        Ok(())
    }

    async fn append_fraud_history(&self, record: &FraudHistoryRecord) -> LedgerResult<()> {
        self.state.write().await.fraud_history.push(record.clone());
        Ok(())
    }

    async fn upsert_device_ban(&self, ban: &DeviceBan) -> LedgerResult<()> {
        self.state
            .write()
            .await
            .device_bans
            .insert(ban.fingerprint.clone(), ban.clone());
        Ok(())
    }

    async fn store_trust_score(&self, user_id: &str, score: f64) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let profile = state
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::NotFound(format!("creator {}", user_id)))?;
        profile.trust_score = score;
        Ok(())
    }

    async fn append_score_history(
        &self,
        user_id: &str,
        previous: f64,
        current: f64,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.state.write().await.score_history.push(ScoreHistoryRow {
            user_id: user_id.to_string(),
            previous,
            current,
            recorded_at: at,
        });
        Ok(())
    }

    async fn all_creator_ids(&self) -> LedgerResult<Vec<String>> {
        Ok(self.state.read().await.profiles.keys().cloned().collect())
    }

    async fn try_acquire_job_lock(&self, job: &str) -> LedgerResult<bool> {
        Ok(self.state.write().await.job_locks.insert(job.to_string()))
    }

    async fn release_job_lock(&self, job: &str) -> LedgerResult<()> {
        self.state.write().await.job_locks.remove(job);
        Ok(())
    }
}

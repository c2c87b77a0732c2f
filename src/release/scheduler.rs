//! Release scheduler
//!
//! Periodic batch job that promotes held entries to locked once their
//! release conditions are met. Two release paths exist and are idempotent
//! against each other: threshold-based release for entries whose window has
//! elapsed, and unconditional release for entries whose source has ended.
//! Groups `(user, source)` release atomically or not at all; a partial
//! threshold is never released piecemeal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::ledger::entry::LedgerEntry;
use crate::ledger::store::LedgerStore;
use crate::notify::{Notifier, NotifyEvent};

pub const RELEASE_JOB_NAME: &str = "release_scheduler";

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReleaseRunSummary {
    pub scanned: usize,
    pub groups_evaluated: usize,
    pub groups_released: usize,
    pub entries_released: usize,
    pub entries_still_held: usize,
    pub users_notified: usize,
    /// True when another run held the job lock and this one did nothing.
    pub skipped_lock_held: bool,
}

pub struct ReleaseScheduler {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
}

impl ReleaseScheduler {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// One scheduler pass. Safe to invoke repeatedly; a second pass over an
    /// already-released set is a no-op, and concurrent passes are excluded
    /// by the job lock.
    pub async fn run_once(&self, now: DateTime<Utc>) -> LedgerResult<ReleaseRunSummary> {
        if !self.store.try_acquire_job_lock(RELEASE_JOB_NAME).await? {
            info!("Release run skipped, another run holds the lock");
            return Ok(ReleaseRunSummary {
                skipped_lock_held: true,
                ..Default::default()
            });
        }

        let result = self.run_locked(now).await;

        if let Err(e) = self.store.release_job_lock(RELEASE_JOB_NAME).await {
            warn!(error = %e, "Failed to release scheduler job lock");
        }
        result
    }

    async fn run_locked(&self, now: DateTime<Utc>) -> LedgerResult<ReleaseRunSummary> {
        let mut summary = ReleaseRunSummary::default();
        // (total cents, entry count) released per user this run
        let mut released_per_user: HashMap<String, (i64, usize)> = HashMap::new();
        // Entries handled by the source-ended path; the grouped path must
        // not touch them again.
        let mut already_released: HashSet<Uuid> = HashSet::new();

        // Source-ended entries release unconditionally, threshold ignored.
        let ended = self.store.held_entries_for_ended_sources().await?;
        summary.scanned += ended.len();
        for (key, group) in group_by_user_source(&ended) {
            summary.groups_evaluated += 1;
            self.release_group(&key.0, &group, &mut summary, &mut released_per_user)
                .await?;
            already_released.extend(group.iter().map(|e| e.id));
        }

        // Time-based release, gated on the source's minimum threshold.
        let due = self.store.held_entries_due(now).await?;
        let due: Vec<LedgerEntry> = due
            .into_iter()
            .filter(|e| !already_released.contains(&e.id))
            .collect();
        summary.scanned += due.len();

        for ((user_id, source_id), group) in group_by_user_source(&due) {
            summary.groups_evaluated += 1;

            let pending: i64 = group.iter().map(|e| e.remaining_cents()).sum();
            match self.resolve_release(&source_id, pending).await? {
                ReleaseDecision::Release => {
                    self.release_group(&user_id, &group, &mut summary, &mut released_per_user)
                        .await?;
                }
                ReleaseDecision::Hold { threshold } => {
                    debug!(
                        user_id = %user_id,
                        source_id = %source_id,
                        pending_cents = pending,
                        threshold_cents = threshold,
                        "Group below threshold, holding"
                    );
                    summary.entries_still_held += group.len();
                }
                ReleaseDecision::Skip => {
                    summary.entries_still_held += group.len();
                }
            }
        }

        // One notification per user per run, strictly after the ledger
        // work. Failures are logged and dropped.
        for (user_id, (total_cents, entry_count)) in &released_per_user {
            let event = NotifyEvent::EarningsReleased {
                total_cents: *total_cents,
                entry_count: *entry_count,
            };
            if let Err(e) = self.notifier.notify(user_id, event).await {
                warn!(user_id = %user_id, error = %e, "Release notification failed, not rolling back");
            }
        }
        summary.users_notified = released_per_user.len();

        info!(
            scanned = summary.scanned,
            groups = summary.groups_evaluated,
            released = summary.entries_released,
            still_held = summary.entries_still_held,
            notified = summary.users_notified,
            "Release run complete"
        );
        Ok(summary)
    }

    /// Threshold resolution: boost-level override, else brand default,
    /// else zero. A source that ended between scans releases regardless.
    async fn resolve_release(&self, source_id: &str, pending: i64) -> LedgerResult<ReleaseDecision> {
        let source = match self.store.source(source_id).await? {
            Some(s) => s,
            None => {
                // No source metadata means no threshold can be resolved.
                // Hold the money and let an operator repair the record.
                warn!(source_id = %source_id, "Source metadata missing, holding group");
                return Ok(ReleaseDecision::Skip);
            }
        };

        if source.lifecycle.has_ended() {
            return Ok(ReleaseDecision::Release);
        }

        let threshold = match source.min_payout_cents {
            Some(t) => t,
            None => self
                .store
                .brand_settings(&source.brand_id)
                .await?
                .map(|s| s.default_min_payout_cents)
                .unwrap_or(0),
        };

        if pending >= threshold {
            Ok(ReleaseDecision::Release)
        } else {
            Ok(ReleaseDecision::Hold { threshold })
        }
    }

    async fn release_group(
        &self,
        user_id: &str,
        group: &[LedgerEntry],
        summary: &mut ReleaseRunSummary,
        released_per_user: &mut HashMap<String, (i64, usize)>,
    ) -> LedgerResult<()> {
        let ids: Vec<Uuid> = group.iter().map(|e| e.id).collect();
        let locked = self.store.lock_entries(&ids).await?;
        if locked == 0 {
            // Everything was already past held; a retried run lands here.
            return Ok(());
        }

        summary.groups_released += 1;
        summary.entries_released += locked;

        let total: i64 = group.iter().map(|e| e.remaining_cents()).sum();
        let tally = released_per_user.entry(user_id.to_string()).or_insert((0, 0));
        tally.0 += total;
        tally.1 += locked;
        Ok(())
    }
}

enum ReleaseDecision {
    Release,
    Hold { threshold: i64 },
    Skip,
}

fn group_by_user_source(entries: &[LedgerEntry]) -> Vec<((String, String), Vec<LedgerEntry>)> {
    let mut groups: HashMap<(String, String), Vec<LedgerEntry>> = HashMap::new();
    for entry in entries {
        groups
            .entry((entry.user_id.clone(), entry.source_id.clone()))
            .or_default()
            .push(entry.clone());
    }
    groups.into_iter().collect()
}

//! Integration tests for the clearinghouse
//!
//! These tests verify end-to-end flows across the real engines: hold and
//! release, payout settlement over the rail, clawback and reversal, fraud
//! confirmation, screening, and trust recalculation. The store, rail, and
//! notification channel are in-memory doubles; everything else is the
//! production code path.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use clearinghouse::notify::NotifyEvent;
use clearinghouse::release::RELEASE_JOB_NAME;
use clearinghouse::settlement::SETTLEMENT_SWEEP_JOB;
use clearinghouse::{
    BrandPayoutSettings, CreatorProfile, EntryStatus, FlagStatus, FraudFlag, FraudPenaltyEngine,
    FraudType, LedgerEntry, LedgerError, LedgerStore, MemoryLedgerStore, MemoryNotifier,
    MemoryRail, NewEntry, PayoutRequest, PayoutScreen, PayoutSource, PayoutStatus,
    ReleaseScheduler, ScreenVerdict, SettlementEngine, SourceLifecycle, SourceType, TrustLevel,
    TrustScoreCalculator,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Engines wired over shared in-memory doubles.
struct Rig {
    store: Arc<MemoryLedgerStore>,
    rail: Arc<MemoryRail>,
    notifier: Arc<MemoryNotifier>,
    settlement: SettlementEngine,
    scheduler: ReleaseScheduler,
}

/// Rig whose clearing window has already elapsed, so settlement is never
/// blocked on time unless a test asks for it.
fn rig() -> Rig {
    rig_with_clearing(Duration::zero())
}

fn rig_with_clearing(clearing: Duration) -> Rig {
    let store = Arc::new(MemoryLedgerStore::new());
    let rail = Arc::new(MemoryRail::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let settlement =
        SettlementEngine::new(store.clone(), rail.clone(), notifier.clone(), clearing);
    let scheduler = ReleaseScheduler::new(store.clone(), notifier.clone());
    Rig {
        store,
        rail,
        notifier,
        settlement,
        scheduler,
    }
}

/// Creator profile with a configurable age and cached trust score.
fn creator(user_id: &str, age_days: i64, trust_score: f64) -> CreatorProfile {
    CreatorProfile {
        user_id: user_id.to_string(),
        created_at: Utc::now() - Duration::days(age_days),
        approved_count: 20,
        rejected_count: 0,
        fraud_flag_count: 0,
        fraud_flag_permanent: false,
        last_fraud_at: None,
        banned_at: None,
        device_fingerprint: None,
        trust_score,
        is_admin: false,
    }
}

fn admin(user_id: &str) -> CreatorProfile {
    let mut profile = creator(user_id, 365, 90.0);
    profile.is_admin = true;
    profile
}

/// Active campaign source with a budget nothing here will exhaust.
fn campaign(id: &str, brand_id: &str, min_payout_cents: Option<i64>) -> PayoutSource {
    PayoutSource {
        id: id.to_string(),
        source_type: SourceType::Campaign,
        brand_id: brand_id.to_string(),
        lifecycle: SourceLifecycle::Active,
        min_payout_cents,
        budget_cents: 10_000_000,
        budget_used_cents: 0,
    }
}

/// Held entry whose release time is `released_for` in the past.
async fn held_entry(
    store: &MemoryLedgerStore,
    user_id: &str,
    source_id: &str,
    amount_cents: i64,
    released_for: Duration,
) -> LedgerEntry {
    store
        .create_entry(NewEntry {
            user_id: user_id.to_string(),
            source_type: SourceType::Campaign,
            source_id: source_id.to_string(),
            amount_cents,
            release_at: Some(Utc::now() - released_for),
            views_snapshot: 0,
        })
        .await
        .unwrap()
}

/// Release due entries, open a payout request, settle it. Returns the
/// settled total.
async fn settle_everything(rig: &Rig, user_id: &str) -> i64 {
    rig.scheduler.run_once(Utc::now()).await.unwrap();
    let request = rig.settlement.open_request(user_id).await.unwrap();
    rig.settlement
        .complete_payout(request.id, "ops_test")
        .await
        .unwrap()
}

// ============================================================================
// Hold and Release
// ============================================================================

mod release_flow {
    use super::*;

    #[tokio::test]
    async fn test_held_earnings_release_and_settle_end_to_end() {
        let rig = rig();
        rig.store
            .upsert_profile(&creator("creator_1", 120, 80.0))
            .await
            .unwrap();
        rig.store
            .upsert_source(&campaign("camp_1", "brand_1", None))
            .await
            .unwrap();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 5_000, Duration::hours(1)).await;

        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary.entries_released, 1, "due entry should release");
        assert_eq!(summary.users_notified, 1);

        let locked = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(locked.status, EntryStatus::Locked);
        assert!(locked.cleared_at.is_some(), "release must stamp cleared_at");

        let request = rig.settlement.open_request("creator_1").await.unwrap();
        assert_eq!(request.amount_cents, 5_000);
        assert_eq!(request.status, PayoutStatus::Pending);

        let paid = rig
            .settlement
            .complete_payout(request.id, "ops_1")
            .await
            .unwrap();
        assert_eq!(paid, 5_000);

        let entry = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Paid);
        assert_eq!(entry.remaining_cents(), 0);

        let wallet = rig.store.wallet("creator_1").await.unwrap();
        assert_eq!(wallet.balance_cents, 5_000);
        assert_eq!(wallet.total_earned_cents, 5_000);

        assert_eq!(rig.rail.transfer_count().await, 1);
        assert_eq!(rig.rail.total_transferred_cents("creator_1").await, 5_000);

        let request = rig
            .store
            .payout_request(request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, PayoutStatus::Completed);
        assert!(request.transfer_id.is_some());

        let source = rig.store.source("camp_1").await.unwrap().unwrap();
        assert_eq!(
            source.budget_used_cents, 5_000,
            "settlement charges the source budget"
        );

        let events = rig.notifier.events_for("creator_1").await;
        assert!(events.contains(&NotifyEvent::EarningsReleased {
            total_cents: 5_000,
            entry_count: 1,
        }));
        assert!(matches!(
            events.last(),
            Some(NotifyEvent::PayoutCompleted {
                amount_cents: 5_000,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_group_holds_below_threshold_and_releases_together() {
        let rig = rig();
        rig.store
            .upsert_source(&campaign("camp_t", "brand_1", Some(3_000)))
            .await
            .unwrap();
        held_entry(&rig.store, "creator_1", "camp_t", 1_000, Duration::hours(2)).await;
        held_entry(&rig.store, "creator_1", "camp_t", 1_500, Duration::hours(1)).await;

        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(
            summary.entries_released, 0,
            "2500 pending is under the 3000 threshold"
        );
        assert_eq!(summary.entries_still_held, 2);
        assert_eq!(rig.notifier.event_count().await, 0);

        held_entry(&rig.store, "creator_1", "camp_t", 1_000, Duration::hours(1)).await;

        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(
            summary.entries_released, 3,
            "crossing the threshold releases the whole group"
        );
        assert_eq!(summary.groups_released, 1);

        let events = rig.notifier.events_for("creator_1").await;
        assert_eq!(
            events,
            vec![NotifyEvent::EarningsReleased {
                total_cents: 3_500,
                entry_count: 3,
            }]
        );
    }

    #[tokio::test]
    async fn test_brand_default_threshold_applies_without_override() {
        let rig = rig();
        rig.store
            .upsert_source(&campaign("camp_b", "brand_2", None))
            .await
            .unwrap();
        rig.store
            .upsert_brand_settings(&BrandPayoutSettings {
                brand_id: "brand_2".to_string(),
                default_min_payout_cents: 2_000,
                clearing_period_days: 7,
            })
            .await
            .unwrap();
        held_entry(&rig.store, "creator_1", "camp_b", 1_500, Duration::hours(1)).await;

        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary.entries_released, 0);

        held_entry(&rig.store, "creator_1", "camp_b", 600, Duration::hours(1)).await;
        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary.entries_released, 2);
    }

    #[tokio::test]
    async fn test_ended_source_releases_regardless_of_threshold_and_time() {
        let rig = rig();
        let mut source = campaign("camp_done", "brand_1", Some(100_000));
        source.lifecycle = SourceLifecycle::Completed;
        rig.store.upsert_source(&source).await.unwrap();

        // Release time still a week out; the source ending overrides it.
        let entry = rig
            .store
            .create_entry(NewEntry {
                user_id: "creator_1".to_string(),
                source_type: SourceType::Campaign,
                source_id: "camp_done".to_string(),
                amount_cents: 500,
                release_at: Some(Utc::now() + Duration::days(7)),
                views_snapshot: 0,
            })
            .await
            .unwrap();

        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary.entries_released, 1);

        let entry = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Locked);
    }

    #[tokio::test]
    async fn test_rerun_releases_nothing_new() {
        let rig = rig();
        rig.store
            .upsert_source(&campaign("camp_1", "brand_1", None))
            .await
            .unwrap();
        held_entry(&rig.store, "creator_1", "camp_1", 2_000, Duration::hours(1)).await;

        let first = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(first.entries_released, 1);

        let second = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(second.entries_released, 0);
        assert_eq!(second.scanned, 0, "locked entries leave the held scan set");
        assert_eq!(
            rig.notifier.event_count().await,
            1,
            "no duplicate release notification"
        );
    }

    #[tokio::test]
    async fn test_missing_source_metadata_holds_the_money() {
        let rig = rig();
        // No source row for camp_ghost; no threshold can be resolved.
        held_entry(
            &rig.store,
            "creator_1",
            "camp_ghost",
            9_000,
            Duration::hours(1),
        )
        .await;

        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary.entries_released, 0);
        assert_eq!(summary.entries_still_held, 1);
    }

    #[tokio::test]
    async fn test_concurrent_run_skips_on_job_lock() {
        let rig = rig();
        assert!(rig
            .store
            .try_acquire_job_lock(RELEASE_JOB_NAME)
            .await
            .unwrap());

        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert!(summary.skipped_lock_held);
        assert_eq!(summary.entries_released, 0);
    }
}

// ============================================================================
// Payout Settlement
// ============================================================================

mod settlement {
    use super::*;

    /// Entry released and bundled into an open request, ready to settle.
    async fn locked_request(rig: &Rig, user_id: &str, cents: i64) -> PayoutRequest {
        rig.store
            .upsert_source(&campaign("camp_s", "brand_1", None))
            .await
            .unwrap();
        held_entry(&rig.store, user_id, "camp_s", cents, Duration::hours(1)).await;
        rig.scheduler.run_once(Utc::now()).await.unwrap();
        rig.settlement.open_request(user_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_retried_settlement_is_a_no_op() {
        let rig = rig();
        let request = locked_request(&rig, "creator_1", 7_500).await;

        let first = rig
            .settlement
            .complete_payout(request.id, "ops_1")
            .await
            .unwrap();
        let second = rig
            .settlement
            .complete_payout(request.id, "ops_1")
            .await
            .unwrap();
        assert_eq!(first, 7_500);
        assert_eq!(second, 7_500, "retry reports the settled amount");

        assert_eq!(rig.rail.transfer_count().await, 1, "one live transfer only");
        let wallet = rig.store.wallet("creator_1").await.unwrap();
        assert_eq!(wallet.balance_cents, 7_500, "wallet credited exactly once");
    }

    #[tokio::test]
    async fn test_rail_outage_fails_request_then_retry_succeeds() {
        let rig = rig();
        let request = locked_request(&rig, "creator_1", 7_500).await;

        rig.rail.set_failing(true);
        let err = rig
            .settlement
            .complete_payout(request.id, "ops_1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rail(_)));

        let failed = rig
            .store
            .payout_request(request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, PayoutStatus::Failed);
        assert!(failed.failure_reason.is_some());
        assert_eq!(
            rig.store.wallet("creator_1").await.unwrap().balance_cents,
            0,
            "no money moves on a failed transfer"
        );
        let events = rig.notifier.events_for("creator_1").await;
        assert!(events
            .iter()
            .any(|e| matches!(e, NotifyEvent::PayoutFailed { .. })));

        rig.rail.set_failing(false);
        let paid = rig
            .settlement
            .complete_payout(request.id, "ops_1")
            .await
            .unwrap();
        assert_eq!(paid, 7_500);
        assert_eq!(
            rig.rail.transfer_count().await,
            1,
            "retry reuses the derived idempotency key"
        );
        let done = rig
            .store
            .payout_request(request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, PayoutStatus::Completed);
    }

    #[tokio::test]
    async fn test_clearing_window_blocks_until_elapsed_or_approved() {
        let rig = rig_with_clearing(Duration::days(7));
        rig.store.upsert_profile(&admin("admin_1")).await.unwrap();
        let request = locked_request(&rig, "creator_1", 4_000).await;

        let err = rig
            .settlement
            .complete_payout(request.id, "ops_1")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ClearingNotElapsed));

        rig.settlement.approve(request.id, "admin_1").await.unwrap();
        let paid = rig
            .settlement
            .complete_payout(request.id, "ops_1")
            .await
            .unwrap();
        assert_eq!(paid, 4_000);
    }

    #[tokio::test]
    async fn test_approval_requires_admin() {
        let rig = rig_with_clearing(Duration::days(7));
        rig.store
            .upsert_profile(&creator("creator_2", 40, 75.0))
            .await
            .unwrap();
        let request = locked_request(&rig, "creator_1", 4_000).await;

        let err = rig
            .settlement
            .approve(request.id, "creator_2")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized));
        let err = rig
            .settlement
            .approve(request.id, "nobody")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized));
    }

    #[tokio::test]
    async fn test_in_flight_request_rejects_second_settle() {
        let rig = rig();
        let request = locked_request(&rig, "creator_1", 4_000).await;
        rig.store.begin_processing(request.id).await.unwrap();

        let err = rig
            .settlement
            .complete_payout(request.id, "ops_2")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyProcessing));
    }

    #[tokio::test]
    async fn test_open_request_needs_locked_entries() {
        let rig = rig();
        let err = rig.settlement.open_request("creator_1").await.unwrap_err();
        assert!(matches!(err, LedgerError::NothingToSettle));
    }

    #[tokio::test]
    async fn test_notification_outage_never_rolls_back_money() {
        let rig = rig();
        rig.notifier.set_failing(true);
        let request = locked_request(&rig, "creator_1", 4_000).await;

        let paid = rig
            .settlement
            .complete_payout(request.id, "ops_1")
            .await
            .unwrap();
        assert_eq!(paid, 4_000);
        assert_eq!(
            rig.store.wallet("creator_1").await.unwrap().balance_cents,
            4_000
        );
        let request = rig
            .store
            .payout_request(request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, PayoutStatus::Completed);
        assert_eq!(
            rig.notifier.event_count().await,
            0,
            "nothing recorded, nothing rolled back"
        );
    }

    #[tokio::test]
    async fn test_sweep_settles_every_ready_request() {
        let rig = rig();
        rig.store
            .upsert_source(&campaign("camp_a", "brand_1", None))
            .await
            .unwrap();
        rig.store
            .upsert_source(&campaign("camp_b", "brand_1", None))
            .await
            .unwrap();
        held_entry(&rig.store, "creator_1", "camp_a", 2_000, Duration::hours(1)).await;
        held_entry(&rig.store, "creator_2", "camp_b", 3_000, Duration::hours(1)).await;
        rig.scheduler.run_once(Utc::now()).await.unwrap();
        rig.settlement.open_request("creator_1").await.unwrap();
        rig.settlement.open_request("creator_2").await.unwrap();

        let summary = rig.settlement.run_sweep(Utc::now()).await.unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.settled, 2);
        assert_eq!(summary.total_cents, 5_000);
        assert_eq!(summary.failed, 0);

        assert_eq!(
            rig.store.wallet("creator_1").await.unwrap().balance_cents,
            2_000
        );
        assert_eq!(
            rig.store.wallet("creator_2").await.unwrap().balance_cents,
            3_000
        );
    }

    #[tokio::test]
    async fn test_sweep_skips_requests_in_conflict() {
        let rig = rig();
        let request = locked_request(&rig, "creator_1", 2_000).await;
        // Entry clawed back out from under the request: nothing left to pay.
        let entry_id = rig.store.entries_for_request(request.id).await.unwrap()[0].id;
        rig.store
            .clawback_entry(entry_id, "fraud confirmed")
            .await
            .unwrap();

        let summary = rig.settlement.run_sweep(Utc::now()).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.settled, 0);
        assert_eq!(summary.skipped_conflicts, 1);
        assert_eq!(rig.rail.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_when_lock_held() {
        let rig = rig();
        assert!(rig
            .store
            .try_acquire_job_lock(SETTLEMENT_SWEEP_JOB)
            .await
            .unwrap());

        let summary = rig.settlement.run_sweep(Utc::now()).await.unwrap();
        assert!(summary.skipped_lock_held);
        assert_eq!(summary.settled, 0);
    }
}

// ============================================================================
// Clawback and Reversal
// ============================================================================

mod clawback {
    use super::*;

    #[tokio::test]
    async fn test_clawback_of_held_entry_is_terminal() {
        let rig = rig();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 2_500, Duration::hours(1)).await;

        let clawed = rig
            .store
            .clawback_entry(entry.id, "coordinated inauthentic views")
            .await
            .unwrap();
        assert_eq!(clawed.status, EntryStatus::ClawedBack);
        assert_eq!(
            clawed.clawback_reason.as_deref(),
            Some("coordinated inauthentic views")
        );
        assert!(clawed.clawed_back_at.is_some());

        // Terminal: no further accrual, payment, or release.
        let err = rig.store.accrue(entry.id, 100, 50, false).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyPaid));
        let err = rig
            .store
            .mark_paid(entry.id, 100, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Overpayment { remaining: 0, .. }));

        rig.store
            .upsert_source(&campaign("camp_1", "brand_1", None))
            .await
            .unwrap();
        let summary = rig.scheduler.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary.entries_released, 0);
    }

    #[tokio::test]
    async fn test_overpayment_leaves_entry_untouched() {
        let rig = rig();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 2_500, Duration::hours(1)).await;
        rig.store.lock_entries(&[entry.id]).await.unwrap();

        let err = rig
            .store
            .mark_paid(entry.id, 3_000, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Overpayment {
                attempted: 3_000,
                remaining: 2_500,
            }
        ));

        let entry = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.paid_cents, 0, "rejected payment must not partially apply");
        assert_eq!(entry.status, EntryStatus::Locked);
        assert!(entry.last_paid_at.is_none());
    }

    #[tokio::test]
    async fn test_partial_payment_keeps_remaining_payable() {
        let rig = rig();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 2_500, Duration::hours(1)).await;
        rig.store.lock_entries(&[entry.id]).await.unwrap();

        rig.store
            .mark_paid(entry.id, 1_000, Uuid::new_v4())
            .await
            .unwrap();
        let entry_mid = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(
            entry_mid.status,
            EntryStatus::Locked,
            "partially paid stays locked"
        );
        assert_eq!(entry_mid.remaining_cents(), 1_500);

        rig.store
            .mark_paid(entry.id, 1_500, Uuid::new_v4())
            .await
            .unwrap();
        let entry_done = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry_done.status, EntryStatus::Paid);
        assert_eq!(entry_done.remaining_cents(), 0);
    }

    #[tokio::test]
    async fn test_reversing_paid_entry_debits_wallet_and_budget() {
        let rig = rig();
        rig.store
            .upsert_source(&campaign("camp_1", "brand_1", None))
            .await
            .unwrap();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 5_000, Duration::hours(1)).await;
        let paid = settle_everything(&rig, "creator_1").await;
        assert_eq!(paid, 5_000);

        let reversed = rig
            .store
            .reverse_paid_entry(entry.id, "fraud confirmed: view_pattern")
            .await
            .unwrap();
        assert_eq!(reversed, 5_000);

        let wallet = rig.store.wallet("creator_1").await.unwrap();
        assert_eq!(wallet.balance_cents, 0);
        let adjustments = rig.store.adjustments_for("creator_1").await;
        assert_eq!(
            adjustments,
            vec![(-5_000, "fraud confirmed: view_pattern".to_string())]
        );

        let entry = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::ClawedBack);
        let source = rig.store.source("camp_1").await.unwrap().unwrap();
        assert_eq!(
            source.budget_used_cents, 0,
            "reversal refunds the source budget"
        );
    }

    #[tokio::test]
    async fn test_paid_entry_cannot_be_clawed_back_in_place() {
        let rig = rig();
        rig.store
            .upsert_source(&campaign("camp_1", "brand_1", None))
            .await
            .unwrap();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 5_000, Duration::hours(1)).await;
        settle_everything(&rig, "creator_1").await;

        let err = rig.store.clawback_entry(entry.id, "fraud").await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyPaid));
    }
}

// ============================================================================
// Accrual
// ============================================================================

mod accrual_flow {
    use super::*;

    #[tokio::test]
    async fn test_accrual_raises_the_settled_amount() {
        let rig = rig();
        rig.store
            .upsert_source(&campaign("camp_1", "brand_1", None))
            .await
            .unwrap();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 1_000, Duration::hours(1)).await;

        rig.store.accrue(entry.id, 750, 15_000, false).await.unwrap();
        let after = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(after.accrued_cents, 1_750);
        assert_eq!(after.views_snapshot, 15_000);

        let paid = settle_everything(&rig, "creator_1").await;
        assert_eq!(paid, 1_750, "settlement pays the accrued total");
    }

    #[tokio::test]
    async fn test_view_snapshot_never_regresses() {
        let rig = rig();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 1_000, Duration::hours(1)).await;

        rig.store.accrue(entry.id, 100, 10_000, false).await.unwrap();
        // A stale report echoing an older view count must not rewind.
        rig.store.accrue(entry.id, 50, 8_000, false).await.unwrap();

        let after = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(after.views_snapshot, 10_000);
        assert_eq!(after.accrued_cents, 1_150);
    }

    #[tokio::test]
    async fn test_settled_entries_stop_accruing() {
        let rig = rig();
        rig.store
            .upsert_source(&campaign("camp_1", "brand_1", None))
            .await
            .unwrap();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 1_000, Duration::hours(1)).await;
        settle_everything(&rig, "creator_1").await;

        let err = rig
            .store
            .accrue(entry.id, 100, 20_000, false)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyPaid));

        let after = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(after.accrued_cents, 1_000, "paid amount is immutable");
    }
}

// ============================================================================
// Fraud Confirmation
// ============================================================================

mod fraud_confirmation {
    use super::*;

    const ADMIN: &str = "admin_1";

    async fn fraud_rig() -> (Rig, FraudPenaltyEngine) {
        let rig = rig();
        rig.store.upsert_profile(&admin(ADMIN)).await.unwrap();
        let engine = FraudPenaltyEngine::new(rig.store.clone(), rig.notifier.clone());
        (rig, engine)
    }

    #[tokio::test]
    async fn test_confirmation_applies_penalty_and_audit_trail() {
        let (rig, engine) = fraud_rig().await;
        // 120 day account, 20 approvals: derived score 50 + 8 + 20 = 78.
        rig.store
            .upsert_profile(&creator("creator_1", 120, 78.0))
            .await
            .unwrap();

        let flag = engine
            .raise_manual_flag("creator_1", 20_000, "purchased views", ADMIN)
            .await
            .unwrap();
        let result = engine.confirm_fraud(flag.id, ADMIN).await.unwrap();

        // 10 points plus one per full $100 of fraud value.
        assert_eq!(result.trust_penalty, 12);
        assert_eq!(result.fraud_count, 1);
        assert!(!result.banned);
        assert_eq!(result.score_before, 78.0);
        assert_eq!(
            result.score_after, 68.0,
            "one incident costs ten score points"
        );

        let profile = rig.store.profile("creator_1").await.unwrap().unwrap();
        assert_eq!(profile.fraud_flag_count, 1);
        assert_eq!(profile.trust_score, 68.0);
        assert!(profile.last_fraud_at.is_some());
        assert!(profile.banned_at.is_none());

        let stored = rig.store.fraud_flag(flag.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FlagStatus::Confirmed);
        assert_eq!(stored.trust_penalty, Some(12));
        assert_eq!(stored.resolved_by.as_deref(), Some(ADMIN));

        let history = rig.store.fraud_history_for("creator_1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].fraud_amount_cents, 20_000);
        assert_eq!(history[0].fraud_count_after, 1);

        let scores = rig.store.score_history_for("creator_1").await;
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].previous, 78.0);
        assert_eq!(scores[0].current, 68.0);

        let events = rig.notifier.events_for("creator_1").await;
        assert!(events.contains(&NotifyEvent::FraudConfirmed {
            trust_penalty: 12,
            banned: false,
        }));
    }

    #[tokio::test]
    async fn test_flag_resolves_exactly_once() {
        let (rig, engine) = fraud_rig().await;
        rig.store
            .upsert_profile(&creator("creator_1", 120, 78.0))
            .await
            .unwrap();
        let flag = engine
            .raise_manual_flag("creator_1", 20_000, "purchased views", ADMIN)
            .await
            .unwrap();
        engine.confirm_fraud(flag.id, ADMIN).await.unwrap();

        let err = engine.confirm_fraud(flag.id, ADMIN).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyResolved));
        let err = engine.dismiss_flag(flag.id, ADMIN).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyResolved));

        // One penalty, one history row, no matter how often retried.
        let profile = rig.store.profile("creator_1").await.unwrap().unwrap();
        assert_eq!(profile.fraud_flag_count, 1);
        assert_eq!(rig.store.fraud_history_for("creator_1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_third_incident_bans_creator_and_device() {
        let (rig, engine) = fraud_rig().await;
        let mut repeat = creator("creator_1", 120, 58.0);
        repeat.fraud_flag_count = 2;
        repeat.device_fingerprint = Some("fp_7".to_string());
        rig.store.upsert_profile(&repeat).await.unwrap();

        let flag = engine
            .raise_manual_flag("creator_1", 8_000, "bot traffic", ADMIN)
            .await
            .unwrap();
        let result = engine.confirm_fraud(flag.id, ADMIN).await.unwrap();

        assert_eq!(result.fraud_count, 3);
        assert!(result.banned, "third confirmed incident is a permanent ban");
        // Two prior incidents derive 58; the third plus the permanent flag
        // drops the score to 28.
        assert_eq!(result.score_before, 58.0);
        assert_eq!(result.score_after, 28.0);

        let profile = rig.store.profile("creator_1").await.unwrap().unwrap();
        assert!(profile.fraud_flag_permanent);
        assert!(profile.banned_at.is_some());

        let ban = rig.store.device_ban("fp_7").await.unwrap();
        assert_eq!(ban.creator_id, "creator_1");

        let events = rig.notifier.events_for("creator_1").await;
        assert!(events.contains(&NotifyEvent::FraudConfirmed {
            trust_penalty: 10,
            banned: true,
        }));
        assert!(
            rig.notifier.alert_count().await >= 1,
            "a new ban pages the operators"
        );
    }

    #[tokio::test]
    async fn test_dismissal_has_no_side_effects() {
        let (rig, engine) = fraud_rig().await;
        rig.store
            .upsert_profile(&creator("creator_1", 120, 78.0))
            .await
            .unwrap();
        let flag = engine
            .raise_manual_flag("creator_1", 20_000, "looked odd", ADMIN)
            .await
            .unwrap();

        engine.dismiss_flag(flag.id, ADMIN).await.unwrap();

        let stored = rig.store.fraud_flag(flag.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FlagStatus::Dismissed);
        assert_eq!(stored.trust_penalty, None);

        let profile = rig.store.profile("creator_1").await.unwrap().unwrap();
        assert_eq!(profile.fraud_flag_count, 0);
        assert_eq!(profile.trust_score, 78.0);
        assert!(rig.store.fraud_history_for("creator_1").await.is_empty());
        assert_eq!(rig.notifier.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_resolution_requires_admin() {
        let (rig, engine) = fraud_rig().await;
        rig.store
            .upsert_profile(&creator("creator_1", 120, 78.0))
            .await
            .unwrap();
        let flag = engine
            .raise_manual_flag("creator_1", 20_000, "purchased views", ADMIN)
            .await
            .unwrap();

        let err = engine.confirm_fraud(flag.id, "creator_1").await.unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized));

        let stored = rig.store.fraud_flag(flag.id).await.unwrap().unwrap();
        assert_eq!(
            stored.status,
            FlagStatus::Flagged,
            "flag untouched by the rejected call"
        );
    }

    #[tokio::test]
    async fn test_confirmation_claws_back_the_named_entry() {
        let (rig, engine) = fraud_rig().await;
        rig.store
            .upsert_profile(&creator("creator_1", 120, 78.0))
            .await
            .unwrap();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 2_500, Duration::hours(1)).await;

        let mut flag = FraudFlag::new("creator_1", FraudType::ViewPattern, 2_500, None);
        flag.clawback_ledger_id = Some(entry.id);
        let flag = engine.raise_flag(flag).await.unwrap();
        engine.confirm_fraud(flag.id, ADMIN).await.unwrap();

        let entry = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::ClawedBack);
        assert!(entry.clawback_reason.unwrap().contains("view_pattern"));
    }

    #[tokio::test]
    async fn test_confirmation_reverses_an_already_paid_entry() {
        let (rig, engine) = fraud_rig().await;
        rig.store
            .upsert_profile(&creator("creator_1", 120, 78.0))
            .await
            .unwrap();
        rig.store
            .upsert_source(&campaign("camp_1", "brand_1", None))
            .await
            .unwrap();
        let entry = held_entry(&rig.store, "creator_1", "camp_1", 5_000, Duration::hours(1)).await;
        settle_everything(&rig, "creator_1").await;

        let mut flag = FraudFlag::new("creator_1", FraudType::ViewPattern, 5_000, None);
        flag.clawback_ledger_id = Some(entry.id);
        let flag = engine.raise_flag(flag).await.unwrap();
        engine.confirm_fraud(flag.id, ADMIN).await.unwrap();

        assert_eq!(
            rig.store.wallet("creator_1").await.unwrap().balance_cents,
            0,
            "paid money comes back through the wallet"
        );
        let entry = rig.store.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::ClawedBack);
        assert_eq!(rig.store.adjustments_for("creator_1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_large_confirmed_fraud_pages_operators() {
        let (rig, engine) = fraud_rig().await;
        rig.store
            .upsert_profile(&creator("creator_1", 120, 78.0))
            .await
            .unwrap();
        let flag = engine
            .raise_manual_flag("creator_1", 50_000, "bulk purchased views", ADMIN)
            .await
            .unwrap();
        let result = engine.confirm_fraud(flag.id, ADMIN).await.unwrap();

        assert_eq!(result.trust_penalty, 15);
        assert_eq!(rig.notifier.alert_count().await, 1);
    }
}

// ============================================================================
// Payout Screening
// ============================================================================

mod screening {
    use super::*;

    fn screen_for(rig: &Rig) -> PayoutScreen {
        PayoutScreen::new(rig.store.clone())
    }

    #[tokio::test]
    async fn test_trusted_creator_auto_approves_small_amounts() {
        let rig = rig();
        rig.store
            .upsert_profile(&creator("creator_1", 120, 80.0))
            .await
            .unwrap();

        let outcome = screen_for(&rig).review("creator_1", 4_000).await.unwrap();
        assert_eq!(outcome.verdict, ScreenVerdict::AutoApproved);
        assert!(outcome.reasons.is_empty());
        assert!(outcome.flags.is_empty());
    }

    #[tokio::test]
    async fn test_banned_creator_is_rejected_outright() {
        let rig = rig();
        let mut banned = creator("creator_1", 400, 95.0);
        banned.banned_at = Some(Utc::now() - Duration::days(2));
        rig.store.upsert_profile(&banned).await.unwrap();

        let outcome = screen_for(&rig).review("creator_1", 500).await.unwrap();
        assert_eq!(outcome.verdict, ScreenVerdict::Rejected);
        assert_eq!(outcome.reasons, vec!["creator is banned".to_string()]);
        assert!(outcome.flags.is_empty());
    }

    #[tokio::test]
    async fn test_new_account_large_request_goes_to_review() {
        let rig = rig();
        rig.store
            .upsert_profile(&creator("creator_1", 5, 80.0))
            .await
            .unwrap();

        let outcome = screen_for(&rig).review("creator_1", 15_000).await.unwrap();
        assert_eq!(outcome.verdict, ScreenVerdict::ManualReview);
        assert!(
            outcome.reasons.iter().any(|r| r.contains("days old")),
            "age gate should trip: {:?}",
            outcome.reasons
        );
        assert_eq!(outcome.flags.len(), 1);
        assert_eq!(outcome.flags[0].fraud_type, FraudType::NewCreator);
        assert!(outcome.flags[0].evidence_deadline.is_some());

        // Flag is persisted open for the review queue.
        let open = rig.store.open_flags_for_user("creator_1").await.unwrap();
        assert_eq!(open.len(), 1);
    }

    #[tokio::test]
    async fn test_large_tier_demands_track_record() {
        let rig = rig();
        rig.store
            .upsert_profile(&creator("creator_1", 120, 80.0))
            .await
            .unwrap();

        let outcome = screen_for(&rig).review("creator_1", 150_000).await.unwrap();
        assert_eq!(outcome.verdict, ScreenVerdict::ManualReview);
        // Trust 80 under the 90 floor, zero completed payouts under five.
        assert_eq!(outcome.reasons.len(), 2, "{:?}", outcome.reasons);
        assert!(outcome.flags.is_empty());
    }

    #[tokio::test]
    async fn test_prior_fraud_always_raises_a_flag() {
        let rig = rig();
        let mut prior = creator("creator_1", 120, 80.0);
        prior.fraud_flag_count = 1;
        rig.store.upsert_profile(&prior).await.unwrap();

        let outcome = screen_for(&rig).review("creator_1", 500).await.unwrap();
        assert_eq!(outcome.verdict, ScreenVerdict::ManualReview);
        assert_eq!(outcome.flags.len(), 1);
        assert_eq!(outcome.flags[0].fraud_type, FraudType::PreviousFraud);
    }

    #[tokio::test]
    async fn test_screening_rejects_non_positive_amounts() {
        let rig = rig();
        let err = screen_for(&rig).review("creator_1", 0).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(0)));
    }

    #[tokio::test]
    async fn test_unknown_creator_is_not_found() {
        let rig = rig();
        let err = screen_for(&rig).review("ghost", 500).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}

// ============================================================================
// Trust Recalculation
// ============================================================================

mod trust_scores {
    use super::*;

    #[tokio::test]
    async fn test_recalculation_converges_and_records_once() {
        let rig = rig();
        let calculator = TrustScoreCalculator::new(rig.store.clone());
        // Stored score is stale; the profile itself derives 78.
        rig.store
            .upsert_profile(&creator("creator_1", 120, 50.0))
            .await
            .unwrap();

        let update = calculator.recalculate_user("creator_1").await.unwrap();
        assert!(update.changed);
        assert_eq!(update.previous, 50.0);
        assert_eq!(update.current, 78.0);
        assert_eq!(update.level, TrustLevel::Good);

        let update = calculator.recalculate_user("creator_1").await.unwrap();
        assert!(
            !update.changed,
            "second pass over identical inputs is a no-op"
        );
        assert_eq!(update.current, 78.0);

        assert_eq!(rig.store.score_history_for("creator_1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_recalculation_reports_counts() {
        let rig = rig();
        let calculator = TrustScoreCalculator::new(rig.store.clone());
        rig.store
            .upsert_profile(&creator("creator_1", 120, 50.0))
            .await
            .unwrap();
        rig.store
            .upsert_profile(&creator("creator_2", 120, 78.0))
            .await
            .unwrap();

        let summary = calculator.recalculate_all().await.unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.changed, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_unknown_creator_fails_not_found() {
        let rig = rig();
        let calculator = TrustScoreCalculator::new(rig.store.clone());
        let err = calculator.recalculate_user("ghost").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}

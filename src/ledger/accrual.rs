//! Accrual math in integer cents
//!
//! Earnings for a submission are a function of its view count and the
//! source's rate card: a base CPM component, a one-time flat component, an
//! optional one-shot milestone bonus, and an optional bonus CPM that only
//! applies to views above a minimum. Accrual is delta-based: re-evaluating
//! with an unchanged view count accrues nothing.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Rate card attached to a campaign or boost. All amounts are cents;
/// CPM rates are cents per thousand views. Unknown fields are rejected so
/// a misspelled component cannot silently price a deal at zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccrualRate {
    #[serde(default)]
    pub base_rpm_cents: i64,
    #[serde(default)]
    pub flat_cents: i64,
    #[serde(default)]
    pub milestone_threshold: Option<i64>,
    #[serde(default)]
    pub milestone_bonus_cents: i64,
    #[serde(default)]
    pub bonus_rpm_cents: i64,
    /// Views below this earn no bonus CPM.
    #[serde(default)]
    pub bonus_min_views: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualOutcome {
    /// Total cents the submission has earned at this view count.
    pub total_cents: i64,
    /// Whether this evaluation crossed the milestone for the first time.
    pub milestone_hit: bool,
}

/// Cents earned by `views` at `rpm_cents` per thousand. Floor division;
/// partial thousands round down.
pub fn cpm_cents(views: i64, rpm_cents: i64) -> i64 {
    if views <= 0 || rpm_cents <= 0 {
        return 0;
    }
    views.saturating_mul(rpm_cents) / 1000
}

/// Evaluates the full rate card at a view count.
///
/// `milestone_already_paid` keeps the milestone bonus in the total without
/// re-triggering it; the bonus is granted exactly once per entry.
pub fn evaluate(views: i64, milestone_already_paid: bool, rate: &AccrualRate) -> AccrualOutcome {
    let mut total = rate.flat_cents + cpm_cents(views, rate.base_rpm_cents);

    let eligible = (views - rate.bonus_min_views).max(0);
    total += cpm_cents(eligible, rate.bonus_rpm_cents);

    let mut milestone_hit = false;
    if let Some(threshold) = rate.milestone_threshold {
        if milestone_already_paid {
            total += rate.milestone_bonus_cents;
        } else if views >= threshold {
            total += rate.milestone_bonus_cents;
            milestone_hit = true;
        }
    }

    AccrualOutcome {
        total_cents: total,
        milestone_hit,
    }
}

/// Cents to accrue on top of what the entry already holds.
///
/// Views only move forward; a shrinking count accrues zero rather than
/// clawing anything back automatically.
pub fn accrual_delta(
    views: i64,
    snapshot_views: i64,
    accrued_so_far: i64,
    milestone_already_paid: bool,
    rate: &AccrualRate,
) -> LedgerResult<AccrualOutcome> {
    if views < 0 {
        return Err(LedgerError::InvalidAmount(views));
    }
    if views <= snapshot_views {
        return Ok(AccrualOutcome {
            total_cents: 0,
            milestone_hit: false,
        });
    }

    let next = evaluate(views, milestone_already_paid, rate);
    let delta = (next.total_cents - accrued_so_far).max(0);
    Ok(AccrualOutcome {
        total_cents: delta,
        milestone_hit: next.milestone_hit,
    })
}

use chrono::{DateTime, Duration, Utc};
use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::model::PaymentEntry;
use crate::types::{PlotId, UserId};

/// snapshot of an in-flight installment plan, projected from the chain's
/// active ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanState {
    pub plot_id: PlotId,
    pub user_id: UserId,
    pub due_date: DateTime<Utc>,
    pub per_cycle_amount: Money,
    pub cycle_count: u32,
    /// cycles confirmed so far, down payment included
    pub cycles_applied: u32,
    pub total_paid: Money,
}

impl PlanState {
    /// project plan state from the chain's active entry
    pub fn from_entry(entry: &PaymentEntry, cycles_applied: u32) -> Option<Self> {
        let plot_id = entry.plot_id?;
        Some(Self {
            plot_id,
            user_id: entry.user_id,
            due_date: entry.due_date?,
            per_cycle_amount: entry.per_cycle_amount?,
            cycle_count: entry.cycle_count?,
            cycles_applied,
            total_paid: entry.total_paid,
        })
    }

    /// advisory full plan amount, per-cycle times cycle count
    ///
    /// Advisory only. The plot price decides completion; when the two
    /// disagree the divergence is flagged, never silently resolved.
    pub fn advisory_total(&self) -> Money {
        self.per_cycle_amount * Decimal::from(self.cycle_count)
    }
}

/// result of folding one payment into a plan
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub due_date: DateTime<Utc>,
    pub total_paid: Money,
    /// 1-based; the down payment is cycle 1
    pub cycle_number: u32,
    pub per_cycle_amount: Money,
    pub cycle_count: u32,
    pub completed: bool,
    /// advisory per-cycle formula disagreed with the price at completion
    pub formula_divergence: bool,
    /// prior plan row was missing and the schedule was re-seeded
    pub seeded: bool,
}

/// open a new plan from a confirmed down payment
pub fn open_plan(
    down_payment: Money,
    prior_total: Money,
    price: Money,
    per_cycle_amount: Option<Money>,
    cycle_count: Option<u32>,
    config: &LedgerConfig,
    time: &SafeTimeProvider,
) -> CycleOutcome {
    let cycle_count = cycle_count.unwrap_or(config.default_cycle_count).max(1);
    let total = prior_total + down_payment;
    let remaining = (price - total).max(Money::ZERO);
    // staff may supply a non-standard per-cycle amount; default splits the
    // remaining balance evenly across the cycles
    let per_cycle =
        per_cycle_amount.unwrap_or_else(|| remaining / Decimal::from(cycle_count));

    let completed = total >= price;

    CycleOutcome {
        due_date: time.now() + Duration::days(config.cycle_days),
        total_paid: total,
        cycle_number: 1,
        per_cycle_amount: per_cycle,
        cycle_count,
        completed,
        formula_divergence: false,
        seeded: false,
    }
}

/// re-seed a schedule from the current payment as cycle 1
///
/// Soft-failure path for the data inconsistency where a cycle payment
/// arrives but the prior plan row is missing; logs a reconciliation warning
/// instead of failing the payment.
pub fn seed_plan(
    plot_id: PlotId,
    payment: Money,
    prior_total: Money,
    price: Money,
    config: &LedgerConfig,
    time: &SafeTimeProvider,
) -> CycleOutcome {
    warn!(
        plot_id = %plot_id,
        amount = %payment,
        prior_total = %prior_total,
        "installment cycle arrived without a prior plan, seeding schedule from this payment"
    );
    let mut outcome = open_plan(payment, prior_total, price, None, None, config, time);
    outcome.seeded = true;
    outcome
}

/// fold a cycle payment into an existing plan
///
/// A missing prior plan falls back to [`seed_plan`] rather than failing.
pub fn apply_cycle(
    prior: Option<&PlanState>,
    plot_id: PlotId,
    payment: Money,
    price: Money,
    config: &LedgerConfig,
    time: &SafeTimeProvider,
) -> CycleOutcome {
    let Some(plan) = prior else {
        return seed_plan(plot_id, payment, Money::ZERO, price, config, time);
    };

    let total = plan.total_paid + payment;
    let advisory = plan.advisory_total();

    // price is authoritative for completion; the per-cycle formula is only
    // checked to surface staff-entry inconsistencies
    let completed = total >= price;
    let advisory_completed = total >= advisory;
    let formula_divergence = completed != advisory_completed;

    if formula_divergence {
        warn!(
            plot_id = %plot_id,
            total = %total,
            price = %price,
            advisory = %advisory,
            "installment completion formulas disagree, taking plot price as authoritative"
        );
    }

    CycleOutcome {
        due_date: plan.due_date + Duration::days(config.cycle_days),
        total_paid: total,
        cycle_number: plan.cycles_applied + 1,
        per_cycle_amount: plan.per_cycle_amount,
        cycle_count: plan.cycle_count,
        completed,
        formula_divergence,
        seeded: false,
    }
}

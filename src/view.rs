use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::model::{confirmed_total, PaymentEntry, Plot};
use crate::schedule::PlanState;
use crate::types::{
    Availability, BookingId, PaymentId, PaymentMethod, PaymentStatus, PlanType, PlotId, UserId,
};

/// serializable projection of a plot's ledger state
#[derive(Debug, Serialize, Deserialize)]
pub struct PlotLedgerView {
    pub plot_id: PlotId,
    pub price: Money,
    pub availability: Availability,
    pub owner: Option<UserId>,
    pub total_paid: Money,
    pub plan: Option<PlanView>,
    pub entries: Vec<EntryView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanView {
    pub due_date: DateTime<Utc>,
    pub per_cycle_amount: Money,
    pub cycle_count: u32,
    pub cycles_applied: u32,
    pub total_paid: Money,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryView {
    pub payment_id: PaymentId,
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub plan_type: PlanType,
    pub status: PaymentStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub total_paid: Money,
    pub recorded_at: DateTime<Utc>,
}

impl PlotLedgerView {
    pub fn from_parts(plot: &Plot, plan: Option<&PlanState>, entries: &[PaymentEntry]) -> Self {
        PlotLedgerView {
            plot_id: plot.plot_id,
            price: plot.price,
            availability: plot.availability,
            owner: plot.owner,
            total_paid: confirmed_total(entries.iter()),
            plan: plan.map(|p| PlanView {
                due_date: p.due_date,
                per_cycle_amount: p.per_cycle_amount,
                cycle_count: p.cycle_count,
                cycles_applied: p.cycles_applied,
                total_paid: p.total_paid,
            }),
            entries: entries
                .iter()
                .map(|e| EntryView {
                    payment_id: e.payment_id,
                    booking_id: e.booking_id,
                    user_id: e.user_id,
                    amount: e.amount,
                    method: e.method,
                    plan_type: e.plan_type,
                    status: e.status,
                    due_date: e.due_date,
                    total_paid: e.total_paid,
                    recorded_at: e.recorded_at,
                })
                .collect(),
        }
    }

    /// convert to pretty-printed json string
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

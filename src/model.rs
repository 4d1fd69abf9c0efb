use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    Availability, BookingId, BookingStatus, PaymentId, PaymentMethod, PaymentStatus, PlanType,
    PlotId, ServiceKind, UserId,
};

/// a purchasable burial plot
///
/// `availability` is a cached projection of the ledger; nothing outside the
/// resolver path may set it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub plot_id: PlotId,
    pub price: Money,
    pub availability: Availability,
    /// weak reference for lookup only, set once the plot is fully paid
    pub owner: Option<UserId>,
}

impl Plot {
    /// create a plot during inventory provisioning
    pub fn new(plot_id: PlotId, price: Money) -> Self {
        Self {
            plot_id,
            price,
            availability: Availability::Available,
            owner: None,
        }
    }
}

/// a service request tracked through approval/cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: BookingId,
    /// plot purchases carry a plot; memorial/burial services do not
    pub plot_id: Option<PlotId>,
    pub requester: UserId,
    pub service: ServiceKind,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        booking_id: BookingId,
        plot_id: Option<PlotId>,
        requester: UserId,
        service: ServiceKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            booking_id,
            plot_id,
            requester,
            service,
            status: BookingStatus::Pending,
            created_at,
            last_status_change: created_at,
        }
    }

    pub fn update_status(&mut self, new_status: BookingStatus, timestamp: DateTime<Utc>) {
        self.status = new_status;
        self.last_status_change = timestamp;
    }
}

/// one confirmed ledger line
///
/// Append-only financial record. After confirmation only `status` and
/// `due_date` may change (plan rollover); everything else is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub payment_id: PaymentId,
    pub booking_id: BookingId,
    pub plot_id: Option<PlotId>,
    pub user_id: UserId,
    pub amount: Money,
    pub method: PaymentMethod,
    /// gateway idempotency key; None for staff cash entries without one
    pub external_ref: Option<String>,
    pub plan_type: PlanType,
    pub status: PaymentStatus,
    /// next cycle due date while the plan is active
    pub due_date: Option<DateTime<Utc>>,
    pub per_cycle_amount: Option<Money>,
    pub cycle_count: Option<u32>,
    /// running total for the plan chain, denormalized for fast lookup
    pub total_paid: Money,
    pub recorded_at: DateTime<Utc>,
}

impl PaymentEntry {
    /// entry is an in-flight installment plan line
    pub fn is_active(&self) -> bool {
        self.status == PaymentStatus::Active
    }

    /// entry counts toward the plot's confirmed total
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, PaymentStatus::Active | PaymentStatus::Paid)
    }
}

/// sum of confirmed amounts across a set of entries, chain order
pub fn confirmed_total<'a, I>(entries: I) -> Money
where
    I: IntoIterator<Item = &'a PaymentEntry>,
{
    entries
        .into_iter()
        .filter(|e| e.is_confirmed())
        .map(|e| e.amount)
        .fold(Money::ZERO, |acc, x| acc + x)
}

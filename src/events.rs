use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    Availability, BookingId, BookingStatus, PaymentId, PaymentMethod, PaymentStatus, PlanType,
    PlotId, UserId,
};

/// all state-change notifications emitted by the engine, consumed by the
/// notification/email/SMS subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // ledger events
    PaymentRecorded {
        payment_id: PaymentId,
        booking_id: BookingId,
        plot_id: Option<PlotId>,
        user_id: UserId,
        amount: Money,
        method: PaymentMethod,
        plan_type: PlanType,
        timestamp: DateTime<Utc>,
    },
    PaymentStatusChanged {
        payment_id: PaymentId,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
        timestamp: DateTime<Utc>,
    },

    // installment plan events
    PlanOpened {
        plot_id: PlotId,
        user_id: UserId,
        down_payment: Money,
        per_cycle_amount: Money,
        cycle_count: u32,
        next_due: DateTime<Utc>,
    },
    PlanCycleApplied {
        plot_id: PlotId,
        cycle_number: u32,
        amount: Money,
        total_paid: Money,
        next_due: DateTime<Utc>,
    },
    PlanCompleted {
        plot_id: PlotId,
        total_paid: Money,
        timestamp: DateTime<Utc>,
    },
    /// the advisory per-cycle formula disagreed with the plot price at
    /// completion; price was taken as authoritative
    PlanFormulaDivergence {
        plot_id: PlotId,
        total_paid: Money,
        price: Money,
        advisory_total: Money,
    },
    /// schedule had to be seeded from the current payment because the prior
    /// plan row was missing
    PlanSeeded {
        plot_id: PlotId,
        amount: Money,
        next_due: DateTime<Utc>,
    },

    // derived state events
    PlotAvailabilityChanged {
        plot_id: PlotId,
        old_availability: Availability,
        new_availability: Availability,
        total_paid: Money,
        timestamp: DateTime<Utc>,
    },
    BookingStatusChanged {
        booking_id: BookingId,
        old_status: BookingStatus,
        new_status: BookingStatus,
        timestamp: DateTime<Utc>,
    },

    // reconciliation events
    ReconciliationRepaired {
        plot_id: PlotId,
        recomputed_total: Money,
        availability: Availability,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

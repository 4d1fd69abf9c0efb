use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a burial plot
pub type PlotId = Uuid;

/// unique identifier for a booking
pub type BookingId = Uuid;

/// unique identifier for a requesting user
pub type UserId = Uuid;

/// monotonic identifier for a ledger line
pub type PaymentId = u64;

/// plot availability category, always derived from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    /// nothing confirmed, or confirmed total below the down-payment threshold
    Available,
    /// down-payment threshold met, balance outstanding
    Reserved,
    /// fully paid
    Occupied,
}

/// booking status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    /// awaiting payment or staff confirmation
    Pending,
    /// payment threshold met, or staff-confirmed for non-plot services
    Approved,
    /// withdrawn before any confirmed payment
    Cancelled,
}

/// service category a booking covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    /// plot purchase, carries a plot reference
    Plot,
    /// memorial visit, no plot
    Memorial,
    /// burial service, no plot
    Burial,
}

/// how a payment was collected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// card gateway confirmation
    Card,
    /// staff-entered cash, trusted immediately
    Cash,
}

/// payment plan type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanType {
    /// covers the full remaining balance in one payment
    FullPayment,
    /// opens or continues an installment plan
    DownPayment,
}

/// ledger line status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// accepted but not yet folded into a plan (transient)
    Pending,
    /// installment plan awaiting its next cycle
    Active,
    /// settled; either a completed plan line or a superseded cycle
    Paid,
}

impl Availability {
    /// plot can still take payments toward ownership
    pub fn accepts_payment(&self) -> bool {
        !matches!(self, Availability::Occupied)
    }
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled)
    }
}

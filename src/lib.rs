pub mod booking;
pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod model;
pub mod reconcile;
pub mod resolver;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;
pub mod view;

// re-export key types
pub use booking::BookingController;
pub use config::LedgerConfig;
pub use decimal::{Money, Rate};
pub use errors::{LedgerError, Result};
pub use events::{Event, EventStore};
pub use model::{Booking, PaymentEntry, Plot};
pub use reconcile::{reconcile_plot, ReconciliationReport};
pub use resolver::resolve;
pub use schedule::{CycleOutcome, PlanState};
pub use service::{EntryPage, PaymentLedger, PaymentOutcome, PaymentRequest};
pub use store::LedgerStore;
pub use types::{
    Availability, BookingId, BookingStatus, PaymentId, PaymentMethod, PaymentStatus, PlanType,
    PlotId, ServiceKind, UserId,
};
pub use view::{EntryView, PlanView, PlotLedgerView};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;

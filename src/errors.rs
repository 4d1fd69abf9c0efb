use thiserror::Error;

use crate::decimal::Money;
use crate::types::{BookingId, BookingStatus, PlotId, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid amount: {amount} ({reason})")]
    InvalidAmount {
        amount: Money,
        reason: String,
    },

    #[error("user {user_id} already has an active plan on plot {existing_plot}")]
    ActivePlanConflict {
        user_id: UserId,
        existing_plot: PlotId,
    },

    #[error("plot {plot_id} is already fully paid")]
    PlotAlreadyOccupied {
        plot_id: PlotId,
    },

    #[error("plot not found: {plot_id}")]
    PlotNotFound {
        plot_id: PlotId,
    },

    #[error("booking not found: {booking_id}")]
    BookingNotFound {
        booking_id: BookingId,
    },

    #[error("booking {booking_id} has {confirmed} in confirmed payments and cannot be cancelled")]
    CancellationBlocked {
        booking_id: BookingId,
        confirmed: Money,
    },

    #[error("invalid booking state: {status:?} ({message})")]
    InvalidBookingState {
        status: BookingStatus,
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("ledger store failure: {message}")]
    Store {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

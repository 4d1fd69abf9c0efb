use std::sync::Arc;

use hourglass_rs::SafeTimeProvider;
use tracing::debug;

use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::model::confirmed_total;
use crate::resolver;
use crate::store::{LedgerStore, LedgerTxn};
use crate::types::{Availability, BookingId, BookingStatus, ServiceKind};

/// booking lifecycle controller
///
/// Owns the pending/approved/cancelled machine. Booking status is always
/// derived here (or in reconciliation); no other code path sets it.
#[derive(Clone)]
pub struct BookingController {
    store: Arc<LedgerStore>,
    config: LedgerConfig,
}

impl BookingController {
    pub fn new(store: Arc<LedgerStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// approve a booking; idempotent, a second call is a no-op success
    ///
    /// Non-plot services approve on staff confirmation. Plot bookings
    /// approve only once the plot's ledger total meets the reservation
    /// threshold.
    pub fn approve(&self, booking_id: BookingId, time: &SafeTimeProvider) -> Result<Vec<Event>> {
        let config = self.config;
        self.store.transaction(|txn| {
            let mut events = EventStore::new();
            approve_in_txn(txn, booking_id, &config, &mut events, time)?;
            Ok(events.take_events())
        })
    }

    /// cancel a booking; idempotent, blocked once any confirmed payment exists
    pub fn cancel(&self, booking_id: BookingId, time: &SafeTimeProvider) -> Result<Vec<Event>> {
        self.store.transaction(|txn| {
            let mut events = EventStore::new();
            cancel_in_txn(txn, booking_id, &mut events, time)?;
            Ok(events.take_events())
        })
    }
}

pub(crate) fn approve_in_txn(
    txn: &mut LedgerTxn<'_>,
    booking_id: BookingId,
    config: &LedgerConfig,
    events: &mut EventStore,
    time: &SafeTimeProvider,
) -> Result<()> {
    let booking = txn.booking(booking_id)?.clone();

    match booking.status {
        BookingStatus::Approved => return Ok(()),
        BookingStatus::Cancelled => {
            return Err(LedgerError::InvalidBookingState {
                status: booking.status,
                message: "cancelled bookings cannot be approved".to_string(),
            });
        }
        BookingStatus::Pending => {}
    }

    if booking.service == ServiceKind::Plot {
        let plot_id = booking.plot_id.ok_or_else(|| LedgerError::InvalidBookingState {
            status: booking.status,
            message: "plot booking has no plot reference".to_string(),
        })?;
        let plot = txn.plot(plot_id)?;
        let total = confirmed_total(txn.entries_for_plot(plot_id).into_iter());
        let availability = resolver::resolve(plot.price, total, config);
        if availability == Availability::Available {
            return Err(LedgerError::InvalidBookingState {
                status: booking.status,
                message: format!(
                    "plot payments ({}) below reservation threshold, cannot approve",
                    total
                ),
            });
        }
    }

    set_status(txn, booking_id, BookingStatus::Approved, events, time)
}

pub(crate) fn cancel_in_txn(
    txn: &mut LedgerTxn<'_>,
    booking_id: BookingId,
    events: &mut EventStore,
    time: &SafeTimeProvider,
) -> Result<()> {
    let booking = txn.booking(booking_id)?.clone();

    if booking.status == BookingStatus::Cancelled {
        return Ok(());
    }

    let confirmed: Money = confirmed_total(txn.entries_for_booking(booking_id).into_iter());
    if confirmed.is_positive() {
        // payments would have to be reversed first, which is out of scope
        return Err(LedgerError::CancellationBlocked {
            booking_id,
            confirmed,
        });
    }

    set_status(txn, booking_id, BookingStatus::Cancelled, events, time)
}

/// advance a plot booking to approved once its plot leaves `available`;
/// called from the payment path and reconciliation
pub(crate) fn sync_with_availability(
    txn: &mut LedgerTxn<'_>,
    booking_id: BookingId,
    availability: Availability,
    events: &mut EventStore,
    time: &SafeTimeProvider,
) -> Result<()> {
    let booking = txn.booking(booking_id)?;
    if booking.status != BookingStatus::Pending {
        return Ok(());
    }
    if availability == Availability::Available {
        return Ok(());
    }
    set_status(txn, booking_id, BookingStatus::Approved, events, time)
}

fn set_status(
    txn: &mut LedgerTxn<'_>,
    booking_id: BookingId,
    new_status: BookingStatus,
    events: &mut EventStore,
    time: &SafeTimeProvider,
) -> Result<()> {
    let now = time.now();
    let booking = txn.booking_mut(booking_id)?;
    let old_status = booking.status;
    if old_status == new_status {
        return Ok(());
    }
    booking.update_status(new_status, now);
    debug!(booking_id = %booking_id, ?old_status, ?new_status, "booking status changed");
    events.emit(Event::BookingStatusChanged {
        booking_id,
        old_status,
        new_status,
        timestamp: now,
    });
    Ok(())
}

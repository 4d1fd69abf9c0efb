use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::{LedgerError, Result};
use crate::model::{Booking, PaymentEntry, Plot};
use crate::types::{BookingId, PaymentId, PaymentStatus, PlotId, UserId};

/// persisted rows, exclusively owned by the store
#[derive(Debug, Clone, Default)]
struct Inner {
    plots: HashMap<PlotId, Plot>,
    bookings: HashMap<BookingId, Booking>,
    /// append-only, in acceptance order; payment ids are monotonic
    entries: Vec<PaymentEntry>,
    /// idempotency key -> ledger line
    external_refs: HashMap<String, PaymentId>,
    next_payment_id: PaymentId,
}

/// durable record of plots, bookings, and payment entries
///
/// Stands in for the external persistence collaborator. One mutex serializes
/// writers, which gives per-plot serialization for free; `transaction` works
/// on a copy and installs it only on success, so a rejected operation leaves
/// no trace.
#[derive(Debug, Default)]
pub struct LedgerStore {
    inner: Mutex<Inner>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_payment_id: 1,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|e| LedgerError::Store {
            message: format!("ledger lock poisoned: {}", e),
        })
    }

    /// run a closure against the store with all-or-nothing semantics
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerTxn<'_>) -> Result<T>,
    {
        let mut guard = self.lock()?;
        let mut work = guard.clone();
        let mut txn = LedgerTxn { inner: &mut work };
        match f(&mut txn) {
            Ok(value) => {
                *guard = work;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// provision a plot (inventory is an external collaborator)
    pub fn insert_plot(&self, plot: Plot) -> Result<()> {
        let mut guard = self.lock()?;
        guard.plots.insert(plot.plot_id, plot);
        Ok(())
    }

    /// provision a booking
    pub fn insert_booking(&self, booking: Booking) -> Result<()> {
        let mut guard = self.lock()?;
        guard.bookings.insert(booking.booking_id, booking);
        Ok(())
    }

    /// read a plot outside a transaction
    pub fn plot(&self, plot_id: PlotId) -> Result<Plot> {
        let guard = self.lock()?;
        guard
            .plots
            .get(&plot_id)
            .cloned()
            .ok_or(LedgerError::PlotNotFound { plot_id })
    }

    /// read a booking outside a transaction
    pub fn booking(&self, booking_id: BookingId) -> Result<Booking> {
        let guard = self.lock()?;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(LedgerError::BookingNotFound { booking_id })
    }

    /// chronological entries for a plot
    pub fn entries_for_plot(&self, plot_id: PlotId) -> Result<Vec<PaymentEntry>> {
        let guard = self.lock()?;
        Ok(guard
            .entries
            .iter()
            .filter(|e| e.plot_id == Some(plot_id))
            .cloned()
            .collect())
    }
}

/// transactional view over the store's rows
pub struct LedgerTxn<'a> {
    inner: &'a mut Inner,
}

impl LedgerTxn<'_> {
    pub fn plot(&self, plot_id: PlotId) -> Result<&Plot> {
        self.inner
            .plots
            .get(&plot_id)
            .ok_or(LedgerError::PlotNotFound { plot_id })
    }

    pub fn plot_mut(&mut self, plot_id: PlotId) -> Result<&mut Plot> {
        self.inner
            .plots
            .get_mut(&plot_id)
            .ok_or(LedgerError::PlotNotFound { plot_id })
    }

    pub fn booking(&self, booking_id: BookingId) -> Result<&Booking> {
        self.inner
            .bookings
            .get(&booking_id)
            .ok_or(LedgerError::BookingNotFound { booking_id })
    }

    pub fn booking_mut(&mut self, booking_id: BookingId) -> Result<&mut Booking> {
        self.inner
            .bookings
            .get_mut(&booking_id)
            .ok_or(LedgerError::BookingNotFound { booking_id })
    }

    /// chronological entries for a plot
    pub fn entries_for_plot(&self, plot_id: PlotId) -> Vec<&PaymentEntry> {
        self.inner
            .entries
            .iter()
            .filter(|e| e.plot_id == Some(plot_id))
            .collect()
    }

    /// chronological entries for a booking
    pub fn entries_for_booking(&self, booking_id: BookingId) -> Vec<&PaymentEntry> {
        self.inner
            .entries
            .iter()
            .filter(|e| e.booking_id == booking_id)
            .collect()
    }

    /// idempotency lookup
    pub fn entry_by_external_ref(&self, key: &str) -> Option<&PaymentEntry> {
        let id = self.inner.external_refs.get(key)?;
        self.inner.entries.iter().find(|e| e.payment_id == *id)
    }

    pub fn entry_mut(&mut self, payment_id: PaymentId) -> Option<&mut PaymentEntry> {
        self.inner
            .entries
            .iter_mut()
            .find(|e| e.payment_id == payment_id)
    }

    /// the plot's in-flight plan line, if any
    pub fn active_entry_for_plot(&self, plot_id: PlotId) -> Option<&PaymentEntry> {
        self.inner
            .entries
            .iter()
            .rev()
            .find(|e| e.plot_id == Some(plot_id) && e.status == PaymentStatus::Active)
    }

    /// the user's in-flight plan line across all plots, if any
    pub fn active_entry_for_user(&self, user_id: UserId) -> Option<&PaymentEntry> {
        self.inner
            .entries
            .iter()
            .rev()
            .find(|e| e.user_id == user_id && e.status == PaymentStatus::Active)
    }

    /// next monotonic payment id
    pub fn next_payment_id(&mut self) -> PaymentId {
        let id = self.inner.next_payment_id;
        self.inner.next_payment_id += 1;
        id
    }

    /// append a confirmed ledger line; financial record, never removed
    pub fn append_entry(&mut self, entry: PaymentEntry) {
        if let Some(key) = &entry.external_ref {
            self.inner.external_refs.insert(key.clone(), entry.payment_id);
        }
        self.inner.entries.push(entry);
    }
}

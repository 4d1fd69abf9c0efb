use hourglass_rs::SafeTimeProvider;
use tracing::debug;

use crate::booking;
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::{Event, EventStore};
use crate::model::confirmed_total;
use crate::service::apply_availability;
use crate::store::LedgerStore;
use crate::types::{Availability, PaymentStatus, PlotId};

/// outcome of one reconciliation pass over a plot
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationReport {
    pub plot_id: PlotId,
    pub recomputed_total: Money,
    pub availability: Availability,
    /// ledger lines whose status had drifted and was repaired
    pub entries_repaired: u32,
    /// anything (plot, booking, or entry) actually changed
    pub changed: bool,
    pub events: Vec<Event>,
}

/// re-derive a plot's downstream state from its full payment history
///
/// The ledger is the single source of truth: this recomputes the confirmed
/// total, availability, plan-line statuses, and booking statuses, and
/// persists whatever differs. It never creates or deletes entries and is
/// safe to re-run at any time.
pub fn reconcile_plot(
    store: &LedgerStore,
    plot_id: PlotId,
    config: &LedgerConfig,
    time: &SafeTimeProvider,
) -> Result<ReconciliationReport> {
    store.transaction(|txn| {
        let mut events = EventStore::new();
        let now = time.now();

        let price = txn.plot(plot_id)?.price;
        let entries: Vec<_> = txn
            .entries_for_plot(plot_id)
            .into_iter()
            .cloned()
            .collect();
        let total = confirmed_total(entries.iter());

        // repair drifted plan lines: completed plans settle, and a chain may
        // keep at most its newest line active
        let mut entries_repaired = 0;
        let active_ids: Vec<_> = entries
            .iter()
            .filter(|e| e.status == PaymentStatus::Active)
            .map(|e| e.payment_id)
            .collect();
        let keep_active = if total >= price { None } else { active_ids.last().copied() };

        for payment_id in active_ids {
            if Some(payment_id) == keep_active {
                continue;
            }
            if let Some(entry) = txn.entry_mut(payment_id) {
                entry.status = PaymentStatus::Paid;
                entry.due_date = None;
                entries_repaired += 1;
                events.emit(Event::PaymentStatusChanged {
                    payment_id,
                    old_status: PaymentStatus::Active,
                    new_status: PaymentStatus::Paid,
                    timestamp: now,
                });
            }
        }

        // owner, when the ledger proves full payment, is the chain's payer
        let payer = entries.iter().rev().find(|e| e.is_confirmed()).map(|e| e.user_id);
        let availability = apply_availability(txn, plot_id, total, payer, config, &mut events, time)?;

        // booking statuses are projections too
        let mut booking_ids: Vec<_> = entries.iter().map(|e| e.booking_id).collect();
        booking_ids.sort();
        booking_ids.dedup();
        for booking_id in booking_ids {
            booking::sync_with_availability(txn, booking_id, availability, &mut events, time)?;
        }

        let changed = !events.events().is_empty();
        if changed {
            debug!(plot_id = %plot_id, total = %total, ?availability, "reconciliation repaired drift");
            events.emit(Event::ReconciliationRepaired {
                plot_id,
                recomputed_total: total,
                availability,
                timestamp: now,
            });
        }

        Ok(ReconciliationReport {
            plot_id,
            recomputed_total: total,
            availability,
            entries_repaired,
            changed,
            events: events.take_events(),
        })
    })
}

use std::sync::Arc;

use hourglass_rs::SafeTimeProvider;
use tracing::debug;

use crate::booking;
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{Event, EventStore};
use crate::model::{confirmed_total, PaymentEntry};
use crate::resolver;
use crate::schedule::{self, CycleOutcome, PlanState};
use crate::store::{LedgerStore, LedgerTxn};
use crate::types::{
    Availability, BookingId, BookingStatus, PaymentMethod, PaymentStatus, PlanType, PlotId, UserId,
};
use crate::view::PlotLedgerView;

/// inbound payment confirmation, produced by the gateway-callback handler or
/// the staff cash-entry form
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub booking_id: BookingId,
    pub plot_id: Option<PlotId>,
    pub user_id: UserId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub plan_type: PlanType,
    /// gateway idempotency key; retried callbacks replay the original result
    pub external_ref: Option<String>,
    pub cycle_count: Option<u32>,
    pub per_cycle_amount: Option<Money>,
}

/// result of an accepted (or replayed) payment confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub entry: PaymentEntry,
    pub availability: Option<Availability>,
    pub booking_status: BookingStatus,
    /// idempotency replay: the prior result was returned, nothing changed
    pub duplicate: bool,
    /// state-change notifications to hand to the notification subsystem
    pub events: Vec<Event>,
}

/// one page of chronological ledger entries
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPage {
    pub entries: Vec<PaymentEntry>,
    /// offset to pass for the next page; None when exhausted
    pub next_offset: Option<usize>,
}

/// payment ledger service
///
/// The only write path into the ledger. Every confirmation runs validation,
/// the ledger append, the scheduler update, the availability resolve, and
/// the booking sync inside one store transaction, so a crash never leaves
/// them half-applied.
#[derive(Clone)]
pub struct PaymentLedger {
    store: Arc<LedgerStore>,
    config: LedgerConfig,
}

impl PaymentLedger {
    pub fn new(store: Arc<LedgerStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// record a confirmed payment
    pub fn record_payment(
        &self,
        request: PaymentRequest,
        time: &SafeTimeProvider,
    ) -> Result<PaymentOutcome> {
        let config = self.config;
        self.store
            .transaction(|txn| record_in_txn(txn, &request, &config, time))
    }

    /// record a staff-entered cash payment; trusted immediately, no gateway
    /// confirmation involved
    pub fn record_cash_payment(
        &self,
        mut request: PaymentRequest,
        time: &SafeTimeProvider,
    ) -> Result<PaymentOutcome> {
        request.method = PaymentMethod::Cash;
        self.record_payment(request, time)
    }

    /// chronological entries for a plot, restartable via offset
    pub fn list_entries(&self, plot_id: PlotId, offset: usize, limit: usize) -> Result<EntryPage> {
        let all = self.store.entries_for_plot(plot_id)?;
        let entries: Vec<PaymentEntry> = all.iter().skip(offset).take(limit).cloned().collect();
        let consumed = offset + entries.len();
        let next_offset = if consumed < all.len() { Some(consumed) } else { None };
        Ok(EntryPage { entries, next_offset })
    }

    /// read-only projection of the plot's in-flight plan, for dashboards
    pub fn current_plan_state(&self, plot_id: PlotId) -> Result<Option<PlanState>> {
        self.store.transaction(|txn| {
            let Some(active) = txn.active_entry_for_plot(plot_id) else {
                return Ok(None);
            };
            let cycles = plan_cycles(txn, plot_id);
            Ok(PlanState::from_entry(active, cycles))
        })
    }

    /// one-transaction json-ready snapshot of a plot's ledger state
    pub fn plot_view(&self, plot_id: PlotId) -> Result<PlotLedgerView> {
        self.store.transaction(|txn| {
            let plot = txn.plot(plot_id)?.clone();
            let entries: Vec<PaymentEntry> =
                txn.entries_for_plot(plot_id).into_iter().cloned().collect();
            let plan = txn
                .active_entry_for_plot(plot_id)
                .and_then(|active| PlanState::from_entry(active, plan_cycles(txn, plot_id)));
            Ok(PlotLedgerView::from_parts(&plot, plan.as_ref(), &entries))
        })
    }
}

/// count of confirmed installment lines for a plot (down payment included)
fn plan_cycles(txn: &LedgerTxn<'_>, plot_id: PlotId) -> u32 {
    txn.entries_for_plot(plot_id)
        .into_iter()
        .filter(|e| e.is_confirmed() && e.plan_type == PlanType::DownPayment)
        .count() as u32
}

fn record_in_txn(
    txn: &mut LedgerTxn<'_>,
    request: &PaymentRequest,
    config: &LedgerConfig,
    time: &SafeTimeProvider,
) -> Result<PaymentOutcome> {
    // validation first, before any write
    if !request.amount.is_positive() {
        return Err(LedgerError::InvalidAmount {
            amount: request.amount,
            reason: "payment amount must be positive".to_string(),
        });
    }

    let booking = txn.booking(request.booking_id)?.clone();
    if booking.status == BookingStatus::Cancelled {
        return Err(LedgerError::InvalidBookingState {
            status: booking.status,
            message: "cancelled bookings cannot take payments".to_string(),
        });
    }

    // idempotency: a retried confirmation replays the prior result unchanged
    if let Some(key) = &request.external_ref {
        if let Some(existing) = txn.entry_by_external_ref(key) {
            let entry = existing.clone();
            let availability = match entry.plot_id {
                Some(plot_id) => Some(txn.plot(plot_id)?.availability),
                None => None,
            };
            debug!(external_ref = %key, payment_id = entry.payment_id, "duplicate confirmation replayed");
            return Ok(PaymentOutcome {
                entry,
                availability,
                booking_status: txn.booking(request.booking_id)?.status,
                duplicate: true,
                events: Vec::new(),
            });
        }
    }

    match request.plot_id {
        Some(plot_id) => record_plot_payment(txn, request, plot_id, config, time),
        None => record_service_payment(txn, request, time),
    }
}

fn record_plot_payment(
    txn: &mut LedgerTxn<'_>,
    request: &PaymentRequest,
    plot_id: PlotId,
    config: &LedgerConfig,
    time: &SafeTimeProvider,
) -> Result<PaymentOutcome> {
    let plot = txn.plot(plot_id)?.clone();
    let prior_total = confirmed_total(txn.entries_for_plot(plot_id).into_iter());

    // consistency checks inside the transaction that performs the write
    if prior_total >= plot.price {
        return Err(LedgerError::PlotAlreadyOccupied { plot_id });
    }

    let active_on_plot = txn.active_entry_for_plot(plot_id).cloned();

    if request.plan_type == PlanType::DownPayment {
        if let Some(active) = txn.active_entry_for_user(request.user_id) {
            // one in-flight plan per user; same-plot continuation is fine
            if active.plot_id != Some(plot_id) {
                return Err(LedgerError::ActivePlanConflict {
                    user_id: request.user_id,
                    existing_plot: active.plot_id.unwrap_or(plot_id),
                });
            }
        }
    }

    let mut events = EventStore::new();
    let now = time.now();
    let remaining = plot.price - prior_total;

    let (status, outcome) = match request.plan_type {
        PlanType::FullPayment => {
            if request.amount < remaining {
                return Err(LedgerError::InvalidAmount {
                    amount: request.amount,
                    reason: format!("full payment must cover the remaining balance of {}", remaining),
                });
            }
            (PaymentStatus::Paid, None)
        }
        PlanType::DownPayment => {
            let outcome = match &active_on_plot {
                Some(active) => {
                    let cycles = plan_cycles(txn, plot_id);
                    let plan = PlanState::from_entry(active, cycles);
                    schedule::apply_cycle(
                        plan.as_ref(),
                        plot_id,
                        request.amount,
                        plot.price,
                        config,
                        time,
                    )
                }
                None if prior_total.is_positive() => {
                    // partial history but no plan row: drift, repair softly
                    schedule::seed_plan(plot_id, request.amount, prior_total, plot.price, config, time)
                }
                None => {
                    let min_down = config.min_down_payment(plot.price);
                    if request.amount < min_down {
                        return Err(LedgerError::InvalidAmount {
                            amount: request.amount,
                            reason: format!("down payment below minimum of {}", min_down),
                        });
                    }
                    if request.amount >= plot.price {
                        return Err(LedgerError::InvalidAmount {
                            amount: request.amount,
                            reason: "down payment covers the full price, use a full payment".to_string(),
                        });
                    }
                    schedule::open_plan(
                        request.amount,
                        prior_total,
                        plot.price,
                        request.per_cycle_amount,
                        request.cycle_count,
                        config,
                        time,
                    )
                }
            };
            let status = if outcome.completed { PaymentStatus::Paid } else { PaymentStatus::Active };
            (status, Some(outcome))
        }
    };

    // settle the superseded plan line so at most one row stays active
    if let Some(active) = &active_on_plot {
        let payment_id = active.payment_id;
        if let Some(prev) = txn.entry_mut(payment_id) {
            let old_status = prev.status;
            prev.status = PaymentStatus::Paid;
            prev.due_date = None;
            events.emit(Event::PaymentStatusChanged {
                payment_id,
                old_status,
                new_status: PaymentStatus::Paid,
                timestamp: now,
            });
        }
    }

    let new_total = prior_total + request.amount;
    let entry = PaymentEntry {
        payment_id: txn.next_payment_id(),
        booking_id: request.booking_id,
        plot_id: Some(plot_id),
        user_id: request.user_id,
        amount: request.amount,
        method: request.method,
        external_ref: request.external_ref.clone(),
        plan_type: request.plan_type,
        status,
        due_date: outcome.as_ref().filter(|o| !o.completed).map(|o| o.due_date),
        per_cycle_amount: outcome.as_ref().map(|o| o.per_cycle_amount),
        cycle_count: outcome.as_ref().map(|o| o.cycle_count),
        total_paid: new_total,
        recorded_at: now,
    };

    events.emit(Event::PaymentRecorded {
        payment_id: entry.payment_id,
        booking_id: entry.booking_id,
        plot_id: entry.plot_id,
        user_id: entry.user_id,
        amount: entry.amount,
        method: entry.method,
        plan_type: entry.plan_type,
        timestamp: now,
    });
    emit_plan_events(&mut events, plot_id, request, plot.price, outcome.as_ref(), new_total, now);

    debug!(
        payment_id = entry.payment_id,
        plot_id = %plot_id,
        amount = %entry.amount,
        total = %new_total,
        "payment confirmation accepted"
    );
    txn.append_entry(entry.clone());

    // derive downstream state within the same transaction boundary
    let availability = apply_availability(
        txn,
        plot_id,
        new_total,
        Some(request.user_id),
        config,
        &mut events,
        time,
    )?;
    booking::sync_with_availability(txn, request.booking_id, availability, &mut events, time)?;

    Ok(PaymentOutcome {
        entry,
        availability: Some(availability),
        booking_status: txn.booking(request.booking_id)?.status,
        duplicate: false,
        events: events.take_events(),
    })
}

/// payment toward a non-plot service (memorial visit, burial service)
fn record_service_payment(
    txn: &mut LedgerTxn<'_>,
    request: &PaymentRequest,
    time: &SafeTimeProvider,
) -> Result<PaymentOutcome> {
    if request.plan_type == PlanType::DownPayment {
        return Err(LedgerError::InvalidAmount {
            amount: request.amount,
            reason: "installment plans require a plot".to_string(),
        });
    }

    let mut events = EventStore::new();
    let now = time.now();
    let prior_total = confirmed_total(txn.entries_for_booking(request.booking_id).into_iter());

    let entry = PaymentEntry {
        payment_id: txn.next_payment_id(),
        booking_id: request.booking_id,
        plot_id: None,
        user_id: request.user_id,
        amount: request.amount,
        method: request.method,
        external_ref: request.external_ref.clone(),
        plan_type: request.plan_type,
        status: PaymentStatus::Paid,
        due_date: None,
        per_cycle_amount: None,
        cycle_count: None,
        total_paid: prior_total + request.amount,
        recorded_at: now,
    };

    events.emit(Event::PaymentRecorded {
        payment_id: entry.payment_id,
        booking_id: entry.booking_id,
        plot_id: None,
        user_id: entry.user_id,
        amount: entry.amount,
        method: entry.method,
        plan_type: entry.plan_type,
        timestamp: now,
    });
    txn.append_entry(entry.clone());

    Ok(PaymentOutcome {
        entry,
        availability: None,
        booking_status: txn.booking(request.booking_id)?.status,
        duplicate: false,
        events: events.take_events(),
    })
}

/// recompute availability through the resolver and cache it on the plot;
/// shared with reconciliation
pub(crate) fn apply_availability(
    txn: &mut LedgerTxn<'_>,
    plot_id: PlotId,
    total_paid: Money,
    payer: Option<UserId>,
    config: &LedgerConfig,
    events: &mut EventStore,
    time: &SafeTimeProvider,
) -> Result<Availability> {
    let now = time.now();
    let plot = txn.plot_mut(plot_id)?;
    let new_availability = resolver::resolve(plot.price, total_paid, config);
    let old_availability = plot.availability;

    if new_availability == Availability::Occupied && plot.owner.is_none() {
        plot.owner = payer;
    }
    if old_availability != new_availability {
        plot.availability = new_availability;
        events.emit(Event::PlotAvailabilityChanged {
            plot_id,
            old_availability,
            new_availability,
            total_paid,
            timestamp: now,
        });
    }
    Ok(new_availability)
}

fn emit_plan_events(
    events: &mut EventStore,
    plot_id: PlotId,
    request: &PaymentRequest,
    price: Money,
    outcome: Option<&CycleOutcome>,
    new_total: Money,
    now: chrono::DateTime<chrono::Utc>,
) {
    let Some(outcome) = outcome else {
        return;
    };

    if outcome.seeded {
        events.emit(Event::PlanSeeded {
            plot_id,
            amount: request.amount,
            next_due: outcome.due_date,
        });
    } else if outcome.cycle_number == 1 {
        events.emit(Event::PlanOpened {
            plot_id,
            user_id: request.user_id,
            down_payment: request.amount,
            per_cycle_amount: outcome.per_cycle_amount,
            cycle_count: outcome.cycle_count,
            next_due: outcome.due_date,
        });
    } else {
        events.emit(Event::PlanCycleApplied {
            plot_id,
            cycle_number: outcome.cycle_number,
            amount: request.amount,
            total_paid: outcome.total_paid,
            next_due: outcome.due_date,
        });
    }

    if outcome.formula_divergence {
        events.emit(Event::PlanFormulaDivergence {
            plot_id,
            total_paid: outcome.total_paid,
            price,
            advisory_total: outcome.per_cycle_amount
                * rust_decimal::Decimal::from(outcome.cycle_count),
        });
    }

    if outcome.completed {
        events.emit(Event::PlanCompleted {
            plot_id,
            total_paid: new_total,
            timestamp: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::BookingController;
    use crate::model::{Booking, Plot};
    use crate::types::ServiceKind;
    use chrono::{Duration, TimeZone, Utc};
    use hourglass_rs::TimeSource;
    use uuid::Uuid;

    struct Fixture {
        ledger: PaymentLedger,
        store: Arc<LedgerStore>,
        plot_id: PlotId,
        booking_id: BookingId,
        user_id: UserId,
        time: SafeTimeProvider,
    }

    fn fixture(price: i64) -> Fixture {
        let store = Arc::new(LedgerStore::new());
        let ledger = PaymentLedger::new(store.clone(), LedgerConfig::standard());
        let time = SafeTimeProvider::new(TimeSource::Test(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));

        let plot_id = Uuid::new_v4();
        let booking_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        store.insert_plot(Plot::new(plot_id, Money::from_major(price))).unwrap();
        store
            .insert_booking(Booking::new(
                booking_id,
                Some(plot_id),
                user_id,
                ServiceKind::Plot,
                time.now(),
            ))
            .unwrap();

        Fixture { ledger, store, plot_id, booking_id, user_id, time }
    }

    fn request(f: &Fixture, amount: &str, plan_type: PlanType, key: &str) -> PaymentRequest {
        PaymentRequest {
            booking_id: f.booking_id,
            plot_id: Some(f.plot_id),
            user_id: f.user_id,
            amount: Money::from_str_exact(amount).unwrap(),
            method: PaymentMethod::Card,
            plan_type,
            external_ref: Some(key.to_string()),
            cycle_count: None,
            per_cycle_amount: None,
        }
    }

    fn assert_single_active(f: &Fixture) {
        let actives = f
            .store
            .entries_for_plot(f.plot_id)
            .unwrap()
            .iter()
            .filter(|e| e.is_active())
            .count();
        assert!(actives <= 1, "more than one active plan line on the plot");
    }

    #[test]
    fn test_full_payment_occupies_and_approves() {
        let f = fixture(100_000);

        let outcome = f
            .ledger
            .record_payment(request(&f, "100000", PlanType::FullPayment, "gw-1"), &f.time)
            .unwrap();

        assert!(!outcome.duplicate);
        assert_eq!(outcome.availability, Some(Availability::Occupied));
        assert_eq!(outcome.booking_status, BookingStatus::Approved);
        assert_eq!(outcome.entry.status, PaymentStatus::Paid);

        let plot = f.store.plot(f.plot_id).unwrap();
        assert_eq!(plot.availability, Availability::Occupied);
        assert_eq!(plot.owner, Some(f.user_id));
        assert_single_active(&f);
    }

    #[test]
    fn test_down_payment_then_cycles_to_completion() {
        let f = fixture(100_000);
        let control = f.time.test_control().unwrap();
        let start = f.time.now();

        // 20,000 down: plot reserved, plan active, due in 30 days
        let outcome = f
            .ledger
            .record_payment(request(&f, "20000", PlanType::DownPayment, "gw-1"), &f.time)
            .unwrap();
        assert_eq!(outcome.availability, Some(Availability::Reserved));
        assert_eq!(outcome.booking_status, BookingStatus::Approved);
        assert_eq!(outcome.entry.status, PaymentStatus::Active);
        assert_eq!(outcome.entry.due_date, Some(start + Duration::days(30)));

        let plan = f.ledger.current_plan_state(f.plot_id).unwrap().unwrap();
        assert_eq!(plan.per_cycle_amount, Money::from_str_exact("26666.67").unwrap());
        assert_eq!(plan.cycle_count, 3);

        // three cycle payments of 26,667
        for (i, key) in ["gw-2", "gw-3", "gw-4"].iter().enumerate() {
            control.advance(Duration::days(30));
            let outcome = f
                .ledger
                .record_payment(request(&f, "26667", PlanType::DownPayment, key), &f.time)
                .unwrap();
            assert_single_active(&f);
            if i < 2 {
                assert_eq!(outcome.availability, Some(Availability::Reserved));
                assert_eq!(outcome.entry.status, PaymentStatus::Active);
                // due date rolls from the previous due date, 30 calendar days
                assert_eq!(
                    outcome.entry.due_date,
                    Some(start + Duration::days(30 * (i as i64 + 2)))
                );
            } else {
                // 20,000 + 3 x 26,667 = 100,001 >= price
                assert_eq!(outcome.availability, Some(Availability::Occupied));
                assert_eq!(outcome.entry.status, PaymentStatus::Paid);
                assert!(outcome.events.iter().any(|e| matches!(e, Event::PlanCompleted { .. })));
            }
        }

        assert!(f.ledger.current_plan_state(f.plot_id).unwrap().is_none());
        assert_eq!(f.store.plot(f.plot_id).unwrap().availability, Availability::Occupied);
    }

    #[test]
    fn test_superseded_plan_line_settles_without_due_date() {
        let f = fixture(100_000);
        let control = f.time.test_control().unwrap();

        let down = f
            .ledger
            .record_payment(request(&f, "20000", PlanType::DownPayment, "gw-1"), &f.time)
            .unwrap();
        control.advance(Duration::days(30));
        f.ledger
            .record_payment(request(&f, "26667", PlanType::DownPayment, "gw-2"), &f.time)
            .unwrap();

        // the down-payment line was superseded by the cycle line
        let entries = f.store.entries_for_plot(f.plot_id).unwrap();
        let settled = entries
            .iter()
            .find(|e| e.payment_id == down.entry.payment_id)
            .unwrap();
        assert_eq!(settled.status, PaymentStatus::Paid);
        assert_eq!(settled.due_date, None);
        assert_single_active(&f);
    }

    #[test]
    fn test_divergent_formula_surfaces_event_on_completion() {
        let f = fixture(100_000);
        let control = f.time.test_control().unwrap();

        // staff-entered terms promise 3 x 40,000 on top of the 20,000 down
        let mut req = request(&f, "20000", PlanType::DownPayment, "gw-1");
        req.per_cycle_amount = Some(Money::from_major(40_000));
        req.cycle_count = Some(3);
        f.ledger.record_payment(req, &f.time).unwrap();

        control.advance(Duration::days(30));
        let outcome = f
            .ledger
            .record_payment(request(&f, "40000", PlanType::DownPayment, "gw-2"), &f.time)
            .unwrap();
        assert!(!outcome.events.iter().any(|e| matches!(e, Event::PlanFormulaDivergence { .. })));

        // 100,000 reaches the price one cycle short of the entered schedule
        control.advance(Duration::days(30));
        let outcome = f
            .ledger
            .record_payment(request(&f, "40000", PlanType::DownPayment, "gw-3"), &f.time)
            .unwrap();

        assert_eq!(outcome.entry.status, PaymentStatus::Paid);
        assert_eq!(outcome.availability, Some(Availability::Occupied));
        assert!(outcome.events.iter().any(|e| matches!(
            e,
            Event::PlanFormulaDivergence { total_paid, .. }
                if *total_paid == Money::from_major(100_000)
        )));
        assert!(outcome.events.iter().any(|e| matches!(e, Event::PlanCompleted { .. })));
    }

    #[test]
    fn test_plot_view_round_trips_through_json() {
        let f = fixture(100_000);
        f.ledger
            .record_payment(request(&f, "20000", PlanType::DownPayment, "gw-1"), &f.time)
            .unwrap();

        let view = f.ledger.plot_view(f.plot_id).unwrap();
        assert_eq!(view.availability, Availability::Reserved);
        assert_eq!(view.total_paid, Money::from_major(20_000));
        assert_eq!(view.entries.len(), 1);
        assert_eq!(view.plan.as_ref().unwrap().cycle_count, 3);

        let json = view.to_json_pretty().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["availability"], "Reserved");
        assert_eq!(parsed["total_paid"], "20000");
        assert_eq!(parsed["plan"]["per_cycle_amount"], "26666.67");
        assert_eq!(parsed["entries"][0]["status"], "Active");
    }

    #[test]
    fn test_duplicate_confirmation_replays_without_writing() {
        let f = fixture(100_000);

        let first = f
            .ledger
            .record_payment(request(&f, "20000", PlanType::DownPayment, "gw-1"), &f.time)
            .unwrap();
        let replay = f
            .ledger
            .record_payment(request(&f, "20000", PlanType::DownPayment, "gw-1"), &f.time)
            .unwrap();

        assert!(replay.duplicate);
        assert!(replay.events.is_empty());
        assert_eq!(replay.entry.payment_id, first.entry.payment_id);
        assert_eq!(f.store.entries_for_plot(f.plot_id).unwrap().len(), 1);
        assert_eq!(replay.availability, Some(Availability::Reserved));
    }

    #[test]
    fn test_cross_plot_plan_conflict() {
        let f = fixture(100_000);
        f.ledger
            .record_payment(request(&f, "20000", PlanType::DownPayment, "gw-1"), &f.time)
            .unwrap();

        // same user opens a plan on a second plot
        let other_plot = Uuid::new_v4();
        let other_booking = Uuid::new_v4();
        f.store.insert_plot(Plot::new(other_plot, Money::from_major(50_000))).unwrap();
        f.store
            .insert_booking(Booking::new(
                other_booking,
                Some(other_plot),
                f.user_id,
                ServiceKind::Plot,
                f.time.now(),
            ))
            .unwrap();

        let mut req = request(&f, "10000", PlanType::DownPayment, "gw-2");
        req.plot_id = Some(other_plot);
        req.booking_id = other_booking;

        let err = f.ledger.record_payment(req, &f.time).unwrap_err();
        assert!(matches!(err, LedgerError::ActivePlanConflict { .. }));
        // the rejected request wrote nothing
        assert!(f.store.entries_for_plot(other_plot).unwrap().is_empty());

        // same-plot continuation is allowed
        f.ledger
            .record_payment(request(&f, "26667", PlanType::DownPayment, "gw-3"), &f.time)
            .unwrap();
    }

    #[test]
    fn test_occupied_plot_rejects_further_payment() {
        let f = fixture(100_000);
        f.ledger
            .record_payment(request(&f, "100000", PlanType::FullPayment, "gw-1"), &f.time)
            .unwrap();

        let err = f
            .ledger
            .record_payment(request(&f, "100000", PlanType::FullPayment, "gw-2"), &f.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::PlotAlreadyOccupied { .. }));
        assert_eq!(f.store.entries_for_plot(f.plot_id).unwrap().len(), 1);
    }

    #[test]
    fn test_amount_validation() {
        let f = fixture(100_000);

        let err = f
            .ledger
            .record_payment(request(&f, "0", PlanType::FullPayment, "gw-1"), &f.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));

        // below the 20% minimum
        let err = f
            .ledger
            .record_payment(request(&f, "19999.99", PlanType::DownPayment, "gw-2"), &f.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));

        // full payment must cover the whole remaining balance
        let err = f
            .ledger
            .record_payment(request(&f, "99999.99", PlanType::FullPayment, "gw-3"), &f.time)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));

        // nothing was written by any rejection
        assert!(f.store.entries_for_plot(f.plot_id).unwrap().is_empty());
        assert_eq!(f.store.plot(f.plot_id).unwrap().availability, Availability::Available);
    }

    #[test]
    fn test_cash_payment_forces_method() {
        let f = fixture(50_000);
        let mut req = request(&f, "50000", PlanType::FullPayment, "cash-1");
        req.method = PaymentMethod::Card;

        let outcome = f.ledger.record_cash_payment(req, &f.time).unwrap();
        assert_eq!(outcome.entry.method, PaymentMethod::Cash);
        assert_eq!(outcome.availability, Some(Availability::Occupied));
    }

    #[test]
    fn test_cancel_blocked_after_confirmed_payment() {
        let f = fixture(100_000);
        let controller = BookingController::new(f.store.clone(), *f.ledger.config());

        // burial service booking with one confirmed 5,000 payment
        let booking_id = Uuid::new_v4();
        f.store
            .insert_booking(Booking::new(
                booking_id,
                None,
                f.user_id,
                ServiceKind::Burial,
                f.time.now(),
            ))
            .unwrap();
        let mut req = request(&f, "5000", PlanType::FullPayment, "gw-1");
        req.booking_id = booking_id;
        req.plot_id = None;
        f.ledger.record_payment(req, &f.time).unwrap();

        let err = controller.cancel(booking_id, &f.time).unwrap_err();
        match err {
            LedgerError::CancellationBlocked { confirmed, .. } => {
                assert_eq!(confirmed, Money::from_major(5_000));
            }
            other => panic!("expected CancellationBlocked, got {:?}", other),
        }
        assert_eq!(f.store.booking(booking_id).unwrap().status, BookingStatus::Pending);

        // a plot booking with a confirmed down payment is blocked the same way
        f.ledger
            .record_payment(request(&f, "20000", PlanType::DownPayment, "gw-2"), &f.time)
            .unwrap();
        let err = controller.cancel(f.booking_id, &f.time).unwrap_err();
        assert!(matches!(err, LedgerError::CancellationBlocked { .. }));
    }

    #[test]
    fn test_non_plot_service_payment() {
        let f = fixture(100_000);
        let booking_id = Uuid::new_v4();
        f.store
            .insert_booking(Booking::new(
                booking_id,
                None,
                f.user_id,
                ServiceKind::Burial,
                f.time.now(),
            ))
            .unwrap();

        let mut req = request(&f, "3500", PlanType::FullPayment, "gw-svc");
        req.booking_id = booking_id;
        req.plot_id = None;

        let outcome = f.ledger.record_payment(req, &f.time).unwrap();
        assert_eq!(outcome.availability, None);
        assert_eq!(outcome.entry.status, PaymentStatus::Paid);
        // approval of non-plot services is a staff action, not a payment side effect
        assert_eq!(outcome.booking_status, BookingStatus::Pending);

        // installments without a plot make no sense
        let mut req = request(&f, "3500", PlanType::DownPayment, "gw-svc2");
        req.booking_id = booking_id;
        req.plot_id = None;
        let err = f.ledger.record_payment(req, &f.time).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
    }

    #[test]
    fn test_list_entries_pagination() {
        let f = fixture(100_000);
        f.ledger
            .record_payment(request(&f, "20000", PlanType::DownPayment, "gw-1"), &f.time)
            .unwrap();
        for key in ["gw-2", "gw-3", "gw-4"] {
            f.ledger
                .record_payment(request(&f, "26667", PlanType::DownPayment, key), &f.time)
                .unwrap();
        }

        let page1 = f.ledger.list_entries(f.plot_id, 0, 3).unwrap();
        assert_eq!(page1.entries.len(), 3);
        assert_eq!(page1.next_offset, Some(3));
        // chronological: monotonic payment ids
        assert!(page1.entries.windows(2).all(|w| w[0].payment_id < w[1].payment_id));

        let page2 = f.ledger.list_entries(f.plot_id, 3, 3).unwrap();
        assert_eq!(page2.entries.len(), 1);
        assert_eq!(page2.next_offset, None);

        // restartable: re-reading the first page gives the same slice
        let again = f.ledger.list_entries(f.plot_id, 0, 3).unwrap();
        assert_eq!(again, page1);
    }

    #[test]
    fn test_availability_always_matches_resolver() {
        let f = fixture(100_000);
        let keys = ["gw-1", "gw-2", "gw-3", "gw-4"];
        let amounts = ["20000", "26667", "26667", "26667"];

        for (key, amount) in keys.iter().zip(amounts) {
            f.ledger
                .record_payment(request(&f, amount, PlanType::DownPayment, key), &f.time)
                .unwrap();

            let plot = f.store.plot(f.plot_id).unwrap();
            let total = confirmed_total(f.store.entries_for_plot(f.plot_id).unwrap().iter());
            assert_eq!(
                plot.availability,
                resolver::resolve(plot.price, total, f.ledger.config())
            );
        }
    }

    #[test]
    fn test_racing_full_payments_one_wins() {
        let f = fixture(100_000);
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut handles = Vec::new();
        for i in 0..2 {
            let ledger = f.ledger.clone();
            let booking_id = f.booking_id;
            let plot_id = f.plot_id;
            handles.push(std::thread::spawn(move || {
                let t = SafeTimeProvider::new(TimeSource::Test(time));
                ledger.record_payment(
                    PaymentRequest {
                        booking_id,
                        plot_id: Some(plot_id),
                        user_id: Uuid::new_v4(),
                        amount: Money::from_major(100_000),
                        method: PaymentMethod::Card,
                        plan_type: PlanType::FullPayment,
                        external_ref: Some(format!("race-{}", i)),
                        cycle_count: None,
                        per_cycle_amount: None,
                    },
                    &t,
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(LedgerError::PlotAlreadyOccupied { .. }))));
        assert_eq!(f.store.entries_for_plot(f.plot_id).unwrap().len(), 1);
        assert_eq!(f.store.plot(f.plot_id).unwrap().availability, Availability::Occupied);
    }
}

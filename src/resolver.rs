use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::types::Availability;

/// compute a plot's availability from its price and confirmed total
///
/// Pure and total; every write path and the reconciliation job call this
/// instead of re-deriving locally. Comparisons happen at 2 dp because
/// `Money` rounds half-up on construction and arithmetic.
pub fn resolve(price: Money, total_paid: Money, config: &LedgerConfig) -> Availability {
    if !total_paid.is_positive() {
        return Availability::Available;
    }
    if total_paid >= price {
        return Availability::Occupied;
    }
    if total_paid >= config.min_down_payment(price) {
        Availability::Reserved
    } else {
        // below the reservation threshold, not yet a valid reservation
        Availability::Available
    }
}

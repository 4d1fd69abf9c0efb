use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};

/// ledger engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// fraction of the plot price required to open a reservation
    pub min_down_payment_rate: Rate,
    /// calendar days between installment due dates
    pub cycle_days: i64,
    /// cycles assumed for a plan when the gateway supplies none
    pub default_cycle_count: u32,
}

impl LedgerConfig {
    /// standard terms: 20% down, 30-day cycles, 3 follow-up cycles
    pub fn standard() -> Self {
        Self {
            min_down_payment_rate: Rate::from_decimal(dec!(0.20)),
            cycle_days: 30,
            default_cycle_count: 3,
        }
    }

    /// custom terms
    pub fn new(min_down_payment_rate: Rate, cycle_days: i64, default_cycle_count: u32) -> Result<Self> {
        let config = Self {
            min_down_payment_rate,
            cycle_days,
            default_cycle_count,
        };
        config.validate()?;
        Ok(config)
    }

    /// validate terms
    pub fn validate(&self) -> Result<()> {
        if self.min_down_payment_rate <= Rate::ZERO || self.min_down_payment_rate >= Rate::ONE {
            return Err(LedgerError::InvalidConfiguration {
                message: format!(
                    "min down-payment rate must be within (0, 1), got {}",
                    self.min_down_payment_rate
                ),
            });
        }
        if self.cycle_days <= 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: format!("cycle length must be positive, got {} days", self.cycle_days),
            });
        }
        if self.default_cycle_count == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "default cycle count must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// minimum down payment for a plot price
    pub fn min_down_payment(&self, price: Money) -> Money {
        price.percentage(self.min_down_payment_rate)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::standard()
    }
}

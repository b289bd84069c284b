//! Exchange tick and lot constraints and the rounding helpers built on them.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Price and quantity constraints for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Returns false when a tick or step size is not positive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.tick_size > Decimal::ZERO && self.step_size > Decimal::ZERO
    }

    #[must_use]
    pub fn round_price(&self, price: Decimal) -> Decimal {
        round_to_tick(price, self.tick_size)
    }
}

/// Rounds `price` to the nearest multiple of `tick`, halves away from zero.
#[must_use]
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    ((price / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * tick)
        .normalize()
}

/// Largest multiple of `step` not above `quantity`.
#[must_use]
pub fn floor_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    ((quantity / step).floor() * step).normalize()
}

/// Smallest multiple of `step` not below `quantity`.
#[must_use]
pub fn ceil_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    ((quantity / step).ceil() * step).normalize()
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::filters::{ceil_to_step, floor_to_step, SymbolFilters};

/// A correction applied while fitting a quantity to exchange filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantityAdjustment {
    /// Quantity was raised to the exchange minimum lot.
    MinQty { from: Decimal, to: Decimal },
    /// Quantity was raised so that `qty × price` reaches the minimum notional.
    MinNotional { from: Decimal, to: Decimal },
}

impl std::fmt::Display for QuantityAdjustment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MinQty { from, to } => {
                write!(f, "quantity {from} below minimum lot, raised to {to}")
            }
            Self::MinNotional { from, to } => {
                write!(f, "notional of {from} below minimum, quantity raised to {to}")
            }
        }
    }
}

/// Order quantity ready for submission plus the corrections it took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityPlan {
    pub quantity: Decimal,
    pub raw_quantity: Decimal,
    pub adjustments: Vec<QuantityAdjustment>,
}

/// Converts a margin budget into an order quantity that satisfies `filters`.
///
/// `raw = margin × leverage / price`, floored to the step size, then raised to
/// `min_qty` and to `ceil_to_step(min_notional / price)` when short.
///
/// Returns `None` when the price is not positive or the filters are unusable.
#[must_use]
pub fn normalize_quantity(
    margin: Decimal,
    leverage: u32,
    price: Decimal,
    filters: &SymbolFilters,
) -> Option<QuantityPlan> {
    if price <= Decimal::ZERO || !filters.is_valid() {
        return None;
    }

    let raw_quantity = margin * Decimal::from(leverage) / price;
    let mut quantity = floor_to_step(raw_quantity, filters.step_size);
    let mut adjustments = Vec::new();

    if quantity < filters.min_qty {
        let to = ceil_to_step(filters.min_qty, filters.step_size);
        adjustments.push(QuantityAdjustment::MinQty { from: quantity, to });
        quantity = to;
    }

    if quantity * price < filters.min_notional {
        let to = ceil_to_step(filters.min_notional / price, filters.step_size);
        adjustments.push(QuantityAdjustment::MinNotional { from: quantity, to });
        quantity = to;
    }

    Some(QuantityPlan {
        quantity,
        raw_quantity,
        adjustments,
    })
}

/// Margin locked by a position of `notional` at `leverage`.
#[must_use]
pub fn required_margin(notional: Decimal, leverage: u32) -> Decimal {
    if leverage == 0 {
        return notional;
    }
    notional / Decimal::from(leverage)
}

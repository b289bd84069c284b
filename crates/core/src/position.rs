use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orders::OrderSide;

/// Direction of the single managed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    #[default]
    Flat,
}

impl Direction {
    /// Direction implied by a signed exchange quantity.
    #[must_use]
    pub fn from_signed_quantity(quantity: Decimal) -> Self {
        if quantity > Decimal::ZERO {
            Self::Long
        } else if quantity < Decimal::ZERO {
            Self::Short
        } else {
            Self::Flat
        }
    }

    /// Side of the market order that opens this direction.
    #[must_use]
    pub const fn entry_side(self) -> Option<OrderSide> {
        match self {
            Self::Long => Some(OrderSide::Buy),
            Self::Short => Some(OrderSide::Sell),
            Self::Flat => None,
        }
    }

    /// Side of any order that reduces or closes this direction.
    #[must_use]
    pub const fn closing_side(self) -> Option<OrderSide> {
        match self {
            Self::Long => Some(OrderSide::Sell),
            Self::Short => Some(OrderSide::Buy),
            Self::Flat => None,
        }
    }

    #[must_use]
    pub const fn is_flat(self) -> bool {
        matches!(self, Self::Flat)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Flat => write!(f, "FLAT"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Self::Long),
            "short" | "sell" => Ok(Self::Short),
            "flat" => Ok(Self::Flat),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Local belief about the managed position.
///
/// A flat snapshot always carries zero quantity and entry price so that
/// comparisons against a freshly reset snapshot are exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PositionSnapshot {
    pub is_open: bool,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

impl PositionSnapshot {
    /// A flat snapshot.
    #[must_use]
    pub fn flat() -> Self {
        Self::default()
    }

    /// An open snapshot built from a remote position.
    ///
    /// Returns a flat snapshot when the remote quantity is zero.
    #[must_use]
    pub fn from_remote(remote: &RemotePosition) -> Self {
        if remote.is_flat() {
            return Self::flat();
        }
        Self {
            is_open: true,
            direction: remote.direction(),
            entry_price: remote.entry_price,
            quantity: remote.quantity.abs(),
            leverage: remote.leverage,
            opened_at: Some(Utc::now()),
        }
    }

    #[must_use]
    pub const fn is_flat(&self) -> bool {
        !self.is_open
    }
}

/// Position as reported by the exchange. Quantity is signed: positive long,
/// negative short, zero flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RemotePosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
}

impl RemotePosition {
    /// A flat remote position for `symbol`.
    #[must_use]
    pub fn flat(symbol: impl Into<String>, leverage: u32) -> Self {
        Self {
            symbol: symbol.into(),
            leverage,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        Direction::from_signed_quantity(self.quantity)
    }
}

/// Realized P&L of closing `quantity` opened at `entry` and exited at `exit`.
///
/// `quantity` is taken as an absolute amount. Flat direction yields zero.
#[must_use]
pub fn realized_pnl(direction: Direction, entry: Decimal, exit: Decimal, quantity: Decimal) -> Decimal {
    let gross = (exit - entry) * quantity.abs();
    match direction {
        Direction::Long => gross,
        Direction::Short => -gross,
        Direction::Flat => Decimal::ZERO,
    }
}

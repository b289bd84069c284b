use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::filters::round_to_tick;
use crate::position::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
    Other(String),
}

impl OrderType {
    /// Parses the exchange's wire name (e.g. `STOP_MARKET`).
    #[must_use]
    pub fn from_wire(name: &str) -> Self {
        match name {
            "MARKET" => Self::Market,
            "LIMIT" => Self::Limit,
            "STOP_MARKET" => Self::StopMarket,
            "TAKE_PROFIT_MARKET" => Self::TakeProfitMarket,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::StopMarket => "STOP_MARKET",
            Self::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            Self::Other(name) => name,
        }
    }
}

/// The two protective order classes attached to an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtectiveKind {
    Stop,
    TakeProfit,
}

impl ProtectiveKind {
    #[must_use]
    pub const fn order_type(self) -> OrderType {
        match self {
            Self::Stop => OrderType::StopMarket,
            Self::TakeProfit => OrderType::TakeProfitMarket,
        }
    }
}

impl std::fmt::Display for ProtectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "SL"),
            Self::TakeProfit => write!(f, "TP"),
        }
    }
}

/// An order resting on the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub trigger_price: Option<Decimal>,
    pub close_position: bool,
    pub reduce_only: bool,
}

impl OpenOrder {
    /// True when this is a close-position order of `kind` on `side`.
    #[must_use]
    pub fn is_closing(&self, kind: ProtectiveKind, side: OrderSide) -> bool {
        self.close_position && self.side == side && self.order_type == kind.order_type()
    }

    /// True when this is any close-position STOP or TAKE_PROFIT order.
    #[must_use]
    pub fn is_protective(&self) -> bool {
        self.close_position
            && matches!(
                self.order_type,
                OrderType::StopMarket | OrderType::TakeProfitMarket
            )
    }
}

/// Exchange acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
    pub avg_price: Option<Decimal>,
    pub executed_qty: Decimal,
}

/// A protective order the guard wants to exist. Derived per pass, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectiveIntent {
    pub side: OrderSide,
    pub kind: ProtectiveKind,
    pub trigger_price: Decimal,
    pub close_position: bool,
}

/// Stop-loss and take-profit intents for a position, rounded to `tick`.
///
/// Returns `None` for a flat direction.
#[must_use]
pub fn protective_intents(
    direction: Direction,
    entry: Decimal,
    sl_pct: Decimal,
    tp_pct: Decimal,
    tick: Decimal,
) -> Option<[ProtectiveIntent; 2]> {
    let side = direction.closing_side()?;
    let (stop, take_profit) = match direction {
        Direction::Long => (entry * (Decimal::ONE - sl_pct), entry * (Decimal::ONE + tp_pct)),
        Direction::Short => (entry * (Decimal::ONE + sl_pct), entry * (Decimal::ONE - tp_pct)),
        Direction::Flat => return None,
    };
    Some([
        ProtectiveIntent {
            side,
            kind: ProtectiveKind::Stop,
            trigger_price: round_to_tick(stop, tick),
            close_position: true,
        },
        ProtectiveIntent {
            side,
            kind: ProtectiveKind::TakeProfit,
            trigger_price: round_to_tick(take_profit, tick),
            close_position: true,
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(order_type: OrderType, side: OrderSide, close_position: bool) -> OpenOrder {
        OpenOrder {
            id: "1".into(),
            order_type,
            side,
            trigger_price: Some(dec!(98)),
            close_position,
            reduce_only: false,
        }
    }

    #[test]
    fn test_long_protective_prices() {
        let [sl, tp] =
            protective_intents(Direction::Long, dec!(100), dec!(0.02), dec!(0.04), dec!(0.01))
                .unwrap();
        assert_eq!(sl.trigger_price, dec!(98.00));
        assert_eq!(tp.trigger_price, dec!(104.00));
        assert_eq!(sl.side, OrderSide::Sell);
        assert_eq!(tp.kind, ProtectiveKind::TakeProfit);
    }

    #[test]
    fn test_short_protective_prices() {
        let [sl, tp] =
            protective_intents(Direction::Short, dec!(100), dec!(0.02), dec!(0.04), dec!(0.01))
                .unwrap();
        assert_eq!(sl.trigger_price, dec!(102));
        assert_eq!(tp.trigger_price, dec!(96));
        assert_eq!(sl.side, OrderSide::Buy);
    }

    #[test]
    fn test_flat_has_no_intents() {
        assert!(
            protective_intents(Direction::Flat, dec!(100), dec!(0.02), dec!(0.04), dec!(0.01))
                .is_none()
        );
    }

    #[test]
    fn test_closing_classification() {
        let stop = order(OrderType::StopMarket, OrderSide::Sell, true);
        assert!(stop.is_closing(ProtectiveKind::Stop, OrderSide::Sell));
        assert!(!stop.is_closing(ProtectiveKind::Stop, OrderSide::Buy));
        assert!(!stop.is_closing(ProtectiveKind::TakeProfit, OrderSide::Sell));
        assert!(stop.is_protective());

        let non_closing = order(OrderType::StopMarket, OrderSide::Sell, false);
        assert!(!non_closing.is_closing(ProtectiveKind::Stop, OrderSide::Sell));
        assert!(!non_closing.is_protective());

        let limit = order(OrderType::Limit, OrderSide::Sell, true);
        assert!(!limit.is_protective());
    }

    #[test]
    fn test_order_type_wire_names() {
        assert_eq!(OrderType::from_wire("TAKE_PROFIT_MARKET"), OrderType::TakeProfitMarket);
        assert_eq!(
            OrderType::from_wire("TRAILING_STOP_MARKET"),
            OrderType::Other("TRAILING_STOP_MARKET".into())
        );
        assert_eq!(OrderType::StopMarket.as_wire(), "STOP_MARKET");
    }
}

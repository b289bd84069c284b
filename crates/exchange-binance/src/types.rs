//! Wire types for the Binance USDⓈ-M futures REST API.
//!
//! Binance encodes decimals as JSON strings; they are kept as strings here and
//! parsed into [`Decimal`] when converting into core types.

use crate::error::{BinanceError, Result};
use perp_keeper_core::{OpenOrder, OrderAck, OrderSide, OrderType, RemotePosition, SymbolFilters};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

/// Parses a Binance decimal string. Empty strings read as zero.
///
/// # Errors
/// Returns error if the string is not a decimal.
pub fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    if value.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(value)
        .map_err(|e| BinanceError::Serialization(format!("{field}: invalid decimal {value:?}: {e}")))
}

/// `{"code": -2011, "msg": "Unknown order sent."}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

// =============================================================================
// Account
// =============================================================================

/// Entry of `GET /fapi/v2/positionRisk`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPositionRisk {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
    #[serde(default)]
    pub mark_price: String,
    #[serde(default)]
    pub leverage: String,
    #[serde(default)]
    pub position_side: Option<String>,
}

impl RawPositionRisk {
    /// Converts into a core position.
    ///
    /// # Errors
    /// Returns error if a numeric field cannot be parsed.
    pub fn into_remote(self) -> Result<RemotePosition> {
        let leverage = if self.leverage.is_empty() {
            0
        } else {
            self.leverage
                .parse::<u32>()
                .map_err(|e| BinanceError::Serialization(format!("leverage: {e}")))?
        };
        Ok(RemotePosition {
            quantity: parse_decimal("positionAmt", &self.position_amt)?,
            entry_price: parse_decimal("entryPrice", &self.entry_price)?,
            mark_price: parse_decimal("markPrice", &self.mark_price)?,
            leverage,
            symbol: self.symbol,
        })
    }
}

/// `GET /fapi/v2/account`, reduced to the fields the gateway reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAccount {
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub positions: Vec<RawAccountPosition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAccountPosition {
    pub symbol: String,
    #[serde(default)]
    pub leverage: String,
}

/// Entry of `GET /fapi/v2/balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBalance {
    pub asset: String,
    #[serde(default)]
    pub balance: String,
    pub available_balance: String,
}

/// `POST /fapi/v1/leverage`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeverageResponse {
    pub leverage: u32,
    pub symbol: String,
}

// =============================================================================
// Orders
// =============================================================================

/// Entry of `GET /fapi/v1/openOrders`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOpenOrder {
    pub order_id: i64,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub stop_price: String,
    #[serde(default)]
    pub close_position: bool,
    #[serde(default)]
    pub reduce_only: bool,
}

impl RawOpenOrder {
    /// Converts into a core open order.
    ///
    /// # Errors
    /// Returns error on an unknown side or unparsable stop price.
    pub fn into_open_order(self) -> Result<OpenOrder> {
        let stop_price = parse_decimal("stopPrice", &self.stop_price)?;
        Ok(OpenOrder {
            id: self.order_id.to_string(),
            order_type: OrderType::from_wire(&self.order_type),
            side: parse_side(&self.side)?,
            trigger_price: (!stop_price.is_zero()).then_some(stop_price),
            close_position: self.close_position,
            reduce_only: self.reduce_only,
        })
    }
}

/// `POST /fapi/v1/order` acknowledgement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderResponse {
    pub order_id: i64,
    pub status: String,
    #[serde(default)]
    pub avg_price: Option<String>,
    #[serde(default)]
    pub executed_qty: Option<String>,
}

impl RawOrderResponse {
    /// Converts into a core order acknowledgement.
    ///
    /// # Errors
    /// Returns error if a numeric field cannot be parsed.
    pub fn into_ack(self) -> Result<OrderAck> {
        let avg_price = match self.avg_price.as_deref() {
            Some(p) => Some(parse_decimal("avgPrice", p)?).filter(|p| !p.is_zero()),
            None => None,
        };
        let executed_qty = match self.executed_qty.as_deref() {
            Some(q) => parse_decimal("executedQty", q)?,
            None => Decimal::ZERO,
        };
        Ok(OrderAck {
            order_id: self.order_id.to_string(),
            status: self.status,
            avg_price,
            executed_qty,
        })
    }
}

fn parse_side(side: &str) -> Result<OrderSide> {
    match side {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(BinanceError::Serialization(format!("unknown order side: {other}"))),
    }
}

// =============================================================================
// Market Data
// =============================================================================

/// `GET /fapi/v1/ticker/price`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTickerPrice {
    pub symbol: String,
    pub price: String,
}

/// `GET /fapi/v1/time`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServerTime {
    pub server_time: i64,
}

/// `GET /fapi/v1/exchangeInfo`, reduced to symbol filters.
#[derive(Debug, Clone, Deserialize)]
pub struct RawExchangeInfo {
    pub symbols: Vec<RawSymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<RawSymbolFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum RawSymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price { tick_size: String },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize { step_size: String, min_qty: String },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional { notional: String },
    #[serde(other)]
    Other,
}

impl RawSymbolInfo {
    /// Collects tick, lot and notional constraints.
    ///
    /// # Errors
    /// Returns error if the price or lot filter is missing.
    pub fn into_filters(self) -> Result<SymbolFilters> {
        let mut tick_size = None;
        let mut lot = None;
        let mut min_notional = Decimal::ZERO;

        for filter in self.filters {
            match filter {
                RawSymbolFilter::Price { tick_size: t } => {
                    tick_size = Some(parse_decimal("tickSize", &t)?);
                }
                RawSymbolFilter::LotSize { step_size, min_qty } => {
                    lot = Some((
                        parse_decimal("stepSize", &step_size)?,
                        parse_decimal("minQty", &min_qty)?,
                    ));
                }
                RawSymbolFilter::MinNotional { notional } => {
                    min_notional = parse_decimal("notional", &notional)?;
                }
                RawSymbolFilter::Other => {}
            }
        }

        let tick_size = tick_size.ok_or_else(|| {
            BinanceError::Serialization(format!("{}: missing PRICE_FILTER", self.symbol))
        })?;
        let (step_size, min_qty) = lot.ok_or_else(|| {
            BinanceError::Serialization(format!("{}: missing LOT_SIZE", self.symbol))
        })?;

        Ok(SymbolFilters {
            tick_size: tick_size.normalize(),
            step_size: step_size.normalize(),
            min_qty: min_qty.normalize(),
            min_notional: min_notional.normalize(),
        })
    }
}

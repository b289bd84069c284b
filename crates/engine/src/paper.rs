//! In-memory simulated futures exchange.
//!
//! `PaperExchange` implements [`ExchangeGateway`] against a single-symbol book
//! held in memory. Market orders fill at the current price, trigger orders rest
//! until [`PaperExchange::trigger_stops`] is called. It backs `--paper` sessions
//! and the engine tests, so it also carries failure injection and call
//! counters.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use perp_keeper_core::{
    Direction, ExchangeGateway, GatewayError, GatewayResult, OpenOrder, OrderAck, OrderSide,
    OrderType, ProtectiveKind, RemotePosition, SymbolFilters,
};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MAX_LEVERAGE: u32 = 125;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperExchangeConfig {
    pub symbol: String,
    pub initial_price: Decimal,
    /// Available margin balance.
    pub initial_balance: Decimal,
    pub leverage: u32,
    pub filters: SymbolFilters,
    /// When > 0, every call sleeps this long before touching the book.
    pub simulate_latency_ms: u64,
}

impl Default for PaperExchangeConfig {
    fn default() -> Self {
        Self {
            symbol: "ALGOUSDT".to_string(),
            initial_price: Decimal::new(25, 2),
            initial_balance: Decimal::new(1_000, 0),
            leverage: 2,
            filters: SymbolFilters {
                tick_size: Decimal::new(1, 4),
                step_size: Decimal::new(1, 1),
                min_qty: Decimal::new(1, 1),
                min_notional: Decimal::new(5, 0),
            },
            simulate_latency_ms: 0,
        }
    }
}

impl PaperExchangeConfig {
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    #[must_use]
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.initial_price = price;
        self
    }

    #[must_use]
    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.initial_balance = balance;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: SymbolFilters) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_latency_ms(mut self, ms: u64) -> Self {
        self.simulate_latency_ms = ms;
        self
    }
}

/// Gateway methods, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperCall {
    GetPosition,
    ListOpenOrders,
    PlaceMarketOrder,
    PlaceStopOrder,
    CancelOrder,
    SetLeverage,
    GetPrice,
    GetSymbolFilters,
    GetAccountBalance,
    DefaultLeverage,
    CanTrade,
}

// =============================================================================
// Book
// =============================================================================

#[derive(Debug)]
struct Book {
    price: Decimal,
    /// Signed: positive long, negative short.
    position: Decimal,
    entry_price: Decimal,
    leverage: u32,
    balance: Decimal,
    filters: SymbolFilters,
    can_trade: bool,
    orders: Vec<OpenOrder>,
    next_order_id: u64,
    failures: HashMap<PaperCall, VecDeque<GatewayError>>,
    calls: HashMap<PaperCall, u32>,
    hold_position_on_close: bool,
    no_fill: bool,
}

impl Book {
    fn next_id(&mut self) -> String {
        self.next_order_id += 1;
        self.next_order_id.to_string()
    }

    fn direction(&self) -> Direction {
        Direction::from_signed_quantity(self.position)
    }

    fn apply_fill(&mut self, side: OrderSide, quantity: Decimal, reduce_only: bool) -> Decimal {
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        if reduce_only {
            let reducing = self.position.signum() == -signed.signum();
            if !reducing || self.hold_position_on_close {
                return Decimal::ZERO;
            }
            let filled = quantity.min(self.position.abs());
            self.position += filled * signed.signum();
            if self.position.is_zero() {
                self.entry_price = Decimal::ZERO;
            }
            return filled;
        }

        let next = self.position + signed;
        if self.position.is_zero() || next.signum() != self.position.signum() {
            self.entry_price = self.price;
        } else if next.abs() > self.position.abs() {
            self.entry_price = (self.entry_price * self.position.abs() + self.price * quantity)
                / next.abs();
        }
        self.position = next;
        if self.position.is_zero() {
            self.entry_price = Decimal::ZERO;
        }
        quantity
    }

    fn stop_triggered(&self, order: &OpenOrder) -> bool {
        let Some(trigger) = order.trigger_price else {
            return false;
        };
        match (&order.order_type, order.side) {
            (OrderType::StopMarket, OrderSide::Sell) | (OrderType::TakeProfitMarket, OrderSide::Buy) => {
                self.price <= trigger
            }
            (OrderType::StopMarket, OrderSide::Buy) | (OrderType::TakeProfitMarket, OrderSide::Sell) => {
                self.price >= trigger
            }
            _ => false,
        }
    }
}

// =============================================================================
// Exchange
// =============================================================================

/// Simulated single-symbol futures account.
#[derive(Debug)]
pub struct PaperExchange {
    symbol: String,
    latency: Duration,
    book: Mutex<Book>,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new(PaperExchangeConfig::default())
    }
}

impl PaperExchange {
    #[must_use]
    pub fn new(config: PaperExchangeConfig) -> Self {
        Self {
            symbol: config.symbol,
            latency: Duration::from_millis(config.simulate_latency_ms),
            book: Mutex::new(Book {
                price: config.initial_price,
                position: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                leverage: config.leverage,
                balance: config.initial_balance,
                filters: config.filters,
                can_trade: true,
                orders: Vec::new(),
                next_order_id: 0,
                failures: HashMap::new(),
                calls: HashMap::new(),
                hold_position_on_close: false,
                no_fill: false,
            }),
        }
    }

    async fn enter(&self, call: PaperCall, symbol: Option<&str>) -> GatewayResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut book = self.book.lock();
        *book.calls.entry(call).or_default() += 1;
        if let Some(error) = book.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            debug!(?call, error = %error, "paper exchange injected failure");
            return Err(error);
        }
        match symbol {
            Some(s) if s != self.symbol => Err(GatewayError::InvalidRequest(format!(
                "unknown symbol {s}"
            ))),
            _ => Ok(()),
        }
    }

    // ==================== Test Controls ====================

    /// Queues `error` for the next call of `call`. Errors are consumed in order.
    pub fn fail_next(&self, call: PaperCall, error: GatewayError) {
        self.book
            .lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    #[must_use]
    pub fn calls(&self, call: PaperCall) -> u32 {
        self.book.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Reduce-only orders are acknowledged but leave the position untouched.
    pub fn hold_position_on_close(&self, hold: bool) {
        self.book.lock().hold_position_on_close = hold;
    }

    /// Market orders are acknowledged as NEW and never fill.
    pub fn no_fill(&self, no_fill: bool) {
        self.book.lock().no_fill = no_fill;
    }

    pub fn set_price(&self, price: Decimal) {
        self.book.lock().price = price;
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.book.lock().balance = balance;
    }

    pub fn set_can_trade(&self, can_trade: bool) {
        self.book.lock().can_trade = can_trade;
    }

    /// Changes leverage outside the engine, as the exchange UI would.
    pub fn set_leverage_external(&self, leverage: u32) {
        self.book.lock().leverage = leverage;
    }

    /// Opens a position at the current price without going through the gateway.
    pub fn open_external(&self, direction: Direction, quantity: Decimal) {
        let mut book = self.book.lock();
        book.position = match direction {
            Direction::Long => quantity.abs(),
            Direction::Short => -quantity.abs(),
            Direction::Flat => Decimal::ZERO,
        };
        book.entry_price = if book.position.is_zero() {
            Decimal::ZERO
        } else {
            book.price
        };
    }

    /// Flattens the position without touching resting orders.
    pub fn close_external(&self) {
        let mut book = self.book.lock();
        book.position = Decimal::ZERO;
        book.entry_price = Decimal::ZERO;
    }

    /// Places a resting order directly on the book.
    pub fn insert_order(&self, order_type: OrderType, side: OrderSide, trigger: Decimal, close_position: bool) -> String {
        let mut book = self.book.lock();
        let id = book.next_id();
        book.orders.push(OpenOrder {
            id: id.clone(),
            order_type,
            side,
            trigger_price: Some(trigger),
            close_position,
            reduce_only: !close_position,
        });
        id
    }

    /// Fires the first resting trigger order crossed by the current price.
    /// The fired order is removed; sibling orders stay on the book.
    pub fn trigger_stops(&self) -> Option<String> {
        let mut book = self.book.lock();
        let index = book.orders.iter().position(|o| {
            o.is_protective() && book.stop_triggered(o)
        })?;
        let order = book.orders.remove(index);
        if book.direction().closing_side() == Some(order.side) {
            book.position = Decimal::ZERO;
            book.entry_price = Decimal::ZERO;
        }
        debug!(order_id = %order.id, "paper trigger order fired");
        Some(order.id)
    }

    // ==================== Inspection ====================

    /// Signed position quantity.
    #[must_use]
    pub fn position(&self) -> Decimal {
        self.book.lock().position
    }

    #[must_use]
    pub fn orders(&self) -> Vec<OpenOrder> {
        self.book.lock().orders.clone()
    }

    /// Resting close-position orders of `kind`.
    #[must_use]
    pub fn protective_orders(&self, kind: ProtectiveKind) -> Vec<OpenOrder> {
        self.book
            .lock()
            .orders
            .iter()
            .filter(|o| o.close_position && o.order_type == kind.order_type())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn leverage(&self) -> u32 {
        self.book.lock().leverage
    }

    #[must_use]
    pub fn price(&self) -> Decimal {
        self.book.lock().price
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn get_position(&self, symbol: &str) -> GatewayResult<RemotePosition> {
        self.enter(PaperCall::GetPosition, Some(symbol)).await?;
        let book = self.book.lock();
        Ok(RemotePosition {
            symbol: self.symbol.clone(),
            quantity: book.position,
            entry_price: book.entry_price,
            mark_price: book.price,
            leverage: book.leverage,
        })
    }

    async fn list_open_orders(&self, symbol: &str) -> GatewayResult<Vec<OpenOrder>> {
        self.enter(PaperCall::ListOpenOrders, Some(symbol)).await?;
        Ok(self.book.lock().orders.clone())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> GatewayResult<OrderAck> {
        self.enter(PaperCall::PlaceMarketOrder, Some(symbol)).await?;
        let mut book = self.book.lock();
        if quantity <= Decimal::ZERO {
            return Err(GatewayError::InvalidRequest(format!("invalid quantity {quantity}")));
        }
        if quantity < book.filters.min_qty {
            return Err(GatewayError::InvalidRequest(format!(
                "quantity {quantity} below minimum {}",
                book.filters.min_qty
            )));
        }

        let order_id = book.next_id();
        if book.no_fill {
            return Ok(OrderAck {
                order_id,
                status: "NEW".to_string(),
                avg_price: None,
                executed_qty: Decimal::ZERO,
            });
        }

        let executed_qty = book.apply_fill(side, quantity, reduce_only);
        Ok(OrderAck {
            order_id,
            status: "FILLED".to_string(),
            avg_price: Some(book.price),
            executed_qty,
        })
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        kind: ProtectiveKind,
        trigger_price: Decimal,
        close_position: bool,
    ) -> GatewayResult<OrderAck> {
        self.enter(PaperCall::PlaceStopOrder, Some(symbol)).await?;
        let mut book = self.book.lock();
        if trigger_price <= Decimal::ZERO {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid trigger price {trigger_price}"
            )));
        }

        let order = OpenOrder {
            id: String::new(),
            order_type: kind.order_type(),
            side,
            trigger_price: Some(trigger_price),
            close_position,
            reduce_only: !close_position,
        };
        if book.stop_triggered(&order) {
            return Err(GatewayError::api(-2021, "Order would immediately trigger."));
        }

        let order_id = book.next_id();
        book.orders.push(OpenOrder {
            id: order_id.clone(),
            ..order
        });
        Ok(OrderAck {
            order_id,
            status: "NEW".to_string(),
            avg_price: None,
            executed_qty: Decimal::ZERO,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> GatewayResult<()> {
        self.enter(PaperCall::CancelOrder, Some(symbol)).await?;
        let mut book = self.book.lock();
        let index = book
            .orders
            .iter()
            .position(|o| o.id == order_id)
            .ok_or_else(|| GatewayError::unknown_order(order_id))?;
        book.orders.remove(index);
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        self.enter(PaperCall::SetLeverage, Some(symbol)).await?;
        if leverage == 0 || leverage > MAX_LEVERAGE {
            return Err(GatewayError::InvalidRequest(format!(
                "leverage {leverage} outside 1..={MAX_LEVERAGE}"
            )));
        }
        self.book.lock().leverage = leverage;
        Ok(())
    }

    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        self.enter(PaperCall::GetPrice, Some(symbol)).await?;
        Ok(self.book.lock().price)
    }

    async fn get_symbol_filters(&self, symbol: &str) -> GatewayResult<SymbolFilters> {
        self.enter(PaperCall::GetSymbolFilters, Some(symbol)).await?;
        Ok(self.book.lock().filters)
    }

    async fn get_account_balance(&self, _asset: &str) -> GatewayResult<Decimal> {
        self.enter(PaperCall::GetAccountBalance, None).await?;
        Ok(self.book.lock().balance)
    }

    async fn default_leverage(&self, symbol: &str) -> GatewayResult<u32> {
        self.enter(PaperCall::DefaultLeverage, Some(symbol)).await?;
        Ok(self.book.lock().leverage)
    }

    async fn can_trade(&self) -> GatewayResult<bool> {
        self.enter(PaperCall::CanTrade, None).await?;
        Ok(self.book.lock().can_trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "ALGOUSDT";

    fn exchange() -> PaperExchange {
        PaperExchange::new(PaperExchangeConfig::default().with_price(dec!(100)))
    }

    // ==================== Fill Tests ====================

    #[tokio::test]
    async fn test_market_order_opens_and_reduce_only_closes() {
        let paper = exchange();
        let ack = paper
            .place_market_order(SYMBOL, OrderSide::Sell, dec!(2), false)
            .await
            .unwrap();
        assert_eq!(ack.status, "FILLED");
        assert_eq!(ack.avg_price, Some(dec!(100)));

        let position = paper.get_position(SYMBOL).await.unwrap();
        assert_eq!(position.quantity, dec!(-2));
        assert_eq!(position.direction(), Direction::Short);

        paper.set_price(dec!(90));
        let ack = paper
            .place_market_order(SYMBOL, OrderSide::Buy, dec!(5), true)
            .await
            .unwrap();
        assert_eq!(ack.executed_qty, dec!(2));
        assert!(paper.get_position(SYMBOL).await.unwrap().is_flat());
    }

    #[tokio::test]
    async fn test_reduce_only_in_wrong_direction_is_noop() {
        let paper = exchange();
        paper.open_external(Direction::Long, dec!(1));
        let ack = paper
            .place_market_order(SYMBOL, OrderSide::Buy, dec!(1), true)
            .await
            .unwrap();
        assert_eq!(ack.executed_qty, dec!(0));
        assert_eq!(paper.position(), dec!(1));
    }

    #[tokio::test]
    async fn test_entry_price_averages_on_add() {
        let paper = exchange();
        paper.place_market_order(SYMBOL, OrderSide::Buy, dec!(1), false).await.unwrap();
        paper.set_price(dec!(110));
        paper.place_market_order(SYMBOL, OrderSide::Buy, dec!(1), false).await.unwrap();
        assert_eq!(paper.get_position(SYMBOL).await.unwrap().entry_price, dec!(105));
    }

    #[tokio::test]
    async fn test_no_fill_and_hold_position() {
        let paper = exchange();
        paper.no_fill(true);
        let ack = paper.place_market_order(SYMBOL, OrderSide::Buy, dec!(1), false).await.unwrap();
        assert_eq!(ack.status, "NEW");
        assert!(paper.position().is_zero());

        paper.no_fill(false);
        paper.open_external(Direction::Long, dec!(1));
        paper.hold_position_on_close(true);
        paper.place_market_order(SYMBOL, OrderSide::Sell, dec!(1), true).await.unwrap();
        assert_eq!(paper.position(), dec!(1));
    }

    // ==================== Trigger Order Tests ====================

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let paper = exchange();
        let err = paper.cancel_order(SYMBOL, "404").await.unwrap_err();
        assert!(err.is_unknown_order());
    }

    #[tokio::test]
    async fn test_stop_rejected_when_it_would_trigger() {
        let paper = exchange();
        let err = paper
            .place_stop_order(SYMBOL, OrderSide::Sell, ProtectiveKind::Stop, dec!(101), true)
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::api(-2021, "Order would immediately trigger."));
    }

    #[tokio::test]
    async fn test_trigger_stops_flattens_and_leaves_sibling() {
        let paper = exchange();
        paper.open_external(Direction::Long, dec!(1));
        paper
            .place_stop_order(SYMBOL, OrderSide::Sell, ProtectiveKind::Stop, dec!(98), true)
            .await
            .unwrap();
        paper
            .place_stop_order(SYMBOL, OrderSide::Sell, ProtectiveKind::TakeProfit, dec!(104), true)
            .await
            .unwrap();

        assert_eq!(paper.trigger_stops(), None);
        paper.set_price(dec!(97.5));
        assert!(paper.trigger_stops().is_some());
        assert!(paper.position().is_zero());
        assert_eq!(paper.orders().len(), 1);
        assert_eq!(paper.protective_orders(ProtectiveKind::TakeProfit).len(), 1);
    }

    // ==================== Failure Injection Tests ====================

    #[tokio::test]
    async fn test_fail_next_is_consumed_in_order() {
        let paper = exchange();
        paper.fail_next(PaperCall::GetPrice, GatewayError::Network("reset".into()));
        paper.fail_next(PaperCall::GetPrice, GatewayError::Timeout("slow".into()));

        assert!(matches!(paper.get_price(SYMBOL).await, Err(GatewayError::Network(_))));
        assert!(matches!(paper.get_price(SYMBOL).await, Err(GatewayError::Timeout(_))));
        assert_eq!(paper.get_price(SYMBOL).await.unwrap(), dec!(100));
        assert_eq!(paper.calls(PaperCall::GetPrice), 3);
    }

    #[tokio::test]
    async fn test_leverage_bounds_and_unknown_symbol() {
        let paper = exchange();
        assert!(paper.set_leverage(SYMBOL, 0).await.is_err());
        paper.set_leverage(SYMBOL, 5).await.unwrap();
        assert_eq!(paper.default_leverage(SYMBOL).await.unwrap(), 5);
        assert!(matches!(
            paper.get_position("BTCUSDT").await,
            Err(GatewayError::InvalidRequest(_))
        ));
    }
}

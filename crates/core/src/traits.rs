use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::GatewayResult;
use crate::filters::SymbolFilters;
use crate::orders::{OpenOrder, OrderAck, OrderSide, ProtectiveKind};
use crate::position::RemotePosition;

/// Remote futures exchange as seen by the engine.
///
/// Every call is a single request; retries are the caller's concern.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Current position on `symbol`. A flat position has zero quantity.
    async fn get_position(&self, symbol: &str) -> GatewayResult<RemotePosition>;

    async fn list_open_orders(&self, symbol: &str) -> GatewayResult<Vec<OpenOrder>>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> GatewayResult<OrderAck>;

    /// Places a STOP_MARKET or TAKE_PROFIT_MARKET trigger order.
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        kind: ProtectiveKind,
        trigger_price: Decimal,
        close_position: bool,
    ) -> GatewayResult<OrderAck>;

    /// Cancels an order. Fails with `GatewayError::UnknownOrder` when the
    /// order is already filled or cancelled.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> GatewayResult<()>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()>;

    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal>;

    async fn get_symbol_filters(&self, symbol: &str) -> GatewayResult<SymbolFilters>;

    /// Available (withdrawable) balance of `asset`.
    async fn get_account_balance(&self, asset: &str) -> GatewayResult<Decimal>;

    /// Leverage configured on the account for `symbol` while flat.
    async fn default_leverage(&self, symbol: &str) -> GatewayResult<u32>;

    /// Whether the credentials may trade futures.
    async fn can_trade(&self) -> GatewayResult<bool>;
}

/// Fire-and-forget sink for human-readable events.
///
/// Implementations must swallow their own delivery failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

//! [`ExchangeGateway`] implementation over [`BinanceClient`].

use crate::client::{BinanceClient, OrderParams};
use crate::error::BinanceError;
use crate::types::parse_decimal;
use async_trait::async_trait;
use perp_keeper_core::{
    ExchangeGateway, GatewayError, GatewayResult, OpenOrder, OrderAck, OrderSide, ProtectiveKind,
    RemotePosition, SymbolFilters,
};
use rust_decimal::Decimal;

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn get_position(&self, symbol: &str) -> GatewayResult<RemotePosition> {
        match self.position_risk(symbol).await {
            Ok(raw) => Ok(raw.into_remote()?),
            // No row for the symbol means nothing is held.
            Err(BinanceError::SymbolNotFound(_)) => Ok(RemotePosition::flat(symbol, 0)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_open_orders(&self, symbol: &str) -> GatewayResult<Vec<OpenOrder>> {
        self.open_orders(symbol)
            .await?
            .into_iter()
            .map(|raw| raw.into_open_order().map_err(GatewayError::from))
            .collect()
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> GatewayResult<OrderAck> {
        let params = OrderParams::market(symbol, side, quantity, reduce_only);
        Ok(self.new_order(&params).await?.into_ack()?)
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        kind: ProtectiveKind,
        trigger_price: Decimal,
        close_position: bool,
    ) -> GatewayResult<OrderAck> {
        let order_type = match kind {
            ProtectiveKind::Stop => "STOP_MARKET",
            ProtectiveKind::TakeProfit => "TAKE_PROFIT_MARKET",
        };
        let params = OrderParams::trigger(symbol, side, order_type, trigger_price, close_position);
        Ok(self.new_order(&params).await?.into_ack()?)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> GatewayResult<()> {
        self.delete_order(symbol, order_id)
            .await
            .map(|_| ())
            .map_err(|e| e.into_gateway_for_order(order_id))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        let response = self.change_leverage(symbol, leverage).await?;
        if response.leverage != leverage {
            return Err(GatewayError::InvalidResponse(format!(
                "requested leverage x{leverage}, exchange applied x{}",
                response.leverage
            )));
        }
        Ok(())
    }

    async fn get_price(&self, symbol: &str) -> GatewayResult<Decimal> {
        let ticker = self.ticker_price(symbol).await?;
        Ok(parse_decimal("price", &ticker.price)?)
    }

    async fn get_symbol_filters(&self, symbol: &str) -> GatewayResult<SymbolFilters> {
        Ok(self.symbol_filters(symbol).await?)
    }

    async fn get_account_balance(&self, asset: &str) -> GatewayResult<Decimal> {
        let balances = self.balances().await?;
        match balances.into_iter().find(|b| b.asset == asset) {
            Some(balance) => Ok(parse_decimal("availableBalance", &balance.available_balance)?),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn default_leverage(&self, symbol: &str) -> GatewayResult<u32> {
        let account = self.account().await?;
        let position = account
            .positions
            .into_iter()
            .find(|p| p.symbol == symbol)
            .ok_or_else(|| GatewayError::from(BinanceError::SymbolNotFound(symbol.to_string())))?;
        position
            .leverage
            .parse::<u32>()
            .map_err(|e| GatewayError::InvalidResponse(format!("leverage: {e}")))
    }

    async fn can_trade(&self) -> GatewayResult<bool> {
        Ok(self.account().await?.can_trade)
    }
}

//! Protective order guard.
//!
//! While a position is open, exactly one closing STOP_MARKET and one closing
//! TAKE_PROFIT_MARKET must rest on the book. While flat, none may remain.

use std::sync::Arc;

use perp_keeper_core::{
    protective_intents, Direction, GatewayError, OpenOrder, OrderSide, PositionSnapshot,
    ProtectiveIntent, ProtectiveKind,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, Result};

/// Result of one protection pass over an open position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardReport {
    /// Trigger of the stop now resting (may be a trailed stop).
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    pub placed: Vec<ProtectiveKind>,
    /// Kinds still absent after the pass.
    pub missing: Vec<ProtectiveKind>,
    pub cancelled_duplicates: usize,
}

impl GuardReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardPass {
    Protected(GuardReport),
    /// Flat; number of orphaned protective orders cancelled.
    Cleaned(usize),
}

#[derive(Clone)]
pub struct OrderGuard {
    ctx: Arc<EngineContext>,
}

impl OrderGuard {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Places whichever of the stop and take-profit is missing for `snapshot`.
    ///
    /// Existing protective orders are kept as they are, so a trailed stop
    /// survives. Surplus copies of a kind are cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot is flat, the filters are unavailable or
    /// open orders cannot be listed.
    pub async fn ensure_protection(&self, snapshot: &PositionSnapshot) -> Result<GuardReport> {
        let _protective = self.ctx.protective.lock().await;

        let tick = self.ctx.filters().await?.tick_size;
        let trading = &self.ctx.config.trading;
        let intents = protective_intents(
            snapshot.direction,
            snapshot.entry_price,
            trading.sl_pct,
            trading.tp_pct,
            tick,
        )
        .ok_or(EngineError::FlatDirection)?;

        let orders = self.list_orders().await?;
        let mut report = GuardReport {
            stop_price: intents[0].trigger_price,
            take_profit_price: intents[1].trigger_price,
            placed: Vec::new(),
            missing: Vec::new(),
            cancelled_duplicates: 0,
        };

        for intent in intents {
            let mut existing: Vec<&OpenOrder> = orders
                .iter()
                .filter(|o| o.is_closing(intent.kind, intent.side))
                .collect();

            if existing.is_empty() {
                match self.place(&intent).await {
                    Ok(()) => report.placed.push(intent.kind),
                    Err(e) => warn!(kind = %intent.kind, error = %e, "failed to place protective order"),
                }
                continue;
            }

            existing.sort_by(|a, b| preference(snapshot.direction, intent.kind, a, b));
            if let Some(trigger) = existing[0].trigger_price {
                match intent.kind {
                    ProtectiveKind::Stop => report.stop_price = trigger,
                    ProtectiveKind::TakeProfit => report.take_profit_price = trigger,
                }
            }
            for surplus in &existing[1..] {
                if self.cancel(&surplus.id).await {
                    report.cancelled_duplicates += 1;
                }
            }
        }

        if !report.placed.is_empty() || report.cancelled_duplicates > 0 {
            let side = intents[0].side;
            match self.list_orders().await {
                Ok(confirmed) => {
                    for kind in [ProtectiveKind::Stop, ProtectiveKind::TakeProfit] {
                        if !confirmed.iter().any(|o| o.is_closing(kind, side)) {
                            report.missing.push(kind);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "could not confirm protective orders");
                    report.missing = intents
                        .iter()
                        .filter(|i| !orders.iter().any(|o| o.is_closing(i.kind, i.side)))
                        .filter(|i| !report.placed.contains(&i.kind))
                        .map(|i| i.kind)
                        .collect();
                }
            }
        }

        if report.missing.is_empty() {
            if !report.placed.is_empty() {
                info!(
                    direction = %snapshot.direction,
                    stop = %report.stop_price,
                    take_profit = %report.take_profit_price,
                    placed = ?report.placed,
                    "protective orders in place"
                );
            }
        } else {
            let kinds: Vec<String> = report.missing.iter().map(ToString::to_string).collect();
            warn!(missing = ?report.missing, "protective orders missing after guard pass");
            self.ctx
                .notify(&format!(
                    "WARNING: {} position without {} on {}, retrying next pass",
                    snapshot.direction,
                    kinds.join("/"),
                    self.ctx.symbol()
                ))
                .await;
        }

        Ok(report)
    }

    /// Cancels every closing STOP or TAKE_PROFIT order once the remote
    /// position is flat. Returns how many were cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if the position or open orders cannot be read.
    pub async fn cancel_orphans(&self) -> Result<usize> {
        let _protective = self.ctx.protective.lock().await;

        let gateway = self.ctx.gateway.as_ref();
        let symbol = self.ctx.symbol();
        let remote = self
            .ctx
            .read_retry
            .run("get_position", move || gateway.get_position(symbol))
            .await?;
        if !remote.is_flat() {
            debug!(quantity = %remote.quantity, "remote position open, leaving protective orders");
            return Ok(0);
        }

        let orders = self.list_orders().await?;
        let mut cancelled = 0;
        for order in orders.iter().filter(|o| o.is_protective()) {
            if self.cancel(&order.id).await {
                cancelled += 1;
            }
        }

        if cancelled > 0 {
            info!(cancelled, "orphaned protective orders cancelled");
            self.ctx
                .notify(&format!(
                    "Cancelled {cancelled} orphaned protective order(s) on {symbol}"
                ))
                .await;
        }
        Ok(cancelled)
    }

    /// One guard pass against the current snapshot.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::ensure_protection`] or
    /// [`Self::cancel_orphans`].
    pub async fn pass(&self) -> Result<GuardPass> {
        let snapshot = self.ctx.state.read();
        if snapshot.is_open {
            self.ensure_protection(&snapshot).await.map(GuardPass::Protected)
        } else {
            self.cancel_orphans().await.map(GuardPass::Cleaned)
        }
    }

    /// Runs a pass every `loops.guard_ms` until shutdown. Passes are skipped
    /// while an open or close holds the mutation lock.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other supervised loops.
    pub async fn run(self) -> anyhow::Result<()> {
        let interval = self.ctx.config.loops.guard_interval();
        info!(interval_ms = interval.as_millis() as u64, "order guard started");

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let Ok(_mutation) = self.ctx.mutation.try_lock() else {
                debug!("order mutation in progress, skipping guard pass");
                continue;
            };
            if let Err(e) = self.pass().await {
                warn!(error = %e, "guard pass failed");
            }
        }

        info!("order guard stopped");
        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<OpenOrder>> {
        let gateway = self.ctx.gateway.as_ref();
        let symbol = self.ctx.symbol();
        Ok(self
            .ctx
            .read_retry
            .run("list_open_orders", move || gateway.list_open_orders(symbol))
            .await?)
    }

    async fn place(&self, intent: &ProtectiveIntent) -> Result<()> {
        let gateway = self.ctx.gateway.as_ref();
        let symbol = self.ctx.symbol();
        let intent = *intent;
        let ack = self
            .ctx
            .order_retry
            .run("place_protective", move || {
                gateway.place_stop_order(
                    symbol,
                    intent.side,
                    intent.kind,
                    intent.trigger_price,
                    intent.close_position,
                )
            })
            .await?;
        debug!(kind = %intent.kind, order_id = %ack.order_id, trigger = %intent.trigger_price, "protective order placed");
        Ok(())
    }

    /// Cancels `order_id`; an order the exchange no longer knows counts as done.
    async fn cancel(&self, order_id: &str) -> bool {
        let gateway = self.ctx.gateway.as_ref();
        let symbol = self.ctx.symbol();
        match self
            .ctx
            .order_retry
            .run("cancel_order", move || gateway.cancel_order(symbol, order_id))
            .await
        {
            Ok(()) => true,
            Err(GatewayError::UnknownOrder { .. }) => {
                debug!(order_id, "order already gone");
                true
            }
            Err(e) => {
                warn!(order_id, error = %e, "failed to cancel order");
                false
            }
        }
    }
}

/// Ordering that puts the order to keep first: the tightest stop for the
/// position, or the earliest take-profit.
fn preference(
    direction: Direction,
    kind: ProtectiveKind,
    a: &OpenOrder,
    b: &OpenOrder,
) -> std::cmp::Ordering {
    match (kind, direction.closing_side()) {
        (ProtectiveKind::Stop, Some(OrderSide::Sell)) => b.trigger_price.cmp(&a.trigger_price),
        (ProtectiveKind::Stop, Some(OrderSide::Buy)) => a.trigger_price.cmp(&b.trigger_price),
        _ => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::paper::{PaperCall, PaperExchange, PaperExchangeConfig};
    use crate::retry::RetryPolicy;
    use perp_keeper_core::{KeeperConfig, OrderType, SymbolFilters};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn setup() -> (Arc<PaperExchange>, Arc<MemoryNotifier>, OrderGuard) {
        let paper = Arc::new(PaperExchange::new(
            PaperExchangeConfig::default()
                .with_price(dec!(100))
                .with_filters(SymbolFilters {
                    tick_size: dec!(0.01),
                    step_size: dec!(0.001),
                    min_qty: dec!(0.001),
                    min_notional: dec!(5),
                }),
        ));
        let notifier = Arc::new(MemoryNotifier::new());
        let mut ctx = EngineContext::new(KeeperConfig::default(), paper.clone(), notifier.clone());
        ctx.order_retry = RetryPolicy::orders().with_delay(Duration::from_millis(1));
        ctx.read_retry = RetryPolicy::reads().with_delay(Duration::from_millis(1));
        (paper, notifier, OrderGuard::new(Arc::new(ctx)))
    }

    fn long_snapshot() -> PositionSnapshot {
        PositionSnapshot {
            is_open: true,
            direction: Direction::Long,
            entry_price: dec!(100),
            quantity: dec!(1),
            leverage: 2,
            opened_at: None,
        }
    }

    // ==================== Protection Tests ====================

    #[tokio::test]
    async fn test_places_both_orders_at_expected_prices() {
        let (paper, notifier, guard) = setup();
        paper.open_external(Direction::Long, dec!(1));

        let report = guard.ensure_protection(&long_snapshot()).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.stop_price, dec!(98));
        assert_eq!(report.take_profit_price, dec!(104));
        assert_eq!(report.placed, vec![ProtectiveKind::Stop, ProtectiveKind::TakeProfit]);

        let stops = paper.protective_orders(ProtectiveKind::Stop);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].side, OrderSide::Sell);
        assert_eq!(stops[0].trigger_price, Some(dec!(98)));
        assert_eq!(notifier.messages().len(), 0);
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let (paper, _, guard) = setup();
        paper.open_external(Direction::Long, dec!(1));
        guard.ensure_protection(&long_snapshot()).await.unwrap();

        let report = guard.ensure_protection(&long_snapshot()).await.unwrap();
        assert!(report.placed.is_empty());
        assert_eq!(paper.orders().len(), 2);
        assert_eq!(paper.calls(PaperCall::PlaceStopOrder), 2);
    }

    #[tokio::test]
    async fn test_keeps_trailed_stop_and_removes_duplicates() {
        let (paper, _, guard) = setup();
        paper.open_external(Direction::Long, dec!(1));
        paper.insert_order(OrderType::StopMarket, OrderSide::Sell, dec!(98), true);
        paper.insert_order(OrderType::StopMarket, OrderSide::Sell, dec!(99.5), true);
        paper.insert_order(OrderType::TakeProfitMarket, OrderSide::Sell, dec!(104), true);

        let report = guard.ensure_protection(&long_snapshot()).await.unwrap();
        assert_eq!(report.stop_price, dec!(99.5));
        assert_eq!(report.cancelled_duplicates, 1);
        assert!(report.is_complete());
        let stops = paper.protective_orders(ProtectiveKind::Stop);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].trigger_price, Some(dec!(99.5)));
    }

    #[tokio::test]
    async fn test_ignores_non_closing_orders() {
        let (paper, _, guard) = setup();
        paper.open_external(Direction::Long, dec!(1));
        let foreign = paper.insert_order(OrderType::StopMarket, OrderSide::Sell, dec!(90), false);

        guard.ensure_protection(&long_snapshot()).await.unwrap();
        assert!(paper.orders().iter().any(|o| o.id == foreign));
        assert_eq!(paper.orders().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_after_failures_is_reported() {
        let (paper, notifier, guard) = setup();
        paper.open_external(Direction::Long, dec!(1));
        for _ in 0..3 {
            paper.fail_next(PaperCall::PlaceStopOrder, GatewayError::Network("reset".into()));
        }

        let report = guard.ensure_protection(&long_snapshot()).await.unwrap();
        assert_eq!(report.missing, vec![ProtectiveKind::Stop]);
        assert_eq!(report.placed, vec![ProtectiveKind::TakeProfit]);
        assert_eq!(notifier.count_containing("without SL"), 1);
    }

    #[tokio::test]
    async fn test_short_prices() {
        let (paper, _, guard) = setup();
        paper.open_external(Direction::Short, dec!(1));
        let snapshot = PositionSnapshot {
            direction: Direction::Short,
            ..long_snapshot()
        };
        let report = guard.ensure_protection(&snapshot).await.unwrap();
        assert_eq!(report.stop_price, dec!(102));
        assert_eq!(report.take_profit_price, dec!(96));
        assert!(paper.orders().iter().all(|o| o.side == OrderSide::Buy));
    }

    // ==================== Orphan Tests ====================

    #[tokio::test]
    async fn test_cancel_orphans_when_flat() {
        let (paper, notifier, guard) = setup();
        paper.insert_order(OrderType::StopMarket, OrderSide::Sell, dec!(98), true);
        paper.insert_order(OrderType::TakeProfitMarket, OrderSide::Sell, dec!(104), true);
        paper.insert_order(OrderType::Limit, OrderSide::Buy, dec!(90), false);

        assert_eq!(guard.cancel_orphans().await.unwrap(), 2);
        assert_eq!(paper.orders().len(), 1);
        assert_eq!(notifier.count_containing("orphaned"), 1);

        assert_eq!(guard.cancel_orphans().await.unwrap(), 0);
        assert_eq!(notifier.count_containing("orphaned"), 1);
    }

    #[tokio::test]
    async fn test_unknown_order_counts_as_cancelled() {
        let (paper, _, guard) = setup();
        paper.insert_order(OrderType::StopMarket, OrderSide::Sell, dec!(98), true);
        paper.fail_next(PaperCall::CancelOrder, GatewayError::unknown_order("1"));
        assert_eq!(guard.cancel_orphans().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_orphans_kept_while_remote_open() {
        let (paper, _, guard) = setup();
        paper.open_external(Direction::Long, dec!(1));
        paper.insert_order(OrderType::StopMarket, OrderSide::Sell, dec!(98), true);

        assert_eq!(guard.pass().await.unwrap(), GuardPass::Cleaned(0));
        assert_eq!(paper.orders().len(), 1);
    }
}

//! Open and close entry points.
//!
//! Both run under the mutation lock for their whole duration, so the
//! reconciler and guard never observe a half-finished open or close. Neither
//! returns an error: failures become a `Failed` outcome, a log line and a
//! notification.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use perp_keeper_core::{
    normalize_quantity, protective_intents, realized_pnl, required_margin, Direction,
    GatewayError, PositionSnapshot, QuantityAdjustment, RemotePosition,
};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::context::EngineContext;
use crate::control::TradingMode;
use crate::error::{EngineError, Result};
use crate::guard::{GuardReport, OrderGuard};
use crate::trailing::{TrailingHandle, TrailingStopEngine};

const NO_POSITION: &str = "no position reported after fill";

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `mode.txt` says alert: signals are reported, not traded.
    AlertMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedPosition {
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub margin: Decimal,
    pub adjustments: Vec<QuantityAdjustment>,
    /// `None` when the guard pass failed; the guard loop retries.
    pub protection: Option<GuardReport>,
}

#[derive(Debug)]
pub enum OpenOutcome {
    Opened(OpenedPosition),
    Skipped(SkipReason),
    Failed(EngineError),
}

impl OpenOutcome {
    #[must_use]
    pub fn is_opened(&self) -> bool {
        matches!(self, Self::Opened(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedPosition {
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub cancelled_orders: usize,
    /// The exchange still reported a position after the close order.
    pub still_open: bool,
}

#[derive(Debug)]
pub enum CloseOutcome {
    Closed(ClosedPosition),
    NothingToClose,
    Failed(EngineError),
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct TradeOrchestrator {
    ctx: Arc<EngineContext>,
    guard: OrderGuard,
    trailing: Mutex<Option<TrailingHandle>>,
}

impl TradeOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let guard = OrderGuard::new(ctx.clone());
        Self {
            ctx,
            guard,
            trailing: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn guard(&self) -> &OrderGuard {
        &self.guard
    }

    /// Opens a position in `direction`, closing any existing one first.
    ///
    /// `margin` and `leverage` fall back to the override files, then to the
    /// configured defaults.
    pub async fn open_position(
        &self,
        direction: Direction,
        margin: Option<Decimal>,
        leverage: Option<u32>,
    ) -> OpenOutcome {
        if direction.is_flat() {
            return self.open_failed(direction, EngineError::FlatDirection).await;
        }
        if self.ctx.controls.mode() == TradingMode::Alert {
            info!(direction = %direction, "alert mode, signal not executed");
            self.ctx
                .notify(&format!(
                    "ALERT: {direction} signal on {} (alert mode, no order sent)",
                    self.ctx.symbol()
                ))
                .await;
            return OpenOutcome::Skipped(SkipReason::AlertMode);
        }

        let _mutation = self.ctx.mutation.lock().await;
        match self.open_locked(direction, margin, leverage).await {
            Ok(opened) => OpenOutcome::Opened(opened),
            Err(e) => self.open_failed(direction, e).await,
        }
    }

    async fn open_failed(&self, direction: Direction, e: EngineError) -> OpenOutcome {
        error!(direction = %direction, error = %e, "open failed");
        self.ctx
            .notify(&format!("Open {direction} on {} failed: {e}", self.ctx.symbol()))
            .await;
        OpenOutcome::Failed(e)
    }

    async fn open_locked(
        &self,
        direction: Direction,
        margin: Option<Decimal>,
        leverage: Option<u32>,
    ) -> Result<OpenedPosition> {
        let ctx = &self.ctx;
        let gateway = ctx.gateway.as_ref();
        let symbol = ctx.symbol();

        let remote = self.fetch_position().await?;
        if ctx.state.is_open() || !remote.is_flat() {
            info!(direction = %remote.direction(), "position already open, closing before reopen");
            if let Some(closed) = self.close_locked().await? {
                self.announce_close(&closed).await;
            }
            tokio::time::sleep(ctx.config.trading.reopen_settle()).await;
            let remote = self.fetch_position().await?;
            if !remote.is_flat() {
                return Err(EngineError::PositionStillOpen {
                    remaining: remote.quantity.abs(),
                });
            }
        } else {
            // Leftovers from a position closed by SL/TP would be kept by the guard.
            self.guard.cancel_orphans().await?;
        }

        let margin = margin
            .filter(|m| *m > Decimal::ZERO)
            .unwrap_or_else(|| ctx.effective_margin());
        let leverage = leverage
            .filter(|l| *l > 0)
            .unwrap_or_else(|| ctx.effective_leverage());
        let filters = ctx.filters().await?;

        ctx.order_retry
            .run("set_leverage", move || gateway.set_leverage(symbol, leverage))
            .await?;
        let price = ctx
            .read_retry
            .run("get_price", move || gateway.get_price(symbol))
            .await?;

        let plan = normalize_quantity(margin, leverage, price, &filters).ok_or_else(|| {
            EngineError::InvalidFilters(format!("cannot size an order at price {price}"))
        })?;
        for adjustment in &plan.adjustments {
            info!(%adjustment, "order quantity adjusted");
            ctx.notify(&format!("Quantity adjusted on {symbol}: {adjustment}"))
                .await;
        }
        let quantity = plan.quantity;

        let required = margin.max(required_margin(quantity * price, leverage));
        let asset = ctx.config.trading.margin_asset.as_str();
        let available = ctx
            .read_retry
            .run("get_account_balance", move || gateway.get_account_balance(asset))
            .await?;
        if available < required {
            return Err(EngineError::InsufficientBalance {
                asset: asset.to_string(),
                required,
                available,
            });
        }

        let side = direction.entry_side().ok_or(EngineError::FlatDirection)?;
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let ack = ctx
            .order_retry
            .run("entry_order", move || async move {
                // A timed-out attempt may still have filled.
                if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                    if let Ok(existing) = gateway.get_position(symbol).await {
                        if existing.direction() == direction {
                            return Ok(None);
                        }
                    }
                }
                gateway
                    .place_market_order(symbol, side, quantity, false)
                    .await
                    .map(Some)
            })
            .await?;

        let remote = match ctx
            .read_retry
            .run("verify_fill", move || async move {
                let position = gateway.get_position(symbol).await?;
                if position.is_flat() {
                    return Err(GatewayError::InvalidResponse(NO_POSITION.to_string()));
                }
                Ok(position)
            })
            .await
        {
            Ok(position) => position,
            Err(GatewayError::InvalidResponse(message)) if message == NO_POSITION => {
                return Err(EngineError::NoPositionAfterFill);
            }
            Err(e) => return Err(e.into()),
        };

        let entry_price = if remote.entry_price > Decimal::ZERO {
            remote.entry_price
        } else {
            ack.as_ref().and_then(|a| a.avg_price).unwrap_or(price)
        };
        let position_leverage = if remote.leverage > 0 { remote.leverage } else { leverage };
        ctx.state
            .open_with(remote.direction(), entry_price, remote.quantity, position_leverage);
        let snapshot = ctx.state.read();

        let protection = match self.guard.ensure_protection(&snapshot).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "initial guard pass failed, guard loop will retry");
                None
            }
        };
        let initial_stop = match &protection {
            Some(report) => Some(report.stop_price),
            None => protective_intents(
                snapshot.direction,
                snapshot.entry_price,
                ctx.config.trading.sl_pct,
                ctx.config.trading.tp_pct,
                filters.tick_size,
            )
            .map(|[stop, _]| stop.trigger_price),
        };
        if let Some(stop) = initial_stop {
            self.start_trailing(&snapshot, stop).await;
        }

        let opened = OpenedPosition {
            direction: snapshot.direction,
            quantity: snapshot.quantity,
            entry_price,
            leverage: position_leverage,
            margin,
            adjustments: plan.adjustments,
            protection,
        };
        info!(
            direction = %opened.direction,
            quantity = %opened.quantity,
            entry = %opened.entry_price,
            leverage = opened.leverage,
            "position opened"
        );
        let protection_text = match &opened.protection {
            Some(report) => format!(
                " | SL {} TP {}",
                report.stop_price, report.take_profit_price
            ),
            None => " | protection pending".to_string(),
        };
        ctx.notify(&format!(
            "Opened {} {} {symbol} @ {} x{}{protection_text}",
            opened.direction, opened.quantity, opened.entry_price, opened.leverage
        ))
        .await;
        Ok(opened)
    }

    /// Closes the whole position at market.
    pub async fn close_position(&self) -> CloseOutcome {
        let _mutation = self.ctx.mutation.lock().await;
        match self.close_locked().await {
            Ok(Some(closed)) => {
                self.announce_close(&closed).await;
                CloseOutcome::Closed(closed)
            }
            Ok(None) => {
                warn!("close requested but no position is open");
                self.ctx
                    .notify(&format!("Close requested but no {} position is open", self.ctx.symbol()))
                    .await;
                CloseOutcome::NothingToClose
            }
            Err(e) => {
                error!(error = %e, "close failed");
                self.ctx
                    .notify(&format!("Close on {} failed: {e}", self.ctx.symbol()))
                    .await;
                CloseOutcome::Failed(e)
            }
        }
    }

    /// Close body. `None` when neither side reports a position.
    async fn close_locked(&self) -> Result<Option<ClosedPosition>> {
        let ctx = &self.ctx;
        let gateway = ctx.gateway.as_ref();
        let symbol = ctx.symbol();

        let local = ctx.state.read();
        let remote = self.fetch_position().await?;

        if remote.is_flat() {
            if local.is_open {
                info!("local snapshot open but exchange flat, clearing");
                self.stop_trailing().await;
                ctx.state.reset();
                if let Err(e) = self.guard.cancel_orphans().await {
                    warn!(error = %e, "orphan cleanup failed");
                }
            }
            return Ok(None);
        }

        let direction = remote.direction();
        let side = direction.closing_side().ok_or(EngineError::FlatDirection)?;
        let quantity = remote.quantity.abs();

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let ack = ctx
            .order_retry
            .run("close_order", move || async move {
                if attempts.fetch_add(1, Ordering::SeqCst) > 0 {
                    if let Ok(existing) = gateway.get_position(symbol).await {
                        if existing.is_flat() {
                            return Ok(None);
                        }
                    }
                }
                gateway
                    .place_market_order(symbol, side, quantity, true)
                    .await
                    .map(Some)
            })
            .await?;

        let exit_price = if remote.mark_price > Decimal::ZERO {
            remote.mark_price
        } else {
            ack.as_ref()
                .and_then(|a| a.avg_price)
                .unwrap_or(remote.entry_price)
        };
        let entry_price = if remote.entry_price > Decimal::ZERO {
            remote.entry_price
        } else {
            local.entry_price
        };
        let pnl = realized_pnl(direction, entry_price, exit_price, quantity);

        self.stop_trailing().await;
        ctx.state.reset();
        let cancelled_orders = match self.guard.cancel_orphans().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "orphan cleanup failed, guard loop will retry");
                0
            }
        };

        let still_open = match self.fetch_position().await {
            Ok(after) => !after.is_flat(),
            Err(e) => {
                warn!(error = %e, "could not verify close");
                false
            }
        };

        Ok(Some(ClosedPosition {
            direction,
            quantity,
            entry_price,
            exit_price,
            pnl,
            cancelled_orders,
            still_open,
        }))
    }

    async fn announce_close(&self, closed: &ClosedPosition) {
        let symbol = self.ctx.symbol();
        info!(
            direction = %closed.direction,
            quantity = %closed.quantity,
            exit = %closed.exit_price,
            pnl = %closed.pnl,
            "position closed"
        );
        self.ctx
            .notify(&format!(
                "Closed {} {} {symbol} @ {} | PnL {}",
                closed.direction,
                closed.quantity,
                closed.exit_price,
                closed.pnl.round_dp(4)
            ))
            .await;
        if closed.still_open {
            error!("exchange still reports a position after close");
            self.ctx
                .notify(&format!(
                    "ANOMALY: {symbol} position still open after close, check the exchange"
                ))
                .await;
        }
    }

    /// Replaces any running trailing engine with one for `snapshot`.
    pub async fn start_trailing(&self, snapshot: &PositionSnapshot, initial_stop: Decimal) {
        self.stop_trailing().await;
        if !self.ctx.config.trailing.enabled || !snapshot.is_open {
            return;
        }
        match TrailingStopEngine::prepare(&self.ctx, snapshot, initial_stop).await {
            Ok(stop) => {
                let handle = TrailingStopEngine::spawn(self.ctx.clone(), stop, &self.ctx.shutdown);
                *self.trailing.lock() = Some(handle);
            }
            Err(e) => warn!(error = %e, "trailing stop not started"),
        }
    }

    pub async fn stop_trailing(&self) {
        let previous = self.trailing.lock().take();
        if let Some(handle) = previous {
            handle.stop().await;
        }
    }

    /// True while a trailing engine task is alive.
    #[must_use]
    pub fn trailing_active(&self) -> bool {
        self.trailing
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub async fn shutdown(&self) {
        self.stop_trailing().await;
    }

    async fn fetch_position(&self) -> Result<RemotePosition> {
        let gateway = self.ctx.gateway.as_ref();
        let symbol = self.ctx.symbol();
        Ok(self
            .ctx
            .read_retry
            .run("get_position", move || gateway.get_position(symbol))
            .await?)
    }
}

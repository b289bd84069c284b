//! Trailing stop.
//!
//! [`TrailingStop`] holds the pure decision rule; [`TrailingStopEngine`] drives
//! it against live prices and replaces the resting stop order.

use std::sync::Arc;

use perp_keeper_core::{
    round_to_tick, Direction, GatewayError, PositionSnapshot, ProtectiveKind, TrailingConfig,
};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingState {
    Active,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingDecision {
    Hold,
    /// Move the stop to this trigger price.
    Advance(Decimal),
}

/// Ratchet that only ever tightens the stop of one position.
#[derive(Debug, Clone)]
pub struct TrailingStop {
    direction: Direction,
    entry_price: Decimal,
    activation_pct: Decimal,
    trail_pct: Decimal,
    tick_size: Decimal,
    current_stop: Decimal,
    state: TrailingState,
}

impl TrailingStop {
    #[must_use]
    pub fn new(
        direction: Direction,
        entry_price: Decimal,
        initial_stop: Decimal,
        config: &TrailingConfig,
        tick_size: Decimal,
    ) -> Self {
        Self {
            direction,
            entry_price,
            activation_pct: config.activation_pct,
            trail_pct: config.trail_pct,
            tick_size,
            current_stop: initial_stop,
            state: if direction.is_flat() {
                TrailingState::Stopped
            } else {
                TrailingState::Active
            },
        }
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub const fn current_stop(&self) -> Decimal {
        self.current_stop
    }

    #[must_use]
    pub const fn state(&self) -> TrailingState {
        self.state
    }

    /// Fractional move of `price` in the position's favor.
    #[must_use]
    pub fn favorable_move(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        match self.direction {
            Direction::Long => (price - self.entry_price) / self.entry_price,
            Direction::Short => (self.entry_price - price) / self.entry_price,
            Direction::Flat => Decimal::ZERO,
        }
    }

    #[must_use]
    pub fn evaluate(&self, price: Decimal) -> TrailingDecision {
        if self.state == TrailingState::Stopped || self.favorable_move(price) < self.activation_pct {
            return TrailingDecision::Hold;
        }
        let candidate = match self.direction {
            Direction::Long => price * (Decimal::ONE - self.trail_pct),
            Direction::Short => price * (Decimal::ONE + self.trail_pct),
            Direction::Flat => return TrailingDecision::Hold,
        };
        let candidate = round_to_tick(candidate, self.tick_size);
        if self.improves(candidate) {
            TrailingDecision::Advance(candidate)
        } else {
            TrailingDecision::Hold
        }
    }

    /// Records `stop` as the resting stop if it tightens the current one.
    pub fn commit(&mut self, stop: Decimal) -> bool {
        if self.state == TrailingState::Stopped || !self.improves(stop) {
            return false;
        }
        self.current_stop = stop;
        true
    }

    pub fn stop(&mut self) {
        self.state = TrailingState::Stopped;
    }

    fn improves(&self, stop: Decimal) -> bool {
        match self.direction {
            Direction::Long => stop > self.current_stop,
            Direction::Short => stop < self.current_stop,
            Direction::Flat => false,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Owner's grip on a running trailing engine.
#[derive(Debug)]
pub struct TrailingHandle {
    token: CancellationToken,
    handle: JoinHandle<TrailingState>,
}

impl TrailingHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the engine and waits for it to exit.
    pub async fn stop(self) -> TrailingState {
        self.token.cancel();
        match self.handle.await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "trailing engine task failed");
                TrailingState::Stopped
            }
        }
    }
}

enum Applied {
    Moved,
    PositionClosed,
}

pub struct TrailingStopEngine {
    ctx: Arc<EngineContext>,
    stop: TrailingStop,
}

impl TrailingStopEngine {
    /// Runs `stop` on its own task, cancelled with a child of `parent`.
    pub fn spawn(
        ctx: Arc<EngineContext>,
        stop: TrailingStop,
        parent: &CancellationToken,
    ) -> TrailingHandle {
        let token = parent.child_token();
        let engine = Self { ctx, stop };
        let handle = tokio::spawn(engine.run(token.clone()));
        TrailingHandle { token, handle }
    }

    /// Builds the ratchet for `snapshot` starting at `initial_stop`.
    ///
    /// # Errors
    ///
    /// Returns error if the symbol filters are unavailable.
    pub async fn prepare(
        ctx: &EngineContext,
        snapshot: &PositionSnapshot,
        initial_stop: Decimal,
    ) -> Result<TrailingStop> {
        let tick = ctx.filters().await?.tick_size;
        Ok(TrailingStop::new(
            snapshot.direction,
            snapshot.entry_price,
            initial_stop,
            &ctx.config.trailing,
            tick,
        ))
    }

    async fn run(mut self, token: CancellationToken) -> TrailingState {
        let interval = self.ctx.config.trailing.sample_interval();
        info!(
            direction = %self.stop.direction(),
            stop = %self.stop.current_stop(),
            "trailing stop engaged"
        );

        while self.stop.state() == TrailingState::Active {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let snapshot = self.ctx.state.read();
            if !snapshot.is_open || snapshot.direction != self.stop.direction() {
                debug!("position gone, trailing stop exiting");
                break;
            }

            let price = match self.ctx.gateway.get_price(self.ctx.symbol()).await {
                Ok(price) => price,
                Err(e) => {
                    debug!(error = %e, "price sample failed");
                    continue;
                }
            };

            let TrailingDecision::Advance(candidate) = self.stop.evaluate(price) else {
                continue;
            };
            match self.apply(candidate).await {
                Ok(Applied::Moved) => {
                    let previous = self.stop.current_stop();
                    self.stop.commit(candidate);
                    info!(from = %previous, to = %candidate, price = %price, "trailing stop advanced");
                    self.ctx
                        .notify(&format!(
                            "Trailing stop moved {previous} -> {candidate} ({} @ {price})",
                            self.stop.direction()
                        ))
                        .await;
                }
                Ok(Applied::PositionClosed) => {
                    info!("stop already gone, position treated as closed");
                    break;
                }
                Err(e) => warn!(candidate = %candidate, error = %e, "failed to move trailing stop"),
            }
        }

        self.stop.stop();
        TrailingState::Stopped
    }

    /// Replaces the resting stop with one at `candidate`.
    async fn apply(&self, candidate: Decimal) -> Result<Applied> {
        let _protective = self.ctx.protective.lock().await;

        if !self.ctx.state.is_open() {
            return Ok(Applied::PositionClosed);
        }
        let side = self
            .stop
            .direction()
            .closing_side()
            .ok_or(EngineError::FlatDirection)?;
        let gateway = self.ctx.gateway.as_ref();
        let symbol = self.ctx.symbol();

        let orders = self
            .ctx
            .read_retry
            .run("list_open_orders", move || gateway.list_open_orders(symbol))
            .await?;
        for order in orders.iter().filter(|o| o.is_closing(ProtectiveKind::Stop, side)) {
            let order_id = order.id.as_str();
            match self
                .ctx
                .order_retry
                .run("cancel_stop", move || gateway.cancel_order(symbol, order_id))
                .await
            {
                Ok(()) => {}
                Err(GatewayError::UnknownOrder { .. }) => return Ok(Applied::PositionClosed),
                Err(e) => return Err(e.into()),
            }
        }

        let placed = self
            .ctx
            .order_retry
            .run("place_trailing_stop", move || {
                gateway.place_stop_order(symbol, side, ProtectiveKind::Stop, candidate, true)
            })
            .await;
        if let Err(e) = placed {
            error!(candidate = %candidate, error = %e, "stop cancelled but not replaced, position unprotected until next guard pass");
            self.ctx
                .notify(&format!(
                    "UNPROTECTED: trailing stop on {symbol} could not be replaced at {candidate} ({e}), guard will restore a stop"
                ))
                .await;
            return Err(e.into());
        }
        Ok(Applied::Moved)
    }
}

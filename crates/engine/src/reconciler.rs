use std::sync::Arc;

use perp_keeper_core::{realized_pnl, PositionSnapshot, RemotePosition};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::Result;
use crate::guard::OrderGuard;

/// What one reconciliation tick changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local and remote already agree.
    Unchanged,
    /// Position opened outside this process and adopted.
    AdoptedExternal(PositionSnapshot),
    /// Position disappeared remotely (stop, take-profit or manual close).
    ClosedExternally {
        previous: PositionSnapshot,
        estimated_pnl: Decimal,
    },
    /// Entry, quantity, leverage or direction refreshed from the exchange.
    Refreshed(PositionSnapshot),
    /// An open or close held the mutation lock.
    Skipped,
}

/// Converges the local snapshot onto the exchange-reported position.
#[derive(Clone)]
pub struct PositionReconciler {
    ctx: Arc<EngineContext>,
    guard: OrderGuard,
}

impl PositionReconciler {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let guard = OrderGuard::new(ctx.clone());
        Self { ctx, guard }
    }

    /// Reconciles unless an open or close is in flight.
    ///
    /// # Errors
    ///
    /// Returns error if the remote position cannot be read.
    pub async fn tick(&self) -> Result<ReconcileOutcome> {
        let Ok(_mutation) = self.ctx.mutation.try_lock() else {
            return Ok(ReconcileOutcome::Skipped);
        };
        self.reconcile().await
    }

    /// Reconciles once. The caller must hold the mutation lock or be the only
    /// writer (startup).
    ///
    /// # Errors
    ///
    /// Returns error if the remote position cannot be read.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let gateway = self.ctx.gateway.as_ref();
        let symbol = self.ctx.symbol();
        let remote = self
            .ctx
            .read_retry
            .run("get_position", move || gateway.get_position(symbol))
            .await?;
        let local = self.ctx.state.read();

        let outcome = match (local.is_open, remote.is_flat()) {
            (false, true) => ReconcileOutcome::Unchanged,
            (false, false) => {
                let adopted = self.ctx.state.adopt(&remote);
                info!(
                    direction = %adopted.direction,
                    quantity = %adopted.quantity,
                    entry = %adopted.entry_price,
                    "adopted externally opened position"
                );
                self.ctx
                    .notify(&format!(
                        "Externally opened {} position adopted: {} {symbol} @ {} x{}",
                        adopted.direction, adopted.quantity, adopted.entry_price, adopted.leverage
                    ))
                    .await;
                ReconcileOutcome::AdoptedExternal(adopted)
            }
            (true, true) => {
                let previous = self.ctx.state.reset();
                let exit = self.exit_price(&remote).await;
                let estimated_pnl = realized_pnl(
                    previous.direction,
                    previous.entry_price,
                    exit,
                    previous.quantity,
                );
                info!(
                    direction = %previous.direction,
                    exit = %exit,
                    pnl = %estimated_pnl,
                    "position closed on exchange"
                );
                if let Err(e) = self.guard.cancel_orphans().await {
                    warn!(error = %e, "orphan cleanup failed, guard loop will retry");
                }
                self.ctx
                    .notify(&format!(
                        "{} position on {symbol} closed on exchange (SL/TP or manual), est. PnL {}",
                        previous.direction,
                        estimated_pnl.round_dp(4)
                    ))
                    .await;
                ReconcileOutcome::ClosedExternally {
                    previous,
                    estimated_pnl,
                }
            }
            (true, false) => {
                let incoming = PositionSnapshot::from_remote(&remote);
                if incoming.direction == local.direction
                    && incoming.entry_price == local.entry_price
                    && incoming.quantity == local.quantity
                    && incoming.leverage == local.leverage
                {
                    ReconcileOutcome::Unchanged
                } else {
                    if incoming.direction != local.direction {
                        warn!(
                            from = %local.direction,
                            to = %incoming.direction,
                            "position direction flipped on exchange"
                        );
                    } else {
                        debug!(quantity = %incoming.quantity, entry = %incoming.entry_price, "position refreshed");
                    }
                    ReconcileOutcome::Refreshed(self.ctx.state.adopt(&remote))
                }
            }
        };
        Ok(outcome)
    }

    async fn exit_price(&self, remote: &RemotePosition) -> Decimal {
        if remote.mark_price > Decimal::ZERO {
            return remote.mark_price;
        }
        match self.ctx.gateway.get_price(self.ctx.symbol()).await {
            Ok(price) => price,
            Err(e) => {
                debug!(error = %e, "no exit price for pnl estimate");
                Decimal::ZERO
            }
        }
    }

    /// Ticks every `loops.reconcile_ms` until shutdown.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other supervised loops.
    pub async fn run(self) -> anyhow::Result<()> {
        let interval = self.ctx.config.loops.reconcile_interval();
        info!(interval_ms = interval.as_millis() as u64, "position reconciler started");

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match self.tick().await {
                Ok(ReconcileOutcome::Skipped) => debug!("order mutation in progress, skipping reconcile"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "reconcile tick failed"),
            }
        }

        info!("position reconciler stopped");
        Ok(())
    }
}

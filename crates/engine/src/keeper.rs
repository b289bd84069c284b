//! Process-level wiring: startup checks, background loops and shutdown.

use std::sync::Arc;
use std::time::Duration;

use perp_keeper_core::{ExchangeGateway, KeeperConfig, Notifier, PositionSnapshot};
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::control::{ControlWatcher, InstanceLock};
use crate::error::{EngineError, Result};
use crate::guard::OrderGuard;
use crate::leverage::LeverageWatchdog;
use crate::orchestrator::TradeOrchestrator;
use crate::reconciler::PositionReconciler;
use crate::supervisor::{Supervisor, TaskExit};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct Keeper {
    ctx: Arc<EngineContext>,
    orchestrator: Arc<TradeOrchestrator>,
    supervisor: Option<Supervisor>,
    lock: Option<InstanceLock>,
}

impl Keeper {
    pub fn new(
        config: KeeperConfig,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ctx = Arc::new(EngineContext::new(config, gateway, notifier));
        Self::from_context(ctx)
    }

    pub fn from_context(ctx: Arc<EngineContext>) -> Self {
        let orchestrator = Arc::new(TradeOrchestrator::new(ctx.clone()));
        Self {
            ctx,
            orchestrator,
            supervisor: None,
            lock: None,
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<TradeOrchestrator> {
        &self.orchestrator
    }

    /// Startup sequence. Takes the instance lock, checks trading permission,
    /// loads filters, aligns leverage and rebuilds the snapshot from the
    /// exchange. An open position gets protection and a trailing stop.
    ///
    /// # Errors
    ///
    /// Returns error when another instance runs, trading is disabled, or the
    /// exchange cannot be reached for the initial state.
    pub async fn bootstrap(&mut self) -> Result<PositionSnapshot> {
        let ctx = self.ctx.clone();
        self.lock = Some(InstanceLock::acquire(ctx.controls.dir())?);

        let gateway = ctx.gateway.as_ref();
        let can_trade = ctx
            .read_retry
            .run("can_trade", move || gateway.can_trade())
            .await?;
        if !can_trade {
            return Err(EngineError::TradingDisabled);
        }

        let filters = ctx.filters().await?;
        info!(
            symbol = ctx.symbol(),
            tick = %filters.tick_size,
            step = %filters.step_size,
            min_qty = %filters.min_qty,
            min_notional = %filters.min_notional,
            "symbol filters loaded"
        );

        if let Err(e) = LeverageWatchdog::new(ctx.clone()).check_once().await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "initial leverage check failed");
        }

        PositionReconciler::new(ctx.clone()).reconcile().await?;
        let snapshot = ctx.state.read();

        if snapshot.is_open {
            match self.orchestrator.guard().ensure_protection(&snapshot).await {
                Ok(report) => {
                    self.orchestrator
                        .start_trailing(&snapshot, report.stop_price)
                        .await;
                }
                Err(e) => warn!(error = %e, "startup guard pass failed, guard loop will retry"),
            }
        }

        if let Err(e) = ctx.controls.write_status("running", &snapshot) {
            warn!(error = %e, "failed to write status file");
        }
        let position = if snapshot.is_open {
            format!(
                "{} {} @ {} x{}",
                snapshot.direction, snapshot.quantity, snapshot.entry_price, snapshot.leverage
            )
        } else {
            "flat".to_string()
        };
        info!(symbol = ctx.symbol(), position = %position, "keeper started");
        ctx.notify(&format!("Keeper started on {}: {position}", ctx.symbol()))
            .await;
        Ok(snapshot)
    }

    /// Starts the reconciler, guard, leverage watchdog and control watcher
    /// under supervision.
    pub fn spawn_loops(&mut self) {
        let ctx = &self.ctx;
        let mut supervisor = Supervisor::new(
            ctx.notifier.clone(),
            ctx.config.supervisor.clone(),
            ctx.shutdown.clone(),
        );

        let reconciler = PositionReconciler::new(ctx.clone());
        supervisor.spawn("reconciler", move || reconciler.clone().run());

        let guard = OrderGuard::new(ctx.clone());
        supervisor.spawn("guard", move || guard.clone().run());

        let watchdog = LeverageWatchdog::new(ctx.clone());
        supervisor.spawn("leverage", move || watchdog.clone().run());

        let watcher = ControlWatcher::new(ctx.clone(), self.orchestrator.clone());
        supervisor.spawn("control", move || watcher.clone().run());

        info!(loops = supervisor.len(), "background loops started");
        self.supervisor = Some(supervisor);
    }

    /// Blocks until the shutdown token fires, then shuts down.
    pub async fn run_until_shutdown(&mut self) -> Vec<(String, TaskExit)> {
        self.ctx.shutdown.cancelled().await;
        self.shutdown().await
    }

    /// Cancels every loop, stops trailing, waits for the loops and releases
    /// the instance lock. Resting protective orders stay on the exchange.
    pub async fn shutdown(&mut self) -> Vec<(String, TaskExit)> {
        self.ctx.shutdown.cancel();
        self.orchestrator.shutdown().await;

        let exits = match self.supervisor.take() {
            Some(supervisor) => supervisor.join_all(SHUTDOWN_GRACE).await,
            None => Vec::new(),
        };

        if let Err(e) = self
            .ctx
            .controls
            .write_status("stopped", &self.ctx.state.read())
        {
            warn!(error = %e, "failed to write status file");
        }
        if let Err(e) = self.ctx.controls.clear_stop() {
            warn!(error = %e, "failed to clear stop file");
        }
        info!("keeper stopped");
        self.ctx
            .notify(&format!("Keeper stopped on {}", self.ctx.symbol()))
            .await;
        self.lock = None;
        exits
    }
}

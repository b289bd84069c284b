//! One-shot `open` and `close`.
//!
//! A running keeper owns the position: `close` is forwarded to it through the
//! manual close control file, and `open` refuses to race it.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use perp_keeper_core::Direction;
use perp_keeper_engine::{
    CloseOutcome, ControlFiles, EngineContext, InstanceLock, OpenOutcome, TradeOrchestrator,
};
use rust_decimal::Decimal;

use super::{build_gateway, build_notifier, Options};

pub async fn open(
    options: &Options,
    direction: Direction,
    margin: Option<Decimal>,
    leverage: Option<u32>,
) -> Result<()> {
    if direction.is_flat() {
        bail!("direction must be long or short");
    }
    let config = options.load_config()?;
    if let Some(pid) = InstanceLock::holder(&config.control.dir) {
        bail!("keeper pid {pid} is running and owns the position; stop it before opening manually");
    }
    let _lock = InstanceLock::acquire(&config.control.dir).context("failed to take the instance lock")?;

    let orchestrator = orchestrator(options, config).await?;
    let outcome = orchestrator.open_position(direction, margin, leverage).await;
    orchestrator.shutdown().await;

    match outcome {
        OpenOutcome::Opened(opened) => {
            println!(
                "Opened {} {} @ {} x{} (margin {})",
                opened.direction, opened.quantity, opened.entry_price, opened.leverage, opened.margin
            );
            for adjustment in &opened.adjustments {
                println!("  adjusted: {adjustment}");
            }
            match &opened.protection {
                Some(report) => println!(
                    "  SL {}  TP {}",
                    report.stop_price, report.take_profit_price
                ),
                None => println!("  protective orders not confirmed, run the keeper to retry"),
            }
            println!("  trailing and reconciliation need `perp-keeper run`");
            Ok(())
        }
        OpenOutcome::Skipped(reason) => {
            println!("Open skipped: {reason:?}");
            Ok(())
        }
        OpenOutcome::Failed(e) => Err(e).context("open failed"),
    }
}

pub async fn close(options: &Options) -> Result<()> {
    let config = options.load_config()?;
    if let Some(pid) = InstanceLock::holder(&config.control.dir) {
        ControlFiles::new(config.control.dir.clone())
            .request_manual_close()
            .context("failed to write the manual close request")?;
        println!("Close requested from running keeper (pid {pid})");
        return Ok(());
    }
    let _lock = InstanceLock::acquire(&config.control.dir).context("failed to take the instance lock")?;

    let orchestrator = orchestrator(options, config).await?;
    let outcome = orchestrator.close_position().await;
    orchestrator.shutdown().await;

    match outcome {
        CloseOutcome::Closed(closed) => {
            println!(
                "Closed {} {} @ {} (entry {}), PnL {}",
                closed.direction,
                closed.quantity,
                closed.exit_price,
                closed.entry_price,
                closed.pnl.round_dp(4)
            );
            if closed.still_open {
                bail!("exchange still reports an open position after the close order");
            }
            Ok(())
        }
        CloseOutcome::NothingToClose => {
            println!("Nothing to close");
            Ok(())
        }
        CloseOutcome::Failed(e) => Err(e).context("close failed"),
    }
}

async fn orchestrator(
    options: &Options,
    config: perp_keeper_core::KeeperConfig,
) -> Result<TradeOrchestrator> {
    let gateway = build_gateway(options, &config).await?;
    let notifier = build_notifier(&config);
    let ctx = Arc::new(EngineContext::new(config, gateway, notifier));
    Ok(TradeOrchestrator::new(ctx))
}

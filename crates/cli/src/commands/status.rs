//! Read-only view of the exchange and the running keeper.

use std::fs;

use anyhow::{Context, Result};
use perp_keeper_engine::control::STATUS_FILE;
use perp_keeper_engine::{ControlFiles, InstanceLock};

use super::{build_gateway, Options};

pub async fn execute(options: &Options) -> Result<()> {
    let config = options.load_config()?;
    let symbol = config.trading.symbol.clone();
    let controls = ControlFiles::new(config.control.dir.clone());

    println!("Keeper status for {symbol}");
    println!("================================");
    match InstanceLock::holder(&config.control.dir) {
        Some(pid) => println!("Instance: running (pid {pid})"),
        None => println!("Instance: not running"),
    }
    println!("Mode:     {}", controls.mode());
    if let Some(leverage) = controls.leverage_override() {
        println!("Leverage override: x{leverage}");
    }
    if let Some(margin) = controls.margin_override() {
        println!("Margin override:   {margin} {}", config.trading.margin_asset);
    }
    if let Ok(body) = fs::read_to_string(controls.dir().join(STATUS_FILE)) {
        println!();
        println!("Last status file:");
        for line in body.lines() {
            println!("  {line}");
        }
    }

    let gateway = build_gateway(options, &config).await?;
    let position = gateway
        .get_position(&symbol)
        .await
        .context("failed to fetch position")?;
    let orders = gateway
        .list_open_orders(&symbol)
        .await
        .context("failed to fetch open orders")?;
    let balance = gateway
        .get_account_balance(&config.trading.margin_asset)
        .await
        .context("failed to fetch balance")?;

    println!();
    println!("Exchange:");
    println!("  Balance:  {balance} {}", config.trading.margin_asset);
    if position.is_flat() {
        println!("  Position: flat (leverage x{})", position.leverage);
    } else {
        println!(
            "  Position: {} {} @ {} x{} (mark {})",
            position.direction(),
            position.quantity.abs(),
            position.entry_price,
            position.leverage,
            position.mark_price
        );
    }

    if orders.is_empty() {
        println!("  Orders:   none");
    } else {
        println!("  Orders:");
        for order in &orders {
            let trigger = order
                .trigger_price
                .map_or_else(|| "-".to_string(), |p| p.to_string());
            println!(
                "    {:<12} {:?} {} trigger {} close_position={}",
                order.id, order.order_type, order.side, trigger, order.close_position
            );
        }
    }

    Ok(())
}

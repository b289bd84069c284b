//! `perp-keeper run`: bootstrap the keeper and supervise its loops.

use anyhow::{Context, Result};
use perp_keeper_engine::{Keeper, TaskExit};
use tracing::{info, warn};

use super::{build_gateway, build_notifier, Options};

pub async fn execute(options: &Options) -> Result<()> {
    let config = options.load_config()?;
    info!(
        symbol = %config.trading.symbol,
        config = %options.config_path.display(),
        paper = options.paper,
        "starting perp-keeper"
    );

    let gateway = build_gateway(options, &config).await?;
    let notifier = build_notifier(&config);
    let mut keeper = Keeper::new(config, gateway, notifier);

    keeper
        .bootstrap()
        .await
        .context("keeper startup failed")?;
    keeper.spawn_loops();

    let shutdown = keeper.context().shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });

    let exits = keeper.run_until_shutdown().await;
    for (name, exit) in &exits {
        if let TaskExit::Disabled { restarts } = exit {
            warn!(task = %name, restarts, "loop was disabled during the session");
        }
    }
    info!("perp-keeper stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            warn!("signal handlers unavailable, falling back to ctrl-c");
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received ctrl-c, shutting down");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received ctrl-c, shutting down");
    }
}

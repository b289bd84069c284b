//! Subcommand implementations and the wiring they share.

pub mod run;
pub mod status;
pub mod trade;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use perp_keeper_binance::{BinanceClient, BinanceClientConfig};
use perp_keeper_core::{ConfigLoader, ExchangeGateway, KeeperConfig, Notifier};
use perp_keeper_engine::{LogNotifier, PaperExchange, PaperExchangeConfig, TelegramNotifier};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Signed requests are rejected once the clock leaves `recvWindow`.
const MAX_CLOCK_DRIFT_MS: i64 = 2_000;

pub struct Options {
    pub config_path: PathBuf,
    pub paper: bool,
    pub paper_price: Decimal,
}

impl Options {
    pub fn load_config(&self) -> Result<KeeperConfig> {
        ConfigLoader::load_from(&self.config_path)
    }
}

/// Binance client, or a paper exchange seeded at `paper_price`.
pub async fn build_gateway(
    options: &Options,
    config: &KeeperConfig,
) -> Result<Arc<dyn ExchangeGateway>> {
    if options.paper {
        info!(price = %options.paper_price, "using paper exchange");
        let paper = PaperExchange::new(
            PaperExchangeConfig::default()
                .with_symbol(config.trading.symbol.clone())
                .with_price(options.paper_price),
        );
        return Ok(Arc::new(paper));
    }

    let client_config = BinanceClientConfig::from_exchange_config(&config.exchange);
    let client = BinanceClient::from_env(client_config)
        .context("Binance credentials missing: set BINANCE_API_KEY and BINANCE_API_SECRET")?;
    info!(base_url = client.base_url(), "using Binance futures");

    match client.server_time_drift().await {
        Ok(drift) if drift.abs() > MAX_CLOCK_DRIFT_MS => warn!(
            drift_ms = drift,
            "local clock differs from Binance server time, signed requests may be rejected"
        ),
        Ok(drift) => info!(drift_ms = drift, "clock in sync with Binance"),
        Err(e) => warn!(error = %e, "could not read Binance server time"),
    }

    Ok(Arc::new(client))
}

/// Telegram when enabled and configured, otherwise the log.
pub fn build_notifier(config: &KeeperConfig) -> Arc<dyn Notifier> {
    if config.telegram.enabled {
        if let Some(telegram) = TelegramNotifier::from_env() {
            info!("telegram notifications enabled");
            return Arc::new(telegram);
        }
        warn!("telegram enabled but TELEGRAM_TOKEN or TELEGRAM_CHAT_ID is unset, logging only");
    }
    Arc::new(LogNotifier)
}

use std::sync::Arc;

use perp_keeper_core::{ExchangeGateway, KeeperConfig, Notifier, SymbolFilters};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::control::ControlFiles;
use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;
use crate::state::StateStore;

/// Everything the engine components share.
///
/// Lock order: `mutation` before `protective`, never the reverse.
pub struct EngineContext {
    pub config: KeeperConfig,
    pub gateway: Arc<dyn ExchangeGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub state: StateStore,
    pub controls: ControlFiles,
    pub shutdown: CancellationToken,
    /// Held by the orchestrator for a whole open or close, across I/O.
    pub mutation: Mutex<()>,
    /// Serializes guard passes and trailing stop replacements.
    pub protective: Mutex<()>,
    pub order_retry: RetryPolicy,
    pub read_retry: RetryPolicy,
    filters: OnceCell<SymbolFilters>,
}

impl EngineContext {
    pub fn new(
        config: KeeperConfig,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let controls = ControlFiles::new(config.control.dir.clone());
        let order_retry = RetryPolicy::orders_from(&config.retry);
        let read_retry = RetryPolicy::reads_from(&config.retry);
        Self {
            config,
            gateway,
            notifier,
            state: StateStore::new(),
            controls,
            shutdown: CancellationToken::new(),
            mutation: Mutex::new(()),
            protective: Mutex::new(()),
            order_retry,
            read_retry,
            filters: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.config.trading.symbol
    }

    /// Symbol filters, fetched once and cached for the process lifetime.
    ///
    /// # Errors
    ///
    /// Returns error if the fetch fails after retries or the filters have a
    /// non-positive tick or step size.
    pub async fn filters(&self) -> Result<SymbolFilters> {
        let filters = self
            .filters
            .get_or_try_init(|| async {
                let gateway = self.gateway.as_ref();
                let symbol = self.symbol();
                let filters = self
                    .read_retry
                    .run("get_symbol_filters", move || gateway.get_symbol_filters(symbol))
                    .await?;
                if !filters.is_valid() {
                    return Err(EngineError::InvalidFilters(format!(
                        "{symbol}: tick {} step {}",
                        filters.tick_size, filters.step_size
                    )));
                }
                Ok::<_, EngineError>(filters)
            })
            .await?;
        Ok(*filters)
    }

    pub async fn notify(&self, text: &str) {
        self.notifier.notify(text).await;
    }

    /// Leverage override file, else the configured default.
    #[must_use]
    pub fn effective_leverage(&self) -> u32 {
        self.controls
            .leverage_override()
            .unwrap_or(self.config.trading.default_leverage)
    }

    /// Margin override file, else the configured default.
    #[must_use]
    pub fn effective_margin(&self) -> Decimal {
        self.controls
            .margin_override()
            .unwrap_or(self.config.trading.default_margin)
    }
}

//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use perp_keeper_core::{KeeperConfig, LoopConfig, RetryConfig, SupervisorConfig};
use perp_keeper_engine::{
    EngineContext, MemoryNotifier, PaperExchange, PaperExchangeConfig, TradeOrchestrator,
};
use rust_decimal::Decimal;
use tempfile::TempDir;

/// Config with millisecond loops and retry delays, rooted at `dir`.
pub fn fast_config(dir: &Path) -> KeeperConfig {
    let mut config = KeeperConfig::default();
    config.control.dir = dir.to_path_buf();
    config.trading.reopen_settle_ms = 1;
    config.trailing.sample_interval_ms = 10;
    config.loops = LoopConfig {
        reconcile_ms: 10,
        guard_ms: 10,
        leverage_ms: 10,
        control_ms: 10,
    };
    config.retry = RetryConfig {
        order_attempts: 3,
        order_delay_ms: 1,
        read_attempts: 3,
        read_delay_ms: 1,
        attempt_timeout_secs: 2,
    };
    config.supervisor = SupervisorConfig {
        max_restarts: 3,
        restart_delay_ms: 1,
    };
    config
}

pub struct Harness {
    pub paper: Arc<PaperExchange>,
    pub notifier: Arc<MemoryNotifier>,
    pub ctx: Arc<EngineContext>,
    pub orchestrator: Arc<TradeOrchestrator>,
    pub dir: TempDir,
}

/// Paper exchange at `price` with the default ALGOUSDT filters
/// (tick 0.0001, step 0.1, min qty 0.1, min notional 5).
pub fn harness(price: Decimal) -> Harness {
    harness_with(price, |_| {})
}

pub fn harness_with(price: Decimal, tweak: impl FnOnce(&mut KeeperConfig)) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let paper = Arc::new(PaperExchange::new(
        PaperExchangeConfig::default().with_price(price),
    ));
    let notifier = Arc::new(MemoryNotifier::new());
    let mut config = fast_config(dir.path());
    tweak(&mut config);
    let ctx = Arc::new(EngineContext::new(config, paper.clone(), notifier.clone()));
    let orchestrator = Arc::new(TradeOrchestrator::new(ctx.clone()));
    Harness {
        paper,
        notifier,
        ctx,
        orchestrator,
        dir,
    }
}

/// Polls `condition` every 10 ms for up to 3 s.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

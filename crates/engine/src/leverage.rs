use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeverageCheck {
    InSync(u32),
    Corrected { from: u32, to: u32 },
}

/// Keeps the exchange leverage for the symbol at the configured target.
#[derive(Clone)]
pub struct LeverageWatchdog {
    ctx: Arc<EngineContext>,
}

impl LeverageWatchdog {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Compares the live leverage with the target and corrects a mismatch.
    ///
    /// The live value is the open position's leverage, or the account
    /// setting for the symbol while flat.
    ///
    /// # Errors
    ///
    /// Returns error if the leverage cannot be read or changed.
    pub async fn check_once(&self) -> Result<LeverageCheck> {
        let target = self.ctx.effective_leverage();
        let gateway = self.ctx.gateway.as_ref();
        let symbol = self.ctx.symbol();

        let remote = self
            .ctx
            .read_retry
            .run("get_position", move || gateway.get_position(symbol))
            .await?;
        let actual = if remote.is_flat() {
            self.ctx
                .read_retry
                .run("default_leverage", move || gateway.default_leverage(symbol))
                .await?
        } else {
            remote.leverage
        };

        if actual == target {
            debug!(leverage = actual, "leverage in sync");
            return Ok(LeverageCheck::InSync(actual));
        }

        self.ctx
            .order_retry
            .run("set_leverage", move || gateway.set_leverage(symbol, target))
            .await?;
        self.ctx.state.write(|s| {
            if s.is_open {
                s.leverage = target;
            }
        });
        info!(from = actual, to = target, "leverage corrected");
        self.ctx
            .notify(&format!("Leverage on {symbol} corrected from x{actual} to x{target}"))
            .await;
        Ok(LeverageCheck::Corrected {
            from: actual,
            to: target,
        })
    }

    /// Checks every `loops.leverage_ms` until shutdown.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other supervised loops.
    pub async fn run(self) -> anyhow::Result<()> {
        let interval = self.ctx.config.loops.leverage_interval();
        info!(interval_ms = interval.as_millis() as u64, "leverage watchdog started");

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let Ok(_mutation) = self.ctx.mutation.try_lock() else {
                debug!("order mutation in progress, skipping leverage check");
                continue;
            };
            if let Err(e) = self.check_once().await {
                warn!(error = %e, "leverage check failed");
            }
        }

        info!("leverage watchdog stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::paper::PaperExchange;
    use perp_keeper_core::{Direction, KeeperConfig};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn setup(dir: &std::path::Path) -> (Arc<PaperExchange>, Arc<MemoryNotifier>, LeverageWatchdog) {
        let paper = Arc::new(PaperExchange::default());
        let notifier = Arc::new(MemoryNotifier::new());
        let mut config = KeeperConfig::default();
        config.control.dir = dir.to_path_buf();
        let ctx = EngineContext::new(config, paper.clone(), notifier.clone());
        (paper, notifier, LeverageWatchdog::new(Arc::new(ctx)))
    }

    #[tokio::test]
    async fn test_in_sync() {
        let dir = tempdir().unwrap();
        let (_, notifier, watchdog) = setup(dir.path());
        assert_eq!(watchdog.check_once().await.unwrap(), LeverageCheck::InSync(2));
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_corrects_external_change_while_flat() {
        let dir = tempdir().unwrap();
        let (paper, notifier, watchdog) = setup(dir.path());
        paper.set_leverage_external(10);

        assert_eq!(
            watchdog.check_once().await.unwrap(),
            LeverageCheck::Corrected { from: 10, to: 2 }
        );
        assert_eq!(paper.leverage(), 2);
        assert_eq!(notifier.count_containing("corrected from x10 to x2"), 1);
    }

    #[tokio::test]
    async fn test_follows_override_file_with_open_position() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(crate::control::LEVERAGE_FILE), "5").unwrap();
        let (paper, _, watchdog) = setup(dir.path());
        paper.open_external(Direction::Long, dec!(40));

        assert_eq!(
            watchdog.check_once().await.unwrap(),
            LeverageCheck::Corrected { from: 2, to: 5 }
        );
        assert_eq!(watchdog.check_once().await.unwrap(), LeverageCheck::InSync(5));
    }
}

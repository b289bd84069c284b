use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Production USDⓈ-M futures endpoint.
pub const BINANCE_FUTURES_URL: &str = "https://fapi.binance.com";
/// Testnet USDⓈ-M futures endpoint.
pub const BINANCE_FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub trailing: TrailingConfig,
    pub loops: LoopConfig,
    pub retry: RetryConfig,
    pub supervisor: SupervisorConfig,
    pub control: ControlConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub testnet: bool,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
    pub requests_per_second: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_URL.to_string(),
            testnet: false,
            recv_window_ms: 5_000,
            timeout_secs: 10,
            requests_per_second: 10,
        }
    }
}

impl ExchangeConfig {
    /// Base URL honoring the `testnet` switch.
    #[must_use]
    pub fn effective_base_url(&self) -> &str {
        if self.testnet {
            BINANCE_FUTURES_TESTNET_URL
        } else {
            &self.base_url
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbol: String,
    pub margin_asset: String,
    pub default_leverage: u32,
    /// Margin committed per entry, in `margin_asset`.
    pub default_margin: Decimal,
    pub sl_pct: Decimal,
    pub tp_pct: Decimal,
    pub reopen_settle_ms: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "ALGOUSDT".to_string(),
            margin_asset: "USDT".to_string(),
            default_leverage: 2,
            default_margin: Decimal::new(5, 0),
            sl_pct: Decimal::new(2, 2),
            tp_pct: Decimal::new(4, 2),
            reopen_settle_ms: 1_000,
        }
    }
}

impl TradingConfig {
    #[must_use]
    pub const fn reopen_settle(&self) -> Duration {
        Duration::from_millis(self.reopen_settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub enabled: bool,
    /// Favorable move required before the stop starts to trail.
    pub activation_pct: Decimal,
    /// Distance kept between the sampled price and the trailed stop.
    pub trail_pct: Decimal,
    pub sample_interval_ms: u64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            activation_pct: Decimal::new(1, 2),
            trail_pct: Decimal::new(1, 2),
            sample_interval_ms: 2_000,
        }
    }
}

impl TrailingConfig {
    #[must_use]
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub reconcile_ms: u64,
    pub guard_ms: u64,
    pub leverage_ms: u64,
    pub control_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            reconcile_ms: 1_000,
            guard_ms: 3_000,
            leverage_ms: 60_000,
            control_ms: 1_000,
        }
    }
}

impl LoopConfig {
    #[must_use]
    pub const fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_ms)
    }

    #[must_use]
    pub const fn guard_interval(&self) -> Duration {
        Duration::from_millis(self.guard_ms)
    }

    #[must_use]
    pub const fn leverage_interval(&self) -> Duration {
        Duration::from_millis(self.leverage_ms)
    }

    #[must_use]
    pub const fn control_interval(&self) -> Duration {
        Duration::from_millis(self.control_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub order_attempts: u32,
    pub order_delay_ms: u64,
    pub read_attempts: u32,
    pub read_delay_ms: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            order_attempts: 3,
            order_delay_ms: 3_000,
            read_attempts: 3,
            read_delay_ms: 2_000,
            attempt_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_restarts: u32,
    pub restart_delay_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            restart_delay_ms: 5_000,
        }
    }
}

impl SupervisorConfig {
    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Directory holding the control flag files and the instance lock.
    pub dir: PathBuf,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
}

/// Configuration values rejected by [`KeeperConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("trading.symbol must not be empty")]
    EmptySymbol,
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: String },
    #[error("trading.default_leverage must be at least 1")]
    ZeroLeverage,
}

impl KeeperConfig {
    /// Checks values that would make the engine misbehave.
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trading.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        if self.trading.default_leverage == 0 {
            return Err(ConfigError::ZeroLeverage);
        }

        let positives = [
            ("trading.default_margin", self.trading.default_margin),
            ("trading.sl_pct", self.trading.sl_pct),
            ("trading.tp_pct", self.trading.tp_pct),
            ("trailing.activation_pct", self.trailing.activation_pct),
            ("trailing.trail_pct", self.trailing.trail_pct),
        ];
        for (field, value) in positives {
            if value <= Decimal::ZERO {
                return Err(ConfigError::NonPositive {
                    field,
                    value: value.to_string(),
                });
            }
        }

        let intervals = [
            ("loops.reconcile_ms", self.loops.reconcile_ms),
            ("loops.guard_ms", self.loops.guard_ms),
            ("loops.leverage_ms", self.loops.leverage_ms),
            ("loops.control_ms", self.loops.control_ms),
            ("trailing.sample_interval_ms", self.trailing.sample_interval_ms),
            ("retry.order_attempts", u64::from(self.retry.order_attempts)),
            ("retry.read_attempts", u64::from(self.retry.read_attempts)),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::NonPositive {
                    field,
                    value: value.to_string(),
                });
            }
        }

        Ok(())
    }
}

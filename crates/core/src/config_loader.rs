use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::config::KeeperConfig;

/// Default location of the keeper configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/Keeper.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Keeper.toml` and `KEEPER_` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a value is invalid.
    pub fn load() -> Result<KeeperConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration by layering compiled defaults, the TOML file at
    /// `path` (optional) and `KEEPER_`-prefixed environment variables, with
    /// `__` separating nested keys (`KEEPER_TRADING__SYMBOL`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a value is invalid.
    pub fn load_from(path: impl AsRef<Path>) -> Result<KeeperConfig> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults and environment");
        }
        let config: KeeperConfig = Self::figment(path)
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;

        config.validate().context("invalid configuration")?;
        tracing::info!(
            path = %path.display(),
            symbol = %config.trading.symbol,
            testnet = config.exchange.testnet,
            "configuration loaded"
        );

        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(KeeperConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("KEEPER_").split("__"))
    }
}

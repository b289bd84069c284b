pub mod config;
pub mod config_loader;
pub mod error;
pub mod filters;
pub mod orders;
pub mod position;
pub mod position_sizing;
pub mod traits;

pub use config::{
    ConfigError, ControlConfig, ExchangeConfig, KeeperConfig, LoopConfig, RetryConfig,
    SupervisorConfig, TelegramConfig, TradingConfig, TrailingConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{GatewayError, GatewayResult};
pub use filters::{ceil_to_step, floor_to_step, round_to_tick, SymbolFilters};
pub use orders::{
    protective_intents, OpenOrder, OrderAck, OrderSide, OrderType, ProtectiveIntent,
    ProtectiveKind,
};
pub use position::{realized_pnl, Direction, PositionSnapshot, RemotePosition};
pub use position_sizing::{normalize_quantity, required_margin, QuantityAdjustment, QuantityPlan};
pub use traits::{ExchangeGateway, Notifier};

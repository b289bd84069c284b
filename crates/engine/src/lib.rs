//! Reconciliation engine for a single leveraged futures position.
//!
//! The [`Keeper`] owns an [`EngineContext`] shared by:
//!
//! - [`TradeOrchestrator`]: open and close under the mutation lock
//! - [`OrderGuard`]: one closing stop and one take-profit while open, none while flat
//! - [`PositionReconciler`]: converges the snapshot onto the exchange
//! - [`TrailingStopEngine`]: ratchets the stop behind favorable moves
//! - [`LeverageWatchdog`]: keeps the exchange leverage on target
//! - [`ControlWatcher`]: stop and manual-close control files
//!
//! Background loops run under a restarting [`Supervisor`].

pub mod context;
pub mod control;
pub mod error;
pub mod guard;
pub mod keeper;
pub mod leverage;
pub mod notify;
pub mod orchestrator;
pub mod paper;
pub mod reconciler;
pub mod retry;
pub mod state;
pub mod supervisor;
pub mod trailing;

pub use context::EngineContext;
pub use control::{ControlAction, ControlFiles, ControlWatcher, InstanceLock, TradingMode};
pub use error::{EngineError, Result};
pub use guard::{GuardPass, GuardReport, OrderGuard};
pub use keeper::Keeper;
pub use leverage::{LeverageCheck, LeverageWatchdog};
pub use notify::{LogNotifier, MemoryNotifier, TelegramNotifier};
pub use orchestrator::{
    ClosedPosition, CloseOutcome, OpenOutcome, OpenedPosition, SkipReason, TradeOrchestrator,
};
pub use paper::{PaperCall, PaperExchange, PaperExchangeConfig};
pub use reconciler::{PositionReconciler, ReconcileOutcome};
pub use retry::RetryPolicy;
pub use state::StateStore;
pub use supervisor::{Supervisor, TaskExit};
pub use trailing::{TrailingDecision, TrailingHandle, TrailingState, TrailingStop, TrailingStopEngine};

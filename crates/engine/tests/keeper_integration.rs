//! Keeper startup, background loops and control files against the paper exchange.

mod common;

use std::sync::Arc;

use common::{fast_config, wait_until};
use perp_keeper_core::{Direction, OrderSide, OrderType, ProtectiveKind};
use perp_keeper_engine::control::LOCK_FILE;
use perp_keeper_engine::{
    EngineError, InstanceLock, Keeper, MemoryNotifier, PaperExchange, PaperExchangeConfig,
    TaskExit,
};
use rust_decimal_macros::dec;
use tempfile::TempDir;

struct Setup {
    paper: Arc<PaperExchange>,
    notifier: Arc<MemoryNotifier>,
    keeper: Keeper,
    dir: TempDir,
}

fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let paper = Arc::new(PaperExchange::new(
        PaperExchangeConfig::default().with_price(dec!(0.25)),
    ));
    let notifier = Arc::new(MemoryNotifier::new());
    let keeper = Keeper::new(fast_config(dir.path()), paper.clone(), notifier.clone());
    Setup {
        paper,
        notifier,
        keeper,
        dir,
    }
}

// =============================================================================
// Bootstrap
// =============================================================================

#[tokio::test]
async fn test_bootstrap_flat() {
    let mut s = setup();

    let snapshot = s.keeper.bootstrap().await.unwrap();
    assert!(!snapshot.is_open);
    assert!(s.dir.path().join(LOCK_FILE).exists());
    assert!(s.dir.path().join("status.txt").exists());
    assert_eq!(s.notifier.count_containing("Keeper started on ALGOUSDT: flat"), 1);

    s.keeper.shutdown().await;
    assert!(!s.dir.path().join(LOCK_FILE).exists());
}

#[tokio::test]
async fn test_bootstrap_adopts_and_protects_existing_position() {
    let mut s = setup();
    s.paper.open_external(Direction::Short, dec!(40));

    let snapshot = s.keeper.bootstrap().await.unwrap();
    assert!(snapshot.is_open);
    assert_eq!(snapshot.direction, Direction::Short);
    assert_eq!(snapshot.quantity, dec!(40));

    let stops = s.paper.protective_orders(ProtectiveKind::Stop);
    let tps = s.paper.protective_orders(ProtectiveKind::TakeProfit);
    assert_eq!(stops[0].trigger_price, Some(dec!(0.255)));
    assert_eq!(tps[0].trigger_price, Some(dec!(0.24)));
    assert!(s.keeper.orchestrator().trailing_active());

    s.keeper.shutdown().await;
    assert_eq!(s.paper.orders().len(), 2);
}

#[tokio::test]
async fn test_bootstrap_refuses_disabled_account() {
    let mut s = setup();
    s.paper.set_can_trade(false);

    let err = s.keeper.bootstrap().await.unwrap_err();
    assert!(matches!(err, EngineError::TradingDisabled));
    assert!(err.is_fatal());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_bootstrap_refuses_second_instance() {
    let mut s = setup();
    let _held = InstanceLock::acquire(s.dir.path()).unwrap();

    let err = s.keeper.bootstrap().await.unwrap_err();
    assert!(matches!(err, EngineError::LockHeld { pid } if pid == std::process::id()));
}

#[tokio::test]
async fn test_bootstrap_corrects_leverage() {
    let mut s = setup();
    s.paper.set_leverage_external(20);

    s.keeper.bootstrap().await.unwrap();
    assert_eq!(s.paper.leverage(), 2);
    assert_eq!(s.notifier.count_containing("corrected from x20 to x2"), 1);
    s.keeper.shutdown().await;
}

// =============================================================================
// Background Loops
// =============================================================================

#[tokio::test]
async fn test_external_open_is_adopted_and_protected() {
    let mut s = setup();
    s.keeper.bootstrap().await.unwrap();
    s.keeper.spawn_loops();

    s.paper.open_external(Direction::Long, dec!(40));
    let ctx = s.keeper.context().clone();
    assert!(wait_until(|| ctx.state.is_open()).await);
    assert!(
        wait_until(|| {
            s.paper.protective_orders(ProtectiveKind::Stop).len() == 1
                && s.paper.protective_orders(ProtectiveKind::TakeProfit).len() == 1
        })
        .await
    );
    assert_eq!(s.notifier.count_containing("Externally opened"), 1);
    assert!(s.paper.orders().iter().all(|o| o.side == OrderSide::Sell));

    let exits = s.keeper.shutdown().await;
    assert_eq!(exits.len(), 4);
    assert!(exits.iter().all(|(_, exit)| *exit == TaskExit::Cancelled));
}

#[tokio::test]
async fn test_stop_hit_resets_snapshot_and_clears_orphans() {
    let mut s = setup();
    s.keeper.bootstrap().await.unwrap();
    s.keeper.spawn_loops();

    let orchestrator = s.keeper.orchestrator().clone();
    assert!(orchestrator
        .open_position(Direction::Long, None, None)
        .await
        .is_opened());
    assert_eq!(s.paper.orders().len(), 2);

    s.paper.set_price(dec!(0.24));
    assert!(s.paper.trigger_stops().is_some());
    let ctx = s.keeper.context().clone();
    assert!(wait_until(|| !ctx.state.is_open()).await);
    assert!(wait_until(|| s.paper.orders().is_empty()).await);
    assert_eq!(s.notifier.count_containing("closed on exchange"), 1);

    s.keeper.shutdown().await;
}

#[tokio::test]
async fn test_guard_replaces_cancelled_protection() {
    let mut s = setup();
    s.keeper.bootstrap().await.unwrap();
    let orchestrator = s.keeper.orchestrator().clone();
    assert!(orchestrator
        .open_position(Direction::Long, None, None)
        .await
        .is_opened());
    s.keeper.spawn_loops();

    let tp = s.paper.protective_orders(ProtectiveKind::TakeProfit);
    perp_keeper_core::ExchangeGateway::cancel_order(s.paper.as_ref(), "ALGOUSDT", &tp[0].id)
        .await
        .unwrap();
    assert!(wait_until(|| s.paper.protective_orders(ProtectiveKind::TakeProfit).len() == 1).await);

    s.paper
        .insert_order(OrderType::StopMarket, OrderSide::Sell, dec!(0.2), true);
    assert!(wait_until(|| s.paper.protective_orders(ProtectiveKind::Stop).len() == 1).await);
    assert_eq!(
        s.paper.protective_orders(ProtectiveKind::Stop)[0].trigger_price,
        Some(dec!(0.245))
    );

    s.keeper.shutdown().await;
}

// =============================================================================
// Control Files
// =============================================================================

#[tokio::test]
async fn test_manual_close_request() {
    let mut s = setup();
    s.keeper.bootstrap().await.unwrap();
    s.keeper.spawn_loops();
    let orchestrator = s.keeper.orchestrator().clone();
    assert!(orchestrator
        .open_position(Direction::Short, None, None)
        .await
        .is_opened());

    s.keeper.context().controls.request_manual_close().unwrap();
    let ctx = s.keeper.context().clone();
    assert!(wait_until(|| s.paper.position().is_zero() && !ctx.controls.manual_close_requested()).await);
    assert!(wait_until(|| s.paper.orders().is_empty()).await);
    assert_eq!(s.notifier.count_containing("Closed SHORT"), 1);

    s.keeper.shutdown().await;
}

#[tokio::test]
async fn test_stop_file_shuts_down() {
    let mut s = setup();
    s.keeper.bootstrap().await.unwrap();
    s.keeper.spawn_loops();

    s.keeper.context().controls.request_stop().unwrap();
    let exits = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        s.keeper.run_until_shutdown(),
    )
    .await
    .unwrap();

    assert_eq!(exits.len(), 4);
    assert!(exits
        .iter()
        .all(|(_, exit)| !matches!(exit, TaskExit::Disabled { .. })));
    assert!(!s.dir.path().join(LOCK_FILE).exists());
    assert!(!s.dir.path().join("stop.txt").exists());
    assert_eq!(s.notifier.count_containing("Stop requested"), 1);
    assert_eq!(s.notifier.count_containing("Keeper stopped"), 1);
}

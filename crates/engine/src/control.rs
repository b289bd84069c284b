//! File-based control signals and the single-instance lock.
//!
//! Operators steer a running keeper by dropping small files into the control
//! directory. A missing or unparsable file always falls back to the
//! configured default.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use perp_keeper_core::PositionSnapshot;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::orchestrator::{CloseOutcome, TradeOrchestrator};

pub const STOP_FILE: &str = "stop.txt";
pub const MANUAL_CLOSE_FILE: &str = "manual_close_request.txt";
pub const MODE_FILE: &str = "mode.txt";
pub const LEVERAGE_FILE: &str = "leverage.txt";
pub const MARGIN_FILE: &str = "quantity.txt";
pub const STATUS_FILE: &str = "status.txt";
pub const LOCK_FILE: &str = "bot.lock";

/// Whether signals are executed or only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    #[default]
    Auto,
    Alert,
}

impl FromStr for TradingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "alert" => Ok(Self::Alert),
            other => Err(format!("unknown trading mode: {other}")),
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Alert => write!(f, "alert"),
        }
    }
}

/// Readers and writers for the control directory.
#[derive(Debug, Clone)]
pub struct ControlFiles {
    dir: PathBuf,
}

impl ControlFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read_parsed<T: FromStr>(&self, name: &str) -> Option<T> {
        let raw = fs::read_to_string(self.path(name)).ok()?;
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                debug!(file = name, content = raw.trim(), "ignoring unparsable control file");
                None
            }
        }
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.path(STOP_FILE).exists()
    }

    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn request_stop(&self) -> std::io::Result<()> {
        fs::write(self.path(STOP_FILE), Utc::now().to_rfc3339())
    }

    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    pub fn clear_stop(&self) -> std::io::Result<()> {
        remove_if_exists(&self.path(STOP_FILE))
    }

    #[must_use]
    pub fn manual_close_requested(&self) -> bool {
        self.path(MANUAL_CLOSE_FILE).exists()
    }

    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn request_manual_close(&self) -> std::io::Result<()> {
        fs::write(self.path(MANUAL_CLOSE_FILE), Utc::now().to_rfc3339())
    }

    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    pub fn clear_manual_close(&self) -> std::io::Result<()> {
        remove_if_exists(&self.path(MANUAL_CLOSE_FILE))
    }

    /// Trading mode from `mode.txt`, `Auto` when absent.
    #[must_use]
    pub fn mode(&self) -> TradingMode {
        self.read_parsed(MODE_FILE).unwrap_or_default()
    }

    /// Positive leverage from `leverage.txt`.
    #[must_use]
    pub fn leverage_override(&self) -> Option<u32> {
        self.read_parsed::<u32>(LEVERAGE_FILE).filter(|l| *l > 0)
    }

    /// Positive margin from `quantity.txt`.
    #[must_use]
    pub fn margin_override(&self) -> Option<Decimal> {
        self.read_parsed::<Decimal>(MARGIN_FILE)
            .filter(|m| *m > Decimal::ZERO)
    }

    /// Writes `status.txt` with the run state and current snapshot.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn write_status(&self, state: &str, snapshot: &PositionSnapshot) -> std::io::Result<()> {
        let mut body = format!("state={state}\nupdated_at={}\n", Utc::now().to_rfc3339());
        if snapshot.is_open {
            body.push_str(&format!(
                "position={} {} @ {} x{}\n",
                snapshot.direction, snapshot.quantity, snapshot.entry_price, snapshot.leverage
            ));
        } else {
            body.push_str("position=FLAT\n");
        }
        fs::write(self.path(STATUS_FILE), body)
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

// =============================================================================
// Instance Lock
// =============================================================================

/// Exclusive marker file holding the owner's pid. Removed on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Creates `bot.lock` in `dir`, replacing a lock left by a dead process.
    ///
    /// # Errors
    /// Returns `LockHeld` when a live process owns the lock.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(LOCK_FILE);
        let pid = std::process::id();

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    write!(file, "{pid}")?;
                    info!(path = %path.display(), pid, "instance lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(holder) = Self::holder(dir.as_ref()) {
                        return Err(EngineError::LockHeld { pid: holder });
                    }
                    warn!(path = %path.display(), "removing stale instance lock");
                    remove_if_exists(&path)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "instance lock reappeared while acquiring",
        )))
    }

    /// Pid of a live process holding the lock in `dir`, if any.
    #[must_use]
    pub fn holder(dir: &Path) -> Option<u32> {
        let raw = fs::read_to_string(dir.join(LOCK_FILE)).ok()?;
        let pid = raw.trim().parse::<u32>().ok()?;
        process_alive(pid).then_some(pid)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove instance lock");
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without procfs a recorded pid is trusted; stale locks must be removed by hand.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

// =============================================================================
// Control Watcher
// =============================================================================

/// Polls the control directory for stop and manual-close requests.
#[derive(Clone)]
pub struct ControlWatcher {
    ctx: Arc<EngineContext>,
    orchestrator: Arc<TradeOrchestrator>,
}

/// What a single poll of the control directory did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Idle,
    StopRequested,
    ManualClose(String),
}

impl ControlWatcher {
    pub fn new(ctx: Arc<EngineContext>, orchestrator: Arc<TradeOrchestrator>) -> Self {
        Self { ctx, orchestrator }
    }

    /// Handles pending control files once.
    pub async fn poll(&self) -> ControlAction {
        let controls = &self.ctx.controls;

        if controls.stop_requested() {
            info!("stop file detected");
            self.ctx.notify("Stop requested, shutting down").await;
            self.ctx.shutdown.cancel();
            return ControlAction::StopRequested;
        }

        if controls.manual_close_requested() {
            info!("manual close requested");
            let summary = match self.orchestrator.close_position().await {
                CloseOutcome::Closed(closed) => format!("closed, pnl {}", closed.pnl),
                CloseOutcome::NothingToClose => "nothing to close".to_string(),
                CloseOutcome::Failed(e) => format!("failed: {e}"),
            };
            if let Err(e) = controls.clear_manual_close() {
                warn!(error = %e, "failed to clear manual close request");
            }
            return ControlAction::ManualClose(summary);
        }

        if let Err(e) = controls.write_status("running", &self.ctx.state.read()) {
            debug!(error = %e, "failed to write status file");
        }
        ControlAction::Idle
    }

    /// Polls every `loops.control_ms` until shutdown.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other supervised loops.
    pub async fn run(self) -> anyhow::Result<()> {
        let interval = self.ctx.config.loops.control_interval();
        info!(interval_ms = interval.as_millis() as u64, "control watcher started");

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    if self.poll().await == ControlAction::StopRequested {
                        break;
                    }
                }
            }
        }

        info!("control watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perp_keeper_core::Direction;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    // ==================== Control File Tests ====================

    #[test]
    fn test_defaults_when_files_missing() {
        let dir = tempdir().unwrap();
        let controls = ControlFiles::new(dir.path());
        assert!(!controls.stop_requested());
        assert!(!controls.manual_close_requested());
        assert_eq!(controls.mode(), TradingMode::Auto);
        assert_eq!(controls.leverage_override(), None);
        assert_eq!(controls.margin_override(), None);
    }

    #[test]
    fn test_overrides_parsed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MODE_FILE), "ALERT\n").unwrap();
        fs::write(dir.path().join(LEVERAGE_FILE), " 5 ").unwrap();
        fs::write(dir.path().join(MARGIN_FILE), "12.5").unwrap();

        let controls = ControlFiles::new(dir.path());
        assert_eq!(controls.mode(), TradingMode::Alert);
        assert_eq!(controls.leverage_override(), Some(5));
        assert_eq!(controls.margin_override(), Some(dec!(12.5)));
    }

    #[test]
    fn test_unparsable_overrides_fall_back() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MODE_FILE), "yolo").unwrap();
        fs::write(dir.path().join(LEVERAGE_FILE), "0").unwrap();
        fs::write(dir.path().join(MARGIN_FILE), "-3").unwrap();

        let controls = ControlFiles::new(dir.path());
        assert_eq!(controls.mode(), TradingMode::Auto);
        assert_eq!(controls.leverage_override(), None);
        assert_eq!(controls.margin_override(), None);
    }

    #[test]
    fn test_request_and_clear_flags() {
        let dir = tempdir().unwrap();
        let controls = ControlFiles::new(dir.path());

        controls.request_manual_close().unwrap();
        assert!(controls.manual_close_requested());
        controls.clear_manual_close().unwrap();
        assert!(!controls.manual_close_requested());
        controls.clear_manual_close().unwrap();

        controls.request_stop().unwrap();
        assert!(controls.stop_requested());
        controls.clear_stop().unwrap();
        assert!(!controls.stop_requested());
    }

    #[test]
    fn test_write_status() {
        let dir = tempdir().unwrap();
        let controls = ControlFiles::new(dir.path());
        let snapshot = PositionSnapshot {
            is_open: true,
            direction: Direction::Long,
            entry_price: dec!(0.25),
            quantity: dec!(40),
            leverage: 2,
            opened_at: None,
        };
        controls.write_status("running", &snapshot).unwrap();
        let body = fs::read_to_string(dir.path().join(STATUS_FILE)).unwrap();
        assert!(body.contains("state=running"));
        assert!(body.contains("position=LONG 40 @ 0.25 x2"));
    }

    // ==================== Instance Lock Tests ====================

    #[test]
    fn test_lock_is_exclusive_and_released() {
        let dir = tempdir().unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content, std::process::id().to_string());

        #[cfg(target_os = "linux")]
        assert!(matches!(
            InstanceLock::acquire(dir.path()),
            Err(EngineError::LockHeld { .. })
        ));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE).exists());
        assert!(InstanceLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_stale_lock_replaced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOCK_FILE), "not-a-pid").unwrap();
        let lock = InstanceLock::acquire(dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(lock.path()).unwrap(),
            std::process::id().to_string()
        );
    }
}

//! Restart-on-failure supervision for the background loops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use perp_keeper_core::{Notifier, SupervisorConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How a supervised loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
    /// The loop returned `Ok` on its own.
    Completed,
    Cancelled,
    /// Restart budget exhausted.
    Disabled { restarts: u32 },
}

pub struct Supervisor {
    notifier: Arc<dyn Notifier>,
    config: SupervisorConfig,
    shutdown: CancellationToken,
    tasks: Vec<(String, JoinHandle<TaskExit>)>,
}

impl Supervisor {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        config: SupervisorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            notifier,
            config,
            shutdown,
            tasks: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawns the future built by `factory`, rebuilding it after an error or
    /// panic until `max_restarts` is spent.
    pub fn spawn<F, Fut>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(supervise(
            name.to_string(),
            factory,
            self.notifier.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        ));
        self.tasks.push((name.to_string(), handle));
    }

    /// Waits for every loop, aborting those still running after `grace`.
    pub async fn join_all(self, grace: Duration) -> Vec<(String, TaskExit)> {
        let mut exits = Vec::with_capacity(self.tasks.len());
        for (name, mut handle) in self.tasks {
            let exit = match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(exit)) => exit,
                Ok(Err(e)) => {
                    error!(task = %name, error = %e, "supervisor task failed");
                    TaskExit::Cancelled
                }
                Err(_) => {
                    warn!(task = %name, "task did not stop in time, aborting");
                    handle.abort();
                    TaskExit::Cancelled
                }
            };
            exits.push((name, exit));
        }
        exits
    }
}

/// Aborts the running loop when the supervising task is dropped or aborted.
struct AbortOnDrop(JoinHandle<anyhow::Result<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn supervise<F, Fut>(
    name: String,
    factory: F,
    notifier: Arc<dyn Notifier>,
    config: SupervisorConfig,
    shutdown: CancellationToken,
) -> TaskExit
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut restarts = 0;

    loop {
        if shutdown.is_cancelled() {
            return TaskExit::Cancelled;
        }

        let mut run = AbortOnDrop(tokio::spawn(factory()));
        let failure = match (&mut run.0).await {
            Ok(Ok(())) if shutdown.is_cancelled() => return TaskExit::Cancelled,
            Ok(Ok(())) => {
                info!(task = %name, "task completed");
                return TaskExit::Completed;
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(e) if e.is_panic() => "panicked".to_string(),
            Err(e) => e.to_string(),
        };
        if shutdown.is_cancelled() {
            return TaskExit::Cancelled;
        }

        if restarts >= config.max_restarts {
            error!(task = %name, restarts, failure = %failure, "restart budget exhausted, task disabled");
            notifier
                .notify(&format!(
                    "Loop '{name}' disabled after {restarts} restarts: {failure}"
                ))
                .await;
            return TaskExit::Disabled { restarts };
        }

        restarts += 1;
        warn!(task = %name, restart = restarts, failure = %failure, "task failed, restarting");
        tokio::select! {
            _ = shutdown.cancelled() => return TaskExit::Cancelled,
            _ = tokio::time::sleep(config.restart_delay()) => {}
        }
    }
}

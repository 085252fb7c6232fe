//! Supervised periodic background tasks.
//!
//! Each task runs on a fixed interval until the supervisor signals stop over
//! a `watch` channel, the supervisor is dropped, or its target is gone.
//! Shutdown joins every task with a bounded grace period and aborts the ones
//! that do not finish in time.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use agui_state_store::StorageResult;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Longest period a task is scheduled with; longer ones are clamped.
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug)]
pub(crate) struct Supervisor {
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Supervisor {
    pub(crate) fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Run `job` against `target` every `period`, skipping the immediate
    /// first tick. A failed iteration is logged and the loop continues.
    pub(crate) fn spawn_periodic<T, F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        target: Weak<T>,
        job: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = StorageResult<()>> + Send + 'static,
    {
        let period = period.min(MAX_PERIOD);
        let stop_rx = self.stop_tx.subscribe();
        let handle = tokio::spawn(periodic_loop(name, period, stop_rx, target, job));
        debug!(task = name, period_ms = period.as_millis() as u64, "background task started");
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
    }

    pub(crate) fn running(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Signal stop and join every task, waiting at most `grace` for each.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        self.stop_tx.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));

        for (name, mut handle) in tasks {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "background task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "background task ended abnormally"),
                Err(_) => {
                    warn!(
                        task = name,
                        grace_ms = grace.as_millis() as u64,
                        "background task did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }
    }
}

async fn periodic_loop<T, F, Fut>(
    name: &'static str,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
    target: Weak<T>,
    job: F,
) where
    F: Fn(Arc<T>) -> Fut,
    Fut: Future<Output = StorageResult<()>>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(target) = target.upgrade() else {
                    break;
                };
                if let Err(e) = job(target).await {
                    error!(task = name, error = %e, code = e.code(), "background task iteration failed");
                }
            }
        }
    }
}

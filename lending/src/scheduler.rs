//! Periodic background work: token expiry and alert escalation.

use crate::error::Result;
use crate::escalation::EscalationEngine;
use crate::lifecycle::LifecycleController;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// What one scheduler tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Requests moved to `expired`
    pub expired: usize,
    /// Stations whose escalation run succeeded
    pub stations_ok: usize,
    /// Stations whose escalation run failed
    pub stations_failed: usize,
}

/// Runs [`LifecycleController::expire_overdue`] and
/// [`EscalationEngine::run_all`] on a fixed interval.
pub struct Scheduler {
    lifecycle: Arc<LifecycleController>,
    engine: Arc<EscalationEngine>,
    interval: Duration,
    parallelism: usize,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    /// Create a scheduler and the sender that stops it.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (scheduler, shutdown) = Scheduler::new(lifecycle, engine, Duration::from_secs(86_400), 4);
    /// let handle = tokio::spawn(scheduler.run());
    /// // later
    /// shutdown.send(true).ok();
    /// handle.await?;
    /// ```
    #[must_use]
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        engine: Arc<EscalationEngine>,
        interval: Duration,
        parallelism: usize,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Self {
            lifecycle,
            engine,
            interval,
            parallelism,
            shutdown: shutdown_rx,
        };
        (scheduler, shutdown_tx)
    }

    /// Run one round now.
    ///
    /// Expiry runs first so an expired request never triggers work in the
    /// same round. Per-station escalation failures are counted, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`LendingError::Storage`](crate::error::LendingError::Storage)
    /// if the expiry sweep or the station list cannot be read.
    pub async fn tick(&self) -> Result<TickReport> {
        let expired = self.lifecycle.expire_overdue().await?;
        let results = self.engine.run_all(self.parallelism).await?;

        let stations_failed = results.iter().filter(|(_, r)| r.is_err()).count();
        Ok(TickReport {
            expired,
            stations_ok: results.len() - stations_failed,
            stations_failed,
        })
    }

    /// Tick immediately, then every interval, until shutdown is signalled.
    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting scheduler");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*self.shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) => tracing::info!(
                            expired = report.expired,
                            stations_ok = report.stations_ok,
                            stations_failed = report.stations_failed,
                            "scheduler tick finished"
                        ),
                        Err(error) => tracing::error!(%error, "scheduler tick failed"),
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

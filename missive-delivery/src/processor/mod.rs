//! Delivery scheduler orchestration

pub mod dispatch;
pub mod process;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use missive_common::{
    Signal, internal,
    tracing::{debug, error, info, warn},
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

pub use dispatch::{DispatchOutcome, Dispatcher};

use crate::error::DeliveryError;

const fn default_tick_interval() -> u64 {
    30
}

const fn default_batch_size() -> usize {
    10
}

const fn default_max_concurrent_deliveries() -> usize {
    4
}

const fn default_cleanup_interval() -> u64 {
    3600 // 1 hour
}

const fn default_retention() -> u64 {
    2_592_000 // 30 days
}

const fn default_shutdown_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often ready items are selected for dispatch (in seconds)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Most items taken from the queue in one tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Items of one batch dispatched in parallel
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    /// How often terminal items past retention are purged (in seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// How long terminal items are kept (in seconds)
    ///
    /// Default: 2592000 seconds (30 days)
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// How long shutdown waits for an in-flight batch (in seconds)
    ///
    /// Items still `SENDING` when this runs out are sent again after restart.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            batch_size: default_batch_size(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            cleanup_interval_secs: default_cleanup_interval(),
            retention_secs: default_retention(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Periodic driver of the dispatcher
///
/// Cheap to clone; clones share the in-flight guard and running flag.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    dispatcher: Arc<Dispatcher>,
    processing: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            processing: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// True while [`Scheduler::serve`] is looping
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run until a shutdown signal arrives
    ///
    /// Each tick's batch runs on its own task so the loop stays responsive;
    /// a tick that finds the previous batch still draining is skipped.
    ///
    /// ## Graceful Shutdown
    ///
    /// 1. Stop starting new batches
    /// 2. Wait for the in-flight batch, up to `shutdown_timeout_secs`
    /// 3. Make a last attempt at persisting outcomes whose write failed
    /// 4. Exit; anything still `SENDING` is requeued by the next restore
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler is already running.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(DeliveryError::System(
                "Scheduler is already running".to_string(),
            ));
        }

        internal!(
            level = INFO,
            "Scheduler starting: tick every {}s, batch {}, {} workers",
            self.config.tick_interval_secs,
            self.config.batch_size,
            self.config.max_concurrent_deliveries
        );

        let mut tick_timer =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        let mut cleanup_timer =
            tokio::time::interval(Duration::from_secs(self.config.cleanup_interval_secs.max(1)));
        tick_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip the first tick to avoid immediate execution
        tick_timer.tick().await;
        cleanup_timer.tick().await;

        let retention = i64::try_from(self.config.retention_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        let mut in_flight: Option<JoinHandle<usize>> = None;

        loop {
            tokio::select! {
                _ = tick_timer.tick() => {
                    if in_flight.as_ref().is_some_and(|batch| !batch.is_finished()) {
                        debug!("Previous batch still draining, skipping tick");
                        continue;
                    }

                    let scheduler = self.clone();
                    in_flight = Some(tokio::spawn(async move { scheduler.tick().await }));
                }
                _ = cleanup_timer.tick() => {
                    let purged = self.dispatcher.queue().purge_expired(retention).await;
                    if purged > 0 {
                        info!(purged, "Purged expired queue items");
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Scheduler received shutdown signal");
                        }
                        Err(e) => {
                            error!("Scheduler shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        if let Some(batch) = in_flight {
            let shutdown_timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
            match tokio::time::timeout(shutdown_timeout, batch).await {
                Ok(Ok(_)) => internal!("All in-flight deliveries completed"),
                Ok(Err(e)) => error!("In-flight batch failed during shutdown: {e}"),
                Err(_) => warn!(
                    "Shutdown timeout exceeded, in-flight deliveries will be retried on restart"
                ),
            }
        }

        if self.dispatcher.pending_outcomes() > 0 {
            self.dispatcher.record_pending().await;
            let unrecorded = self.dispatcher.pending_outcomes();
            if unrecorded > 0 {
                warn!(
                    unrecorded,
                    "Delivery outcomes not persisted, those items will be sent again on restart"
                );
            }
        }

        self.running.store(false, Ordering::Release);
        internal!(level = INFO, "Scheduler shutdown complete");

        Ok(())
    }
}

//! One scheduler tick: select ready items and dispatch them in parallel

use std::sync::{Arc, atomic::Ordering};

use missive_common::{
    QueueId,
    tracing::{debug, error, info},
};
use tokio::task::JoinSet;

use super::{Dispatcher, Scheduler};

/// Dispatch a single item (spawned as a task)
async fn dispatch_single(dispatcher: Arc<Dispatcher>, id: QueueId) -> bool {
    match dispatcher.dispatch(&id).await {
        Ok(outcome) => outcome.is_some(),
        Err(e) => {
            error!(queue_id = %id, error = %e, "Dispatch failed");
            false
        }
    }
}

impl Scheduler {
    /// Run one tick and return how many items were dispatched
    ///
    /// First writes any outcome a previous tick failed to persist. Then takes
    /// at most `batch_size` ready items, highest priority first, and
    /// dispatches up to `max_concurrent_deliveries` of them at a time. If
    /// another tick is still running this one does nothing.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tick(&self) -> usize {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Tick already in progress, skipping");
            return 0;
        }

        let dispatched = self.process_batch().await;
        self.processing.store(false, Ordering::Release);

        dispatched
    }

    async fn process_batch(&self) -> usize {
        if self.dispatcher.pending_outcomes() > 0 {
            let recorded = self.dispatcher.record_pending().await;
            info!(recorded, "Persisted delivery outcomes left over from a failed write");
        }

        let now = self.dispatcher.queue().clock().now();
        let ready: Vec<QueueId> = self
            .dispatcher
            .queue()
            .list_ready(now)
            .iter()
            .take(self.config.batch_size)
            .map(|item| item.id())
            .collect();

        if ready.is_empty() {
            debug!("No items ready for dispatch");
            return 0;
        }

        info!(
            ready = ready.len(),
            max_concurrent = self.config.max_concurrent_deliveries,
            "Dispatching batch"
        );

        let mut join_set: JoinSet<bool> = JoinSet::new();
        let mut pending = ready.into_iter();
        let mut dispatched = 0;

        // Spawn initial batch of tasks (up to max_concurrent_deliveries)
        for id in pending
            .by_ref()
            .take(self.config.max_concurrent_deliveries.max(1))
        {
            join_set.spawn(dispatch_single(Arc::clone(&self.dispatcher), id));
        }

        // As tasks complete, spawn new ones for remaining items
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => error!("Dispatch task failed: {e}"),
            }

            if let Some(id) = pending.next() {
                join_set.spawn(dispatch_single(Arc::clone(&self.dispatcher), id));
            }
        }

        dispatched
    }
}

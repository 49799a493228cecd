//! Provider cascade for one claimed item

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use missive_common::{
    DeliveryEvent, FailedAttempt, QueueId, QueueItem,
    tracing::{debug, error, info, warn},
};

use crate::{
    error::{QueueError, TransportError},
    events::EventBus,
    policy::RetryPolicy,
    queue::DeliveryQueue,
    transport::{TransportReceipt, TransportRegistry},
};

/// How one dispatch attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        provider: String,
        tracking_id: Option<String>,
    },
    /// Every transport failed, the item is back in the queue
    RetryScheduled {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Every transport failed and the retry budget is spent
    Failed { attempts: u32, reason: String },
}

impl DispatchOutcome {
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Every transport failed for one attempt
#[derive(Debug, Clone)]
struct CascadeFailure {
    /// Kept on the item, names the last transport tried
    reason: String,
    /// Every transport's error, for logs and events
    detail: String,
}

/// A cascade result that has not been persisted yet
#[derive(Debug, Clone)]
enum Attempt {
    Sent {
        provider: String,
        receipt: TransportReceipt,
    },
    Failed(CascadeFailure),
}

#[derive(Debug, Clone)]
struct Unrecorded {
    attempt: Attempt,
    at: DateTime<Utc>,
}

/// Claims items and runs them through the active transports
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: DeliveryQueue,
    registry: Arc<TransportRegistry>,
    retry: RetryPolicy,
    events: EventBus,
    /// Outcomes whose write failed, by item
    unrecorded: Arc<DashMap<QueueId, Unrecorded>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        queue: DeliveryQueue,
        registry: Arc<TransportRegistry>,
        retry: RetryPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            registry,
            retry,
            events,
            unrecorded: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub const fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Claim `id` and, if the claim is won, run one full cascade
    ///
    /// Returns `Ok(None)` without sending anything when the item is not
    /// `QUEUED` (someone else claimed it, it was cancelled, or it is gone).
    ///
    /// # Errors
    /// If the claim or the outcome cannot be persisted. An outcome that
    /// fails to persist is kept and written again by
    /// [`Dispatcher::record_pending`]; the item stays `SENDING` until then.
    #[tracing::instrument(level = "debug", skip(self), fields(queue_id = %id))]
    pub async fn dispatch(&self, id: &QueueId) -> Result<Option<DispatchOutcome>, QueueError> {
        if !self.queue.claim(id).await? {
            debug!(queue_id = %id, "Item not claimable, skipping");
            return Ok(None);
        }

        let Some(item) = self.queue.get(id).await else {
            return Ok(None);
        };

        let attempt = match self.cascade(&item).await {
            Ok((provider, receipt)) => Attempt::Sent { provider, receipt },
            Err(failure) => Attempt::Failed(failure),
        };
        let at = self.queue.clock().now();

        self.record(id, attempt, at).await.map(Some)
    }

    /// Write again every outcome whose first write failed
    ///
    /// Returns how many are now persisted. Outcomes that still cannot be
    /// written are kept for the next call.
    pub async fn record_pending(&self) -> usize {
        let ids: Vec<QueueId> = self.unrecorded.iter().map(|entry| *entry.key()).collect();
        let mut recorded = 0;

        for id in ids {
            let Some((_, pending)) = self.unrecorded.remove(&id) else {
                continue;
            };
            if self.record(&id, pending.attempt, pending.at).await.is_ok() {
                recorded += 1;
            }
        }

        recorded
    }

    /// Outcomes waiting to be persisted
    #[must_use]
    pub fn pending_outcomes(&self) -> usize {
        self.unrecorded.len()
    }

    /// Try active transports in priority order until one accepts the message
    ///
    /// Returns the accepting transport's name and receipt, or the failure
    /// of every transport in the order they were tried.
    async fn cascade(&self, item: &QueueItem) -> Result<(String, TransportReceipt), CascadeFailure> {
        let transports = self.registry.active();

        if transports.is_empty() {
            warn!(queue_id = %item.id(), "No active transports");
            return Err(CascadeFailure {
                reason: "no active transports".to_string(),
                detail: "no active transports".to_string(),
            });
        }

        let mut failures = Vec::with_capacity(transports.len());

        for entry in transports {
            let result = tokio::time::timeout(entry.timeout(), entry.transport().send(item))
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout(entry.timeout())));

            match result {
                Ok(receipt) => {
                    return Ok((entry.name().to_string(), receipt));
                }
                Err(e) => {
                    warn!(
                        queue_id = %item.id(),
                        transport = %entry.name(),
                        permanent = e.is_permanent(),
                        error = %e,
                        "Transport failed, trying next"
                    );
                    failures.push(format!("{}: {e}", entry.name()));
                }
            }
        }

        let last = failures.last().cloned().unwrap_or_default();
        Err(CascadeFailure {
            reason: format!("All transports failed; last: {last}"),
            detail: format!("All transports failed ({})", failures.join("; ")),
        })
    }

    /// Persist one outcome, keeping it for [`Dispatcher::record_pending`]
    /// if the store refuses the write
    async fn record(
        &self,
        id: &QueueId,
        attempt: Attempt,
        at: DateTime<Utc>,
    ) -> Result<DispatchOutcome, QueueError> {
        let result = match attempt.clone() {
            Attempt::Sent { provider, receipt } => {
                self.record_success(id, provider, receipt, at).await
            }
            Attempt::Failed(failure) => self.record_failure(id, failure, at).await,
        };

        if let Err(QueueError::Storage(e)) = &result {
            error!(
                queue_id = %id,
                error = %e,
                "Failed to persist delivery outcome, will retry on the next tick"
            );
            self.unrecorded.insert(*id, Unrecorded { attempt, at });
        }

        result
    }

    async fn record_success(
        &self,
        id: &QueueId,
        provider: String,
        receipt: TransportReceipt,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, QueueError> {
        let tracking_id = receipt.tracking_id;

        let attempt = self
            .queue
            .update(id, |item| {
                item.mark_sent(&provider, tracking_id.clone(), now)
                    .map(|()| item.attempts())
            })
            .await?;

        info!(
            queue_id = %id,
            transport = %provider,
            tracking_id = ?tracking_id,
            attempt,
            "Message sent"
        );

        self.events.publish(DeliveryEvent::Sent {
            queue_id: *id,
            provider: provider.clone(),
            tracking_id: tracking_id.clone(),
            attempt,
        });

        Ok(DispatchOutcome::Sent {
            provider,
            tracking_id,
        })
    }

    async fn record_failure(
        &self,
        id: &QueueId,
        failure: CascadeFailure,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, QueueError> {
        let retry = &self.retry;
        let CascadeFailure { reason, detail } = failure;

        let failed = self
            .queue
            .update(id, |item| {
                item.record_failed_cascade(reason.clone(), now, |attempts| {
                    retry.next_retry(attempts, now)
                })
            })
            .await?;

        let outcome = match failed {
            FailedAttempt::Retry {
                attempt,
                next_retry_at,
            } => {
                info!(
                    queue_id = %id,
                    attempt,
                    next_retry_at = %next_retry_at,
                    reason = %detail,
                    "Delivery attempt failed, retry scheduled"
                );
                self.events.publish(DeliveryEvent::RetryScheduled {
                    queue_id: *id,
                    attempt,
                    next_retry_at,
                    reason: detail,
                });
                DispatchOutcome::RetryScheduled {
                    attempt,
                    next_retry_at,
                }
            }
            FailedAttempt::Exhausted { attempts } => {
                error!(
                    queue_id = %id,
                    attempts,
                    reason = %detail,
                    "Delivery failed permanently, retry budget exhausted"
                );
                self.events.publish(DeliveryEvent::Failed {
                    queue_id: *id,
                    attempts,
                    reason: detail,
                });
                DispatchOutcome::Failed { attempts, reason }
            }
        };

        Ok(outcome)
    }
}

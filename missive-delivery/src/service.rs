//! The delivery service and the read paths observers use
//!
//! [`DeliveryService`] is built once at startup from its collaborators
//! (queue, transports, retry policy, audit settings) and shared by
//! reference. Observers that only read go through [`DeliveryQueryService`]
//! so they never depend on the concrete service.

use std::sync::Arc;

use async_trait::async_trait;
use missive_common::{
    DeliveryEvent, Message, Priority, QueueId, QueueItem, QueueStatus, audit::AuditConfig,
    tracing::info,
};
use tokio::sync::broadcast;

use crate::{
    error::QueueError,
    events::EventBus,
    policy::RetryPolicy,
    processor::{DispatchOutcome, Dispatcher, Scheduler, SchedulerConfig},
    queue::DeliveryQueue,
    stats::DeliveryStats,
    transport::TransportRegistry,
    webhook::WebhookIngest,
};

/// Result of [`DeliveryService::send_immediate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateOutcome {
    pub queue_id: QueueId,
    /// True only if the inline attempt delivered the message
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct DeliveryService {
    queue: DeliveryQueue,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
    events: EventBus,
}

impl DeliveryService {
    #[must_use]
    pub fn new(
        queue: DeliveryQueue,
        registry: Arc<TransportRegistry>,
        retry: RetryPolicy,
        audit: AuditConfig,
    ) -> Self {
        let events = EventBus::new(audit);
        let dispatcher = Arc::new(Dispatcher::new(
            queue.clone(),
            registry,
            retry.clone(),
            events.clone(),
        ));

        Self {
            queue,
            dispatcher,
            retry,
            events,
        }
    }

    #[must_use]
    pub const fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TransportRegistry> {
        self.dispatcher.registry()
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn scheduler(&self, config: SchedulerConfig) -> Scheduler {
        Scheduler::new(config, Arc::clone(&self.dispatcher))
    }

    #[must_use]
    pub fn webhook_ingest(&self) -> WebhookIngest {
        WebhookIngest::new(
            self.queue.clone(),
            Arc::clone(self.dispatcher.registry()),
            self.events.clone(),
        )
    }

    /// Observe every state change from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    /// Durably queue a message for the scheduler
    ///
    /// # Errors
    /// If the message cannot be persisted; it is then not queued at all.
    pub async fn enqueue(&self, message: Message) -> Result<QueueId, QueueError> {
        let max_retries = self.retry.max_retries(message.priority());
        let item = self.queue.enqueue(Arc::new(message), max_retries).await?;

        info!(
            queue_id = %item.id(),
            message_id = %item.message_id(),
            priority = %item.message().priority(),
            "Message queued"
        );

        self.events.publish(DeliveryEvent::Enqueued {
            queue_id: item.id(),
            message_id: item.message_id(),
            priority: item.message().priority(),
            recipients: item.message().recipients().all().map(str::to_string).collect(),
            scheduled_for: item.message().scheduled_for(),
        });

        Ok(item.id())
    }

    /// Queue a message and, if it is `URGENT` and due, dispatch it right away
    ///
    /// A failed inline attempt counts like any scheduled one; the item then
    /// waits for its retry like everything else.
    ///
    /// # Errors
    /// If the message cannot be persisted. Persistence failures after the
    /// item was queued are logged and reported as `success: false`.
    pub async fn send_immediate(&self, message: Message) -> Result<ImmediateOutcome, QueueError> {
        let inline = message.priority() == Priority::Urgent
            && message
                .scheduled_for()
                .is_none_or(|at| at <= self.queue.clock().now());

        let queue_id = self.enqueue(message).await?;

        if !inline {
            return Ok(ImmediateOutcome {
                queue_id,
                success: false,
            });
        }

        let success = matches!(
            self.dispatcher.dispatch(&queue_id).await,
            Ok(Some(DispatchOutcome::Sent { .. }))
        );

        Ok(ImmediateOutcome { queue_id, success })
    }

    /// Cancel a message that has not been claimed yet
    ///
    /// # Errors
    /// If persisting the cancellation fails.
    pub async fn cancel(&self, id: &QueueId) -> Result<bool, QueueError> {
        let cancelled = self.queue.cancel(id).await?;
        if cancelled {
            info!(queue_id = %id, "Message cancelled");
            self.events.publish(DeliveryEvent::Cancelled { queue_id: *id });
        }
        Ok(cancelled)
    }

    /// Give a `FAILED` message a fresh retry budget
    ///
    /// # Errors
    /// If persisting the reset fails.
    pub async fn manual_retry(&self, id: &QueueId) -> Result<bool, QueueError> {
        let reset = self.queue.manual_retry(id).await?;
        if reset {
            info!(queue_id = %id, "Manual retry requested");
            self.events
                .publish(DeliveryEvent::RetryRequested { queue_id: *id });
        }
        Ok(reset)
    }
}

/// Read-only view of delivery state for observers
///
/// # Example
///
/// ```rust,ignore
/// async fn report(service: &dyn DeliveryQueryService) -> f64 {
///     service.delivery_stats().await.success_rate
/// }
/// ```
#[async_trait]
pub trait DeliveryQueryService: Send + Sync {
    /// Number of items in the queue, terminal ones included
    fn queue_len(&self) -> usize;

    async fn get_item(&self, id: &QueueId) -> Option<QueueItem>;

    /// All items, oldest first, optionally only those in `status`
    async fn list_items(&self, status: Option<QueueStatus>) -> Vec<QueueItem>;

    async fn delivery_stats(&self) -> DeliveryStats;

    /// Every item with its full history, oldest first
    async fn auditable_items(&self) -> Vec<QueueItem>;
}

#[async_trait]
impl DeliveryQueryService for DeliveryService {
    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    async fn get_item(&self, id: &QueueId) -> Option<QueueItem> {
        self.queue.get(id).await
    }

    async fn list_items(&self, status: Option<QueueStatus>) -> Vec<QueueItem> {
        let mut items = self.queue.snapshot().await;
        if let Some(status) = status {
            items.retain(|item| item.status() == status);
        }
        items
    }

    async fn delivery_stats(&self) -> DeliveryStats {
        DeliveryStats::compute(&self.queue.snapshot().await, self.queue.clock().now())
    }

    async fn auditable_items(&self) -> Vec<QueueItem> {
        self.queue.snapshot().await
    }
}

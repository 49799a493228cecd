//! Webhook ingest
//!
//! Providers report what happened to a message after they accepted it. Each
//! callback is authenticated against the transport's shared secret before
//! anything is read from it, then appended to the matching item's event log.
//! Failure events downgrade a `SENT` item to `FAILED`.

pub mod payload;
pub mod signature;

use std::sync::Arc;

use missive_common::{
    DeliveryEvent, QueueStatus, WebhookEventRecord,
    tracing::{debug, info, warn},
};
use serde::{Deserialize, Serialize};

pub use payload::{EventKind, ParsedEvent, WebhookPayload};

use crate::{
    error::{QueueError, WebhookError},
    events::EventBus,
    queue::DeliveryQueue,
    transport::TransportRegistry,
};

/// What happened to one webhook request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSummary {
    /// Events in the request
    pub received: usize,
    /// Events matched to a queue item and recorded, now or by an earlier
    /// delivery of the same callback
    pub applied: usize,
    /// Events whose tracking id matched no item sent through this transport
    pub unknown: usize,
}

#[derive(Debug, Clone)]
pub struct WebhookIngest {
    queue: DeliveryQueue,
    registry: Arc<TransportRegistry>,
    events: EventBus,
}

impl WebhookIngest {
    #[must_use]
    pub const fn new(
        queue: DeliveryQueue,
        registry: Arc<TransportRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            registry,
            events,
        }
    }

    /// Authenticate and apply one callback request from `transport`
    ///
    /// Nothing is mutated unless the signature is valid and the whole body
    /// parses. Unknown tracking ids are counted, not treated as errors.
    ///
    /// Events are applied one at a time, so a storage failure can leave the
    /// earlier events of a batch recorded. The provider's redelivery of the
    /// batch does not record those twice.
    ///
    /// # Errors
    /// `UnknownTransport`, `MissingSignature`, `InvalidSignature`,
    /// `MalformedPayload`, or `Queue` if recording an event fails to persist.
    #[tracing::instrument(level = "debug", skip(self, signature, body))]
    pub async fn ingest(
        &self,
        transport: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookSummary, WebhookError> {
        let entry = self
            .registry
            .get(transport)
            .ok_or_else(|| WebhookError::UnknownTransport(transport.to_string()))?;

        let Some(secret) = entry.webhook_secret() else {
            warn!(transport, "Webhook received for a transport without a webhook secret");
            return Err(WebhookError::InvalidSignature);
        };
        let signature = signature.ok_or(WebhookError::MissingSignature)?;

        signature::verify(secret.as_bytes(), body, signature).inspect_err(|_| {
            warn!(transport, "Rejected webhook with invalid signature");
        })?;

        let events = payload::parse(body)?;
        let mut summary = WebhookSummary {
            received: events.len(),
            ..WebhookSummary::default()
        };

        for event in events {
            if self.apply(transport, event).await? {
                summary.applied += 1;
            } else {
                summary.unknown += 1;
            }
        }

        debug!(
            transport,
            received = summary.received,
            applied = summary.applied,
            unknown = summary.unknown,
            "Webhook processed"
        );

        Ok(summary)
    }

    /// Record one event from `transport`
    ///
    /// Returns false if the tracking id does not name an item that
    /// `transport` currently holds: unknown ids, ids replaced by a later
    /// send, and items delivered through another provider.
    async fn apply(&self, transport: &str, event: ParsedEvent) -> Result<bool, QueueError> {
        let ParsedEvent { payload, raw } = event;

        let Some(queue_id) = self.queue.find_by_tracking_id(&payload.tracking_id) else {
            info!(
                tracking_id = %payload.tracking_id,
                event = %payload.event,
                "Webhook for unknown tracking id, ignoring"
            );
            return Ok(false);
        };

        let record = WebhookEventRecord {
            event: payload.event.clone(),
            timestamp: payload
                .timestamp
                .unwrap_or_else(|| self.queue.clock().now()),
            raw_payload: raw,
        };
        let failure_reason = (EventKind::classify(&payload.event) == EventKind::DeliveryFailed)
            .then(|| failure_reason(&payload));

        let result = self
            .queue
            .update(&queue_id, |item| {
                if item.tracking_id() != Some(payload.tracking_id.as_str())
                    || item.provider_used() != Some(transport)
                {
                    return Ok(Applied::NotHeld);
                }

                // Redelivery of a callback that was already recorded
                if item
                    .webhook_events()
                    .iter()
                    .any(|seen| seen.raw_payload == record.raw_payload)
                {
                    return Ok(Applied::Duplicate);
                }

                item.record_webhook(record);

                match failure_reason {
                    Some(reason) if item.status() == QueueStatus::Sent => item
                        .correct_to_failed(reason.clone())
                        .map(|()| Applied::Recorded(Some(reason))),
                    _ => Ok(Applied::Recorded(None)),
                }
            })
            .await;

        let corrected = match result {
            Ok(Applied::Recorded(corrected)) => corrected,
            Ok(Applied::Duplicate) => {
                debug!(
                    queue_id = %queue_id,
                    tracking_id = %payload.tracking_id,
                    event = %payload.event,
                    "Webhook event already recorded, skipping"
                );
                return Ok(true);
            }
            Ok(Applied::NotHeld) => {
                info!(
                    queue_id = %queue_id,
                    tracking_id = %payload.tracking_id,
                    transport,
                    event = %payload.event,
                    "Webhook for a tracking id the item no longer holds, ignoring"
                );
                return Ok(false);
            }
            // Purged between lookup and update
            Err(QueueError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        self.events.publish(DeliveryEvent::WebhookRecorded {
            queue_id,
            tracking_id: payload.tracking_id.clone(),
            event: payload.event.clone(),
        });

        if let Some(reason) = corrected {
            warn!(
                queue_id = %queue_id,
                tracking_id = %payload.tracking_id,
                reason = %reason,
                "Provider reported delivery failure after send, marking as failed"
            );
            self.events.publish(DeliveryEvent::Corrected {
                queue_id,
                from: QueueStatus::Sent,
                to: QueueStatus::Failed,
                reason,
            });
        }

        Ok(true)
    }
}

/// What recording one event did to its item
enum Applied {
    /// Appended, with the failure reason if the item was downgraded
    Recorded(Option<String>),
    Duplicate,
    /// The item's current send is not the one the event is about
    NotHeld,
}

fn failure_reason(payload: &WebhookPayload) -> String {
    payload.reason.as_deref().map_or_else(
        || format!("Provider reported {}", payload.event),
        |reason| format!("Provider reported {}: {reason}", payload.event),
    )
}

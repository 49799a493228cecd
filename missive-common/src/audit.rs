//! Audit logging for delivery lifecycle events
//!
//! Every [`DeliveryEvent`] can be written as one structured `tracing` event
//! under the `missive::audit` target, so compliance tooling can filter for it.
//!
//! ## PII Redaction
//!
//! Recipient addresses can be redacted based on the [`AuditConfig`]; the
//! domain is kept so deliverability problems stay diagnosable.

use serde::{Deserialize, Serialize};

use crate::DeliveryEvent;

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for delivery lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact recipient email addresses from audit logs
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        // Keep domain but redact local part
        email
            .split_once('@')
            .map_or_else(|| "[REDACTED]".to_string(), |(_, domain)| {
                format!("[REDACTED]@{domain}")
            })
    } else {
        email.to_string()
    }
}

#[must_use]
pub fn redact_emails(emails: &[String], redact: bool) -> Vec<String> {
    emails.iter().map(|e| redact_email(e, redact)).collect()
}

/// Write `event` to the audit log
pub fn record(config: &AuditConfig, event: &DeliveryEvent) {
    if !config.enabled {
        return;
    }

    match event {
        DeliveryEvent::Enqueued {
            queue_id,
            message_id,
            priority,
            recipients,
            scheduled_for,
        } => {
            let recipients = redact_emails(recipients, config.redact_recipients);
            tracing::info!(
                target: "missive::audit",
                event = "Enqueued",
                queue_id = %queue_id,
                message_id = %message_id,
                priority = %priority,
                recipients = ?recipients,
                recipient_count = recipients.len(),
                scheduled_for = ?scheduled_for,
                "Audit: Message enqueued"
            );
        }
        DeliveryEvent::Sent {
            queue_id,
            provider,
            tracking_id,
            attempt,
        } => {
            tracing::info!(
                target: "missive::audit",
                event = "Sent",
                queue_id = %queue_id,
                provider = %provider,
                tracking_id = ?tracking_id,
                delivery_attempt = attempt,
                "Audit: Message delivered to provider"
            );
        }
        DeliveryEvent::RetryScheduled {
            queue_id,
            attempt,
            next_retry_at,
            reason,
        } => {
            tracing::info!(
                target: "missive::audit",
                event = "RetryScheduled",
                queue_id = %queue_id,
                delivery_attempt = attempt,
                next_retry_at = %next_retry_at,
                reason = %reason,
                "Audit: Delivery attempt failed, retry scheduled"
            );
        }
        DeliveryEvent::Failed {
            queue_id,
            attempts,
            reason,
        } => {
            tracing::warn!(
                target: "missive::audit",
                event = "Failed",
                queue_id = %queue_id,
                total_attempts = attempts,
                reason = %reason,
                "Audit: Delivery failed permanently"
            );
        }
        DeliveryEvent::Cancelled { queue_id } => {
            tracing::info!(
                target: "missive::audit",
                event = "Cancelled",
                queue_id = %queue_id,
                "Audit: Delivery cancelled"
            );
        }
        DeliveryEvent::RetryRequested { queue_id } => {
            tracing::info!(
                target: "missive::audit",
                event = "RetryRequested",
                queue_id = %queue_id,
                "Audit: Manual retry requested"
            );
        }
        DeliveryEvent::WebhookRecorded {
            queue_id,
            tracking_id,
            event: kind,
        } => {
            tracing::info!(
                target: "missive::audit",
                event = "WebhookRecorded",
                queue_id = %queue_id,
                tracking_id = %tracking_id,
                webhook_event = %kind,
                "Audit: Provider callback recorded"
            );
        }
        DeliveryEvent::Corrected {
            queue_id,
            from,
            to,
            reason,
        } => {
            tracing::warn!(
                target: "missive::audit",
                event = "Corrected",
                queue_id = %queue_id,
                from = %from,
                to = %to,
                reason = %reason,
                "Audit: Delivery outcome corrected by provider"
            );
        }
    }
}

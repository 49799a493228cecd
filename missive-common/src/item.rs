//! The mutable delivery record and its state machine
//!
//! A [`QueueItem`] is owned by the queue store. Every state change goes
//! through one of the transition methods below, which refuse anything the
//! lifecycle does not allow and return a [`TransitionError`] instead.

use core::fmt::{self, Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Message, MessageId, QueueStatus, error::TransitionError};

/// Identifier for a queue item
///
/// A ULID, so ids sort by creation time and double as file names for the
/// durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId {
    id: ulid::Ulid,
}

impl QueueId {
    /// Parse an id from a file name like `01ARZ3NDEKTSV4RRFFQ69G5FAV.bin`
    ///
    /// Rejects path separators, traversal patterns and anything that is not a ULID.
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".bin")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: ulid::Ulid::new(),
        }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }
}

impl Display for QueueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::str::FromStr for QueueId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self::new)
    }
}

impl Serialize for QueueId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for QueueId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// One provider callback, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub raw_payload: String,
}

/// Result of recording a fully failed cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedAttempt {
    /// Back in the queue, eligible again at `next_retry_at`
    Retry {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Retry budget spent, the item is now `FAILED`
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    id: QueueId,
    message_id: MessageId,
    message: Arc<Message>,
    status: QueueStatus,
    attempts: u32,
    max_retries: u32,
    next_retry_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    provider_used: Option<String>,
    tracking_id: Option<String>,
    webhook_events: Vec<WebhookEventRecord>,
}

impl QueueItem {
    /// A fresh `QUEUED` item. `max_retries` is fixed here for the item's lifetime.
    #[must_use]
    pub fn new(id: QueueId, message: Arc<Message>, max_retries: u32) -> Self {
        Self {
            id,
            message_id: message.id(),
            message,
            status: QueueStatus::Queued,
            attempts: 0,
            max_retries,
            next_retry_at: None,
            last_attempt_at: None,
            delivered_at: None,
            failure_reason: None,
            provider_used: None,
            tracking_id: None,
            webhook_events: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> QueueId {
        self.id
    }

    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub fn shared_message(&self) -> Arc<Message> {
        Arc::clone(&self.message)
    }

    #[must_use]
    pub const fn status(&self) -> QueueStatus {
        self.status
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub const fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    #[must_use]
    pub const fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    #[must_use]
    pub const fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    #[must_use]
    pub fn provider_used(&self) -> Option<&str> {
        self.provider_used.as_deref()
    }

    #[must_use]
    pub fn tracking_id(&self) -> Option<&str> {
        self.tracking_id.as_deref()
    }

    #[must_use]
    pub fn webhook_events(&self) -> &[WebhookEventRecord] {
        &self.webhook_events
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.message.created_at()
    }

    /// Whether the scheduler may pick this item up at `now`
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Queued
            && self.message.scheduled_for().is_none_or(|at| at <= now)
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// When the item last changed state, used for retention.
    #[must_use]
    pub fn terminal_since(&self) -> DateTime<Utc> {
        self.delivered_at
            .or(self.last_attempt_at)
            .unwrap_or_else(|| self.created_at())
    }

    /// `QUEUED` -> `SENDING`
    ///
    /// # Errors
    ///
    /// Fails if the item is not `QUEUED`.
    pub fn claim(&mut self) -> Result<(), TransitionError> {
        self.expect_status(QueueStatus::Queued, "claim")?;
        self.status = QueueStatus::Sending;
        self.next_retry_at = None;
        Ok(())
    }

    /// `SENDING` -> `SENT`. A successful cascade still counts as an attempt.
    ///
    /// # Errors
    ///
    /// Fails if the item is not `SENDING`.
    pub fn mark_sent(
        &mut self,
        provider: &str,
        tracking_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.expect_status(QueueStatus::Sending, "mark as sent")?;
        self.status = QueueStatus::Sent;
        self.attempts = self.attempts.saturating_add(1).min(self.max_retries);
        self.last_attempt_at = Some(now);
        self.delivered_at = Some(now);
        self.provider_used = Some(provider.to_string());
        self.tracking_id = tracking_id;
        self.next_retry_at = None;
        self.failure_reason = None;
        Ok(())
    }

    /// Record a cascade in which every transport failed
    ///
    /// Counts one attempt. With budget left the item returns to `QUEUED` and
    /// `next_retry` decides when it becomes eligible again, otherwise it is
    /// `FAILED` with `reason`.
    ///
    /// # Errors
    ///
    /// Fails if the item is not `SENDING`.
    pub fn record_failed_cascade(
        &mut self,
        reason: String,
        now: DateTime<Utc>,
        next_retry: impl FnOnce(u32) -> DateTime<Utc>,
    ) -> Result<FailedAttempt, TransitionError> {
        self.expect_status(QueueStatus::Sending, "record a failed attempt for")?;
        self.attempts = self.attempts.saturating_add(1).min(self.max_retries);
        self.last_attempt_at = Some(now);

        if self.attempts < self.max_retries {
            let next_retry_at = next_retry(self.attempts);
            self.status = QueueStatus::Queued;
            self.next_retry_at = Some(next_retry_at);
            Ok(FailedAttempt::Retry {
                attempt: self.attempts,
                next_retry_at,
            })
        } else {
            self.status = QueueStatus::Failed;
            self.next_retry_at = None;
            self.failure_reason = Some(reason);
            Ok(FailedAttempt::Exhausted {
                attempts: self.attempts,
            })
        }
    }

    /// `SENDING` -> `QUEUED` without counting an attempt. Used after a crash.
    ///
    /// # Errors
    ///
    /// Fails if the item is not `SENDING`.
    pub fn requeue_interrupted(&mut self) -> Result<(), TransitionError> {
        self.expect_status(QueueStatus::Sending, "requeue")?;
        self.status = QueueStatus::Queued;
        Ok(())
    }

    /// `QUEUED` -> `CANCELLED`
    ///
    /// # Errors
    ///
    /// Fails if the item is not `QUEUED`; in-flight items cannot be cancelled.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.expect_status(QueueStatus::Queued, "cancel")?;
        self.status = QueueStatus::Cancelled;
        self.next_retry_at = None;
        Ok(())
    }

    /// `FAILED` -> `QUEUED` with a fresh retry budget
    ///
    /// # Errors
    ///
    /// Fails if the item is not `FAILED`.
    pub fn reset_for_retry(&mut self) -> Result<(), TransitionError> {
        self.expect_status(QueueStatus::Failed, "retry")?;
        self.status = QueueStatus::Queued;
        self.attempts = 0;
        self.failure_reason = None;
        self.next_retry_at = None;
        Ok(())
    }

    /// Append a provider callback. The log only ever grows.
    pub fn record_webhook(&mut self, record: WebhookEventRecord) {
        self.webhook_events.push(record);
    }

    /// `SENT` -> `FAILED` after a provider reports the message did not land
    ///
    /// # Errors
    ///
    /// Fails if the item is not `SENT`.
    pub fn correct_to_failed(&mut self, reason: String) -> Result<(), TransitionError> {
        self.expect_status(QueueStatus::Sent, "downgrade")?;
        self.status = QueueStatus::Failed;
        self.failure_reason = Some(reason);
        Ok(())
    }

    fn expect_status(
        &self,
        expected: QueueStatus,
        action: &'static str,
    ) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                action,
            })
        }
    }
}

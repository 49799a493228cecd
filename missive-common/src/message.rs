use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::MessageError, render::RenderedContent};

/// Urgency of a message. Higher priorities are dispatched first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Display for Priority {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        })
    }
}

/// Identifier of a rendered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    id: ulid::Ulid,
}

impl MessageId {
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
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// Ordered recipient lists. `to` is never empty on a built [`Message`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
}

impl Recipients {
    /// Every address in delivery order: to, cc, then bcc
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A fully rendered message
///
/// Produced once by the renderer and never modified afterwards; the queue
/// shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    recipients: Recipients,
    subject: String,
    html_content: Option<String>,
    text_content: Option<String>,
    attachments: Vec<Attachment>,
    priority: Priority,
    scheduled_for: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub const fn recipients(&self) -> &Recipients {
        &self.recipients
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn html_content(&self) -> Option<&str> {
        self.html_content.as_deref()
    }

    #[must_use]
    pub fn text_content(&self) -> Option<&str> {
        self.text_content.as_deref()
    }

    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub const fn scheduled_for(&self) -> Option<DateTime<Utc>> {
        self.scheduled_for
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Debug, Default)]
pub struct MessageBuilder {
    recipients: Recipients,
    subject: String,
    html_content: Option<String>,
    text_content: Option<String>,
    attachments: Vec<Attachment>,
    priority: Priority,
    scheduled_for: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    /// Start from the output of a template render
    #[must_use]
    pub fn from_rendered(content: RenderedContent) -> Self {
        Self {
            subject: content.subject,
            html_content: content.html,
            text_content: content.text,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.recipients.to.push(address.into());
        self
    }

    #[must_use]
    pub fn cc(mut self, address: impl Into<String>) -> Self {
        self.recipients.cc.push(address.into());
        self
    }

    #[must_use]
    pub fn bcc(mut self, address: impl Into<String>) -> Self {
        self.recipients.bcc.push(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html_content = Some(html.into());
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text_content = Some(text.into());
        self
    }

    #[must_use]
    pub fn attachment(
        mut self,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        self.attachments.push(Attachment {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        });
        self
    }

    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Finish the message, stamping it with `created_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no `to` recipient, any address is
    /// malformed, or there is neither HTML nor text content.
    pub fn build(self, created_at: DateTime<Utc>) -> Result<Message, MessageError> {
        if self.recipients.to.is_empty() {
            return Err(MessageError::NoRecipients);
        }

        if let Some(bad) = self
            .recipients
            .all()
            .find(|address| !is_plausible_address(address))
        {
            return Err(MessageError::InvalidAddress(bad.to_string()));
        }

        if self.html_content.is_none() && self.text_content.is_none() {
            return Err(MessageError::NoContent);
        }

        Ok(Message {
            id: MessageId::generate(),
            recipients: self.recipients,
            subject: self.subject,
            html_content: self.html_content,
            text_content: self.text_content,
            attachments: self.attachments,
            priority: self.priority,
            scheduled_for: self.scheduled_for,
            created_at,
        })
    }
}

fn is_plausible_address(address: &str) -> bool {
    address
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_builder_requires_to() {
        let err = Message::builder()
            .cc("copy@example.com")
            .text("hello")
            .build(Utc::now())
            .unwrap_err();
        assert_eq!(err, MessageError::NoRecipients);
    }

    #[test]
    fn test_builder_rejects_bad_address() {
        let err = Message::builder()
            .to("alice@example.com")
            .bcc("nobody")
            .text("hello")
            .build(Utc::now())
            .unwrap_err();
        assert_eq!(err, MessageError::InvalidAddress("nobody".to_string()));
    }

    #[test]
    fn test_builder_requires_content() {
        let err = Message::builder()
            .to("alice@example.com")
            .subject("empty")
            .build(Utc::now())
            .unwrap_err();
        assert_eq!(err, MessageError::NoContent);
    }

    #[test]
    fn test_recipients_order() {
        let message = Message::builder()
            .to("a@example.com")
            .to("b@example.com")
            .cc("c@example.com")
            .bcc("d@example.com")
            .html("<p>hi</p>")
            .priority(Priority::Urgent)
            .build(Utc::now())
            .unwrap();

        let all: Vec<_> = message.recipients().all().collect();
        assert_eq!(
            all,
            ["a@example.com", "b@example.com", "c@example.com", "d@example.com"]
        );
        assert_eq!(message.priority(), Priority::Urgent);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::default(), Priority::Medium);
    }
}

//! SMTP relay transport

use std::{fmt, time::Duration};

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{Attachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use missive_common::{QueueItem, tracing::debug};

use super::{SmtpTls, SmtpTransportConfig, Transport, TransportReceipt};
use crate::error::TransportError;

pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
    from: Mailbox,
    timeout: Duration,
}

impl fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("host", &self.host)
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// # Errors
    /// If the sender address is invalid, the password cannot be resolved, or
    /// TLS parameters cannot be built for the host.
    pub fn new(config: &SmtpTransportConfig, timeout: Duration) -> Result<Self, TransportError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| TransportError::Configuration(format!("Sender {}: {e}", config.from)))?;

        let builder = match config.tls {
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| TransportError::Configuration(e.to_string()))?,
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| TransportError::Configuration(e.to_string()))?,
        };

        let mut builder = builder.port(config.port).timeout(Some(timeout));

        if let Some(username) = &config.username {
            let password = config
                .password
                .as_ref()
                .map(super::Credential::resolve)
                .transpose()?
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            mailer: builder.build(),
            host: config.host.clone(),
            from,
            timeout,
        })
    }

    /// The `Message-ID` (without angle brackets) this transport stamps on an item
    fn tracking_id(&self, item: &QueueItem) -> String {
        format!("{}@{}", item.id(), self.from.email.domain())
    }

    fn build_email(&self, item: &QueueItem) -> Result<lettre::Message, TransportError> {
        let message = item.message();
        let recipients = message.recipients();

        let mut builder = lettre::Message::builder()
            .from(self.from.clone())
            .subject(message.subject())
            .message_id(Some(format!("<{}>", self.tracking_id(item))));

        for address in &recipients.to {
            builder = builder.to(parse_mailbox(address)?);
        }
        for address in &recipients.cc {
            builder = builder.cc(parse_mailbox(address)?);
        }
        for address in &recipients.bcc {
            builder = builder.bcc(parse_mailbox(address)?);
        }

        let body = match (message.text_content(), message.html_content()) {
            (Some(text), Some(html)) => {
                Body::Multi(MultiPart::alternative_plain_html(text.to_string(), html.to_string()))
            }
            (None, Some(html)) => Body::Single(SinglePart::html(html.to_string())),
            (Some(text), None) => Body::Single(SinglePart::plain(text.to_string())),
            (None, None) => Body::Single(SinglePart::plain(String::new())),
        };

        let built = if message.attachments().is_empty() {
            match body {
                Body::Single(part) => builder.singlepart(part),
                Body::Multi(part) => builder.multipart(part),
            }
        } else {
            let mut mixed = match body {
                Body::Single(part) => MultiPart::mixed().singlepart(part),
                Body::Multi(part) => MultiPart::mixed().multipart(part),
            };

            for attachment in message.attachments() {
                let content_type = ContentType::parse(&attachment.mime_type).map_err(|e| {
                    TransportError::MessageBuild(format!(
                        "Attachment {} has content type {}: {e}",
                        attachment.name, attachment.mime_type
                    ))
                })?;
                mixed = mixed.singlepart(
                    Attachment::new(attachment.name.clone())
                        .body(attachment.data.clone(), content_type),
                );
            }

            builder.multipart(mixed)
        };

        built.map_err(|e| TransportError::MessageBuild(e.to_string()))
    }

    fn map_smtp_error(&self, e: &lettre::transport::smtp::Error) -> TransportError {
        let code = e.status().map(|code| code.to_string());

        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_permanent() {
            if matches!(code.as_deref(), Some("530" | "534" | "535")) {
                TransportError::Authentication(e.to_string())
            } else {
                TransportError::RejectedRecipient(e.to_string())
            }
        } else if e.is_transient() {
            TransportError::Provider {
                status: code.and_then(|code| code.parse().ok()),
                message: e.to_string(),
            }
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

enum Body {
    Single(SinglePart),
    Multi(MultiPart),
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse()
        .map_err(|e| TransportError::RejectedRecipient(format!("{address}: {e}")))
}

#[async_trait]
impl Transport for SmtpTransport {
    #[tracing::instrument(level = "debug", skip_all, fields(queue_id = %item.id(), host = %self.host))]
    async fn send(&self, item: &QueueItem) -> Result<TransportReceipt, TransportError> {
        let email = self.build_email(item)?;
        let tracking_id = self.tracking_id(item);

        let response = self
            .mailer
            .send(email)
            .await
            .map_err(|e| self.map_smtp_error(&e))?;

        debug!(code = %response.code(), tracking_id = %tracking_id, "Relay accepted message");

        Ok(TransportReceipt {
            tracking_id: Some(tracking_id),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use chrono::Utc;
    use missive_common::{Message, QueueId};

    use super::*;

    /// Building the mailer starts its connection pool, so callers need a runtime
    fn transport() -> SmtpTransport {
        SmtpTransport::new(
            &SmtpTransportConfig {
                host: "localhost".into(),
                port: 2525,
                tls: SmtpTls::None,
                username: None,
                password: None,
                from: "Orders <orders@example.com>".into(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn item(message: Message) -> QueueItem {
        QueueItem::new(QueueId::generate(), Arc::new(message), 3)
    }

    #[tokio::test]
    async fn test_builds_alternative_with_attachment() {
        let transport = transport();
        let item = item(
            Message::builder()
                .to("alice@example.com")
                .bcc("audit@example.com")
                .subject("Your order")
                .text("Thanks")
                .html("<p>Thanks</p>")
                .attachment("invoice.pdf", "application/pdf", vec![1, 2, 3])
                .build(Utc::now())
                .unwrap(),
        );

        let email = transport.build_email(&item).unwrap();
        let formatted = String::from_utf8(email.formatted()).unwrap();

        assert!(formatted.contains("Subject: Your order"));
        assert!(formatted.contains(&format!("Message-ID: <{}@example.com>", item.id())));
        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("invoice.pdf"));
    }

    #[tokio::test]
    async fn test_tracking_id_uses_sender_domain() {
        let transport = transport();
        let item = item(
            Message::builder()
                .to("alice@example.com")
                .text("hi")
                .build(Utc::now())
                .unwrap(),
        );

        assert_eq!(transport.tracking_id(&item), format!("{}@example.com", item.id()));
    }

    #[tokio::test]
    async fn test_invalid_sender_is_configuration_error() {
        let result = SmtpTransport::new(
            &SmtpTransportConfig {
                host: "localhost".into(),
                port: 25,
                tls: SmtpTls::None,
                username: None,
                password: None,
                from: "not an address".into(),
            },
            Duration::from_secs(5),
        );

        assert!(matches!(result, Err(TransportError::Configuration(_))));
    }
}

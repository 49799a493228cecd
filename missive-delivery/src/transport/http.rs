//! JSON mail API transport

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use missive_common::{Priority, QueueItem, tracing::debug};
use reqwest::{StatusCode, header::HeaderMap};
use serde::Serialize;

use super::{HttpTransportConfig, Transport, TransportReceipt};
use crate::error::TransportError;

const MESSAGE_ID_HEADER: &str = "x-message-id";

/// Longest provider response body carried into an error
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct OutboundAttachment<'a> {
    filename: &'a str,
    content_type: &'a str,
    /// Base64, standard alphabet
    content: String,
}

#[derive(Debug, Serialize)]
struct OutboundEmail<'a> {
    from: &'a str,
    to: &'a [String],
    cc: &'a [String],
    bcc: &'a [String],
    subject: &'a str,
    html: Option<&'a str>,
    text: Option<&'a str>,
    attachments: Vec<OutboundAttachment<'a>>,
    priority: Priority,
    /// Lets the provider deduplicate a redelivered item
    idempotency_key: String,
}

impl<'a> OutboundEmail<'a> {
    fn new(from: &'a str, item: &'a QueueItem) -> Self {
        let message = item.message();
        let recipients = message.recipients();

        Self {
            from,
            to: &recipients.to,
            cc: &recipients.cc,
            bcc: &recipients.bcc,
            subject: message.subject(),
            html: message.html_content(),
            text: message.text_content(),
            attachments: message
                .attachments()
                .iter()
                .map(|attachment| OutboundAttachment {
                    filename: &attachment.name,
                    content_type: &attachment.mime_type,
                    content: STANDARD.encode(&attachment.data),
                })
                .collect(),
            priority: message.priority(),
            idempotency_key: item.id().to_string(),
        }
    }
}

#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    from: String,
    timeout: Duration,
}

impl HttpTransport {
    /// # Errors
    /// If the API key cannot be resolved or the HTTP client cannot be built.
    pub fn new(config: &HttpTransportConfig, timeout: Duration) -> Result<Self, TransportError> {
        let api_key = config
            .api_key
            .as_ref()
            .map(super::Credential::resolve)
            .transpose()?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            from: config.from.clone(),
            timeout,
        })
    }

    fn map_request_error(&self, e: &reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::Connection(e.to_string())
        } else {
            TransportError::Provider {
                status: None,
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(level = "debug", skip_all, fields(queue_id = %item.id(), endpoint = %self.endpoint))]
    async fn send(&self, item: &QueueItem) -> Result<TransportReceipt, TransportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&OutboundEmail::new(&self.from, item));

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_request_error(&e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let tracking_id = tracking_id_from(&headers, &body);
        debug!(tracking_id = ?tracking_id, "Provider accepted message");

        Ok(TransportReceipt { tracking_id })
    }
}

fn classify_status(status: StatusCode, body: &str) -> TransportError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    } else {
        truncate(body.trim(), MAX_ERROR_BODY)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TransportError::Authentication(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            TransportError::RejectedRecipient(message)
        }
        _ => TransportError::Provider {
            status: Some(status.as_u16()),
            message,
        },
    }
}

/// Cut `text` to at most `max` bytes on a char boundary, marking the cut
fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }

    let end = (0..=max)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or_default();
    format!("{}...", &text[..end])
}

/// The provider's id for the accepted message: header first, then the body's `id` or `message_id`
fn tracking_id_from(headers: &HeaderMap, body: &str) -> Option<String> {
    if let Some(id) = headers
        .get(MESSAGE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.is_empty())
    {
        return Some(id.to_string());
    }

    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    ["id", "message_id"]
        .iter()
        .find_map(|key| json.get(key).and_then(serde_json::Value::as_str))
        .map(str::to_string)
}

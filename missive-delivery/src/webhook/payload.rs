//! Provider callback payloads

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::WebhookError;

/// One provider callback
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    pub tracking_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// A parsed callback together with its verbatim JSON
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub payload: WebhookPayload,
    pub raw: String,
}

/// Whether a callback event means the message did not land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DeliveryFailed,
    Informational,
}

impl EventKind {
    #[must_use]
    pub fn classify(event: &str) -> Self {
        match event.to_ascii_lowercase().as_str() {
            "bounce" | "bounced" | "hard_bounce" | "soft_bounce" | "dropped" | "failed"
            | "rejected" => Self::DeliveryFailed,
            _ => Self::Informational,
        }
    }
}

/// Parse a body holding one event object or an array of them
///
/// # Errors
/// `MalformedPayload` if the body is not JSON or any element lacks the
/// required fields.
pub fn parse(body: &[u8]) -> Result<Vec<ParsedEvent>, WebhookError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    let values = match value {
        serde_json::Value::Array(values) => values,
        single => vec![single],
    };

    values
        .into_iter()
        .map(|value| {
            let raw = value.to_string();
            serde_json::from_value(value)
                .map(|payload| ParsedEvent { payload, raw })
                .map_err(|e| WebhookError::MalformedPayload(e.to_string()))
        })
        .collect()
}

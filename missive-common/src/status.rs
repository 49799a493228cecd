use core::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Delivery state of a queue item
///
/// ```text
/// QUEUED --(claim)--> SENDING --(cascade success)--> SENT
/// SENDING --(cascade fail, retries left)--> QUEUED
/// SENDING --(cascade fail, no retries left)--> FAILED
/// QUEUED --(cancel)--> CANCELLED
/// SENT --(bounce webhook)--> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    Queued,
    Sending,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    /// Terminal for the scheduler. `Sent` may still be corrected by a webhook.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl Display for QueueStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "SENDING" => Ok(Self::Sending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" | "CANCELED" => Ok(Self::Cancelled),
            other => Err(format!("Unknown queue status: {other}")),
        }
    }
}

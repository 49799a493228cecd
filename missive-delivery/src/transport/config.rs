use serde::{Deserialize, Serialize};

use crate::error::TransportError;

const fn default_true() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_smtp_port() -> u16 {
    587
}

/// A secret, either written inline or read from the environment at startup
///
/// ```ron
/// api_key: Env("MISSIVE_PRIMARY_API_KEY"),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    Inline(String),
    Env(String),
}

impl Credential {
    /// # Errors
    /// If the named environment variable is unset or not unicode.
    pub fn resolve(&self) -> Result<String, TransportError> {
        match self {
            Self::Inline(value) => Ok(value.clone()),
            Self::Env(var) => std::env::var(var).map_err(|e| {
                TransportError::Configuration(format!("Credential variable {var}: {e}"))
            }),
        }
    }
}

/// One configured transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Unique name, also used in the webhook route
    pub name: String,

    /// Higher is tried first
    #[serde(default)]
    pub priority: i32,

    /// Inactive transports are skipped by the cascade
    #[serde(default = "default_true")]
    pub active: bool,

    /// Upper bound on a single send through this transport (in seconds)
    ///
    /// Default: 30 seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Shared secret for verifying this provider's webhook signatures
    #[serde(default)]
    pub webhook_secret: Option<Credential>,

    pub kind: TransportKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    Http(HttpTransportConfig),
    Smtp(SmtpTransportConfig),
}

/// A JSON mail API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<Credential>,

    /// Sender address
    pub from: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmtpTls {
    None,
    #[default]
    StartTls,
    Tls,
}

/// An SMTP relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTransportConfig {
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub tls: SmtpTls,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<Credential>,

    /// Sender address
    pub from: String,
}

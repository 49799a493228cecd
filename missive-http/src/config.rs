//! HTTP surface configuration

use serde::Deserialize;

/// Configuration for the webhook, health and stats endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable or disable the HTTP server
    ///
    /// When disabled, provider webhooks cannot be received.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address to bind the HTTP server
    ///
    /// Common values:
    /// - `[::]:8080` (IPv6 any address, port 8080)
    /// - `0.0.0.0:8080` (IPv4 any address, port 8080)
    /// - `127.0.0.1:8080` (localhost only, port 8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Maximum queue size threshold for readiness probe
    ///
    /// If the delivery queue exceeds this size, the readiness probe will fail.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u64,

    /// Upper bound on handling a single request (in seconds)
    ///
    /// Default: 10 seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_max_queue_size() -> u64 {
    10000
}

const fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            max_queue_size: default_max_queue_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

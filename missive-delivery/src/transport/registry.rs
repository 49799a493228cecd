//! Ordered set of configured transports

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use missive_common::{internal, tracing::info};

use super::{HttpTransport, SmtpTransport, Transport, TransportConfig, TransportKind};
use crate::error::DeliveryError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A transport plus the settings the cascade needs about it
#[derive(Debug)]
pub struct TransportEntry {
    name: String,
    priority: i32,
    active: AtomicBool,
    timeout: Duration,
    webhook_secret: Option<String>,
    transport: Arc<dyn Transport>,
}

impl TransportEntry {
    /// An active entry with the default 30 second timeout and no webhook secret
    pub fn new(name: impl Into<String>, priority: i32, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            priority,
            active: AtomicBool::new(true),
            timeout: DEFAULT_TIMEOUT,
            webhook_secret: None,
            transport,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn inactive(self) -> Self {
        self.active.store(false, Ordering::Relaxed);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

/// Transports in cascade order: descending priority, ties in registration order
///
/// The set itself is fixed once built; only each entry's active flag may
/// change at runtime.
#[derive(Debug, Default)]
pub struct TransportRegistry {
    entries: Vec<Arc<TransportEntry>>,
}

impl TransportRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured transport, resolving credentials once
    ///
    /// # Errors
    /// If a credential cannot be resolved, a transport cannot be constructed,
    /// or two transports share a name.
    pub fn from_config(configs: &[TransportConfig]) -> Result<Self, DeliveryError> {
        let mut registry = Self::new();

        for config in configs {
            let timeout = Duration::from_secs(config.timeout_secs);
            let transport: Arc<dyn Transport> = match &config.kind {
                TransportKind::Http(http) => Arc::new(HttpTransport::new(http, timeout).map_err(
                    |e| DeliveryError::Configuration(format!("Transport {}: {e}", config.name)),
                )?),
                TransportKind::Smtp(smtp) => Arc::new(SmtpTransport::new(smtp, timeout).map_err(
                    |e| DeliveryError::Configuration(format!("Transport {}: {e}", config.name)),
                )?),
            };

            let mut entry =
                TransportEntry::new(&config.name, config.priority, transport).with_timeout(timeout);

            if let Some(secret) = &config.webhook_secret {
                let secret = secret.resolve().map_err(|e| {
                    DeliveryError::Configuration(format!("Transport {}: {e}", config.name))
                })?;
                entry = entry.with_webhook_secret(secret);
            }

            if !config.active {
                entry = entry.inactive();
            }

            registry.register(entry)?;
        }

        internal!(
            level = INFO,
            "Configured {} transports ({} active)",
            registry.len(),
            registry.active().len()
        );

        Ok(registry)
    }

    /// # Errors
    /// If a transport with the same name is already registered.
    pub fn register(&mut self, entry: TransportEntry) -> Result<(), DeliveryError> {
        if self.get(entry.name()).is_some() {
            return Err(DeliveryError::Configuration(format!(
                "Duplicate transport name: {}",
                entry.name()
            )));
        }

        let at = self
            .entries
            .partition_point(|existing| existing.priority >= entry.priority);
        self.entries.insert(at, Arc::new(entry));

        Ok(())
    }

    /// Active transports in the order the cascade tries them
    #[must_use]
    pub fn active(&self) -> Vec<Arc<TransportEntry>> {
        self.entries
            .iter()
            .filter(|entry| entry.is_active())
            .cloned()
            .collect()
    }

    /// Toggle a transport. Returns false for unknown names.
    pub fn set_active(&self, name: &str, active: bool) -> bool {
        let Some(entry) = self.get(name) else {
            return false;
        };

        if entry.active.swap(active, Ordering::AcqRel) != active {
            info!(transport = %name, active, "Transport availability changed");
        }

        true
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<TransportEntry>> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    #[must_use]
    pub fn entries(&self) -> &[Arc<TransportEntry>] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use async_trait::async_trait;
    use missive_common::QueueItem;

    use super::*;
    use crate::{error::TransportError, transport::TransportReceipt};

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl Transport for Noop {
        async fn send(&self, _item: &QueueItem) -> Result<TransportReceipt, TransportError> {
            Ok(TransportReceipt::default())
        }
    }

    fn names(entries: &[Arc<TransportEntry>]) -> Vec<&str> {
        entries.iter().map(|entry| entry.name()).collect()
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut registry = TransportRegistry::new();
        registry.register(TransportEntry::new("b", 5, Arc::new(Noop))).unwrap();
        registry.register(TransportEntry::new("a", 10, Arc::new(Noop))).unwrap();
        registry.register(TransportEntry::new("c", 5, Arc::new(Noop))).unwrap();
        registry.register(TransportEntry::new("d", 1, Arc::new(Noop))).unwrap();

        assert_eq!(names(&registry.active()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_set_active() {
        let mut registry = TransportRegistry::new();
        registry.register(TransportEntry::new("a", 10, Arc::new(Noop))).unwrap();
        registry
            .register(TransportEntry::new("b", 5, Arc::new(Noop)).inactive())
            .unwrap();

        assert_eq!(names(&registry.active()), vec!["a"]);

        assert!(registry.set_active("a", false));
        assert!(registry.set_active("b", true));
        assert!(!registry.set_active("missing", true));

        assert_eq!(names(&registry.active()), vec!["b"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = TransportRegistry::new();
        registry.register(TransportEntry::new("a", 1, Arc::new(Noop))).unwrap();

        assert!(matches!(
            registry.register(TransportEntry::new("a", 2, Arc::new(Noop))),
            Err(DeliveryError::Configuration(_))
        ));
    }
}

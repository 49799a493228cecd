use std::{future::Future, sync::Arc};

use missive_common::{Signal, SystemClock, audit::AuditConfig, internal, logging};
use missive_delivery::{
    DeliveryQueue, DeliveryService, RetryPolicy, Scheduler, SchedulerConfig, TransportConfig,
    TransportRegistry,
};
use missive_http::{AppState, HealthChecker, HttpConfig, HttpServer};
use missive_spool::SpoolConfig;
use ron::extensions::Extensions;
use serde::Deserialize;
use tokio::sync::broadcast;

/// Root of the configuration file
#[derive(Debug, Default, Deserialize)]
pub struct Missive {
    #[serde(default)]
    spool: SpoolConfig,
    #[serde(default)]
    scheduler: SchedulerConfig,
    #[serde(default)]
    retry: RetryPolicy,
    #[serde(alias = "transport", default)]
    transports: Vec<TransportConfig>,
    #[serde(default)]
    http: HttpConfig,
    #[serde(default)]
    audit: AuditConfig,
}

/// The delivery pipeline, wired up but not yet running
pub struct Pipeline {
    service: DeliveryService,
    scheduler: Scheduler,
    checker: Arc<HealthChecker>,
    http: HttpConfig,
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

impl Missive {
    /// Parse a RON configuration document
    ///
    /// # Errors
    ///
    /// If the document is not valid RON or does not describe a configuration.
    pub fn from_ron(content: &str) -> Result<Self, ron::error::SpannedError> {
        ron::Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME | Extensions::UNWRAP_VARIANT_NEWTYPES)
            .from_str(content)
    }

    /// Build every configured transport without starting anything
    ///
    /// # Errors
    ///
    /// If a transport cannot be built, e.g. because a credential is missing.
    pub fn check(&self) -> anyhow::Result<usize> {
        Ok(TransportRegistry::from_config(&self.transports)?.len())
    }

    /// Open the spool, restore the queue and wire the service together
    ///
    /// # Errors
    ///
    /// If the spool cannot be opened or read, or a transport cannot be built.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn assemble(self) -> anyhow::Result<Pipeline> {
        let store = self.spool.into_backing_store()?;
        let queue = DeliveryQueue::new(store, Arc::new(SystemClock));
        queue.restore().await?;

        let registry = TransportRegistry::from_config(&self.transports)?;
        if registry.is_empty() {
            tracing::warn!("No transports configured, every delivery attempt will fail");
        }
        for entry in registry.entries() {
            internal!(
                level = INFO,
                "Transport {} (priority {}, {})",
                entry.name(),
                entry.priority(),
                if entry.is_active() { "active" } else { "inactive" }
            );
        }

        let service = DeliveryService::new(queue, Arc::new(registry), self.retry, self.audit);
        let scheduler = service.scheduler(self.scheduler);
        let checker = Arc::new(HealthChecker::new(self.http.max_queue_size));
        checker.set_queue_ready(true);

        Ok(Pipeline {
            service,
            scheduler,
            checker,
            http: self.http,
        })
    }

    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if the pipeline fails to
    /// initialise or one of its servers fails.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        internal!("Controller running");

        self.assemble().await?.serve(shutdown()).await
    }
}

impl Pipeline {
    #[must_use]
    pub const fn service(&self) -> &DeliveryService {
        &self.service
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run the scheduler and HTTP server until `stop` resolves or either fails
    ///
    /// Both are then told to shut down; the scheduler drains its in-flight
    /// batch before this returns.
    ///
    /// # Errors
    ///
    /// If the HTTP server cannot bind, or any component stops with an error.
    pub async fn serve<F>(self, stop: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let (sender, _) = broadcast::channel(64);

        let server = if self.http.enabled {
            let state = AppState::new(
                Arc::clone(&self.checker),
                Arc::new(self.service.clone()),
                self.service.webhook_ingest(),
            )
            .with_scheduler(self.scheduler.clone());
            Some(HttpServer::new(&self.http, state).await?)
        } else {
            internal!(level = INFO, "HTTP server disabled, webhooks will not be received");
            None
        };

        let mut stop_rx = sender.subscribe();
        let signal = async {
            let result = tokio::select! {
                r = stop => r,
                _ = stop_rx.recv() => Ok(()),
            };
            let _ = sender.send(Signal::Shutdown);
            result
        };

        let scheduler_rx = sender.subscribe();
        let scheduling = async {
            let result = self.scheduler.serve(scheduler_rx).await;
            if result.is_err() {
                let _ = sender.send(Signal::Shutdown);
            }
            result
        };

        let http_rx = sender.subscribe();
        let serving = async {
            let Some(server) = server else {
                return Ok(());
            };
            let result = server.serve(http_rx).await;
            if result.is_err() {
                let _ = sender.send(Signal::Shutdown);
            }
            result
        };

        let (signal, scheduling, serving) = tokio::join!(signal, scheduling, serving);

        internal!(level = INFO, "Shutting down...");

        signal?;
        scheduling?;
        serving?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use missive_delivery::DeliveryQueryService;

    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let missive = Missive::from_ron("()").unwrap();

        assert!(missive.transports.is_empty());
        assert!(missive.http.enabled);
        assert_eq!(missive.scheduler, SchedulerConfig::default());
        assert_eq!(missive.retry, RetryPolicy::default());
        assert!(matches!(missive.spool, SpoolConfig::File(_)));
    }

    #[tokio::test]
    async fn test_memory_pipeline_stops_on_request() {
        let missive = Missive::from_ron(
            "(spool: Memory(capacity: 10), http: (enabled: false), scheduler: (tick_interval_secs: 1))",
        )
        .unwrap();

        let pipeline = missive.assemble().await.unwrap();
        assert_eq!(pipeline.service().queue_len(), 0);

        let scheduler = pipeline.scheduler().clone();
        pipeline
            .serve(async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(())
            })
            .await
            .unwrap();
        assert!(!scheduler.is_running());
    }
}

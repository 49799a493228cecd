//! HTTP server for provider webhooks, probes and stats

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use missive_common::Signal;
use missive_delivery::{DeliveryQueryService, Scheduler, WebhookError, WebhookIngest};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{HealthChecker, HttpConfig, HttpError};

/// Header carrying `sha256=<hex>` over the raw request body
pub const SIGNATURE_HEADER: &str = "x-missive-signature";

/// Everything the handlers read from
#[derive(Clone)]
pub struct AppState {
    checker: Arc<HealthChecker>,
    query: Arc<dyn DeliveryQueryService>,
    webhooks: WebhookIngest,
    scheduler: Option<Scheduler>,
}

impl AppState {
    #[must_use]
    pub fn new(
        checker: Arc<HealthChecker>,
        query: Arc<dyn DeliveryQueryService>,
        webhooks: WebhookIngest,
    ) -> Self {
        Self {
            checker,
            query,
            webhooks,
            scheduler: None,
        }
    }

    /// Report readiness from this scheduler's running state
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Pull the live values the readiness probe depends on
    fn refresh(&self) {
        self.checker
            .set_queue_size(u64::try_from(self.query.queue_len()).unwrap_or(u64::MAX));
        self.checker.set_scheduler_ready(
            self.scheduler
                .as_ref()
                .is_some_and(Scheduler::is_running),
        );
    }
}

/// Build the router with every endpoint mounted
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/webhooks/{transport}", post(webhook_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
}

/// Webhook, probe and stats server
///
/// Provides `POST /webhooks/{transport}`, `/health/live`, `/health/ready`
/// and `/stats`.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    /// Bind the listener and build the router
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(config: &HttpConfig, state: AppState) -> Result<Self, HttpError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| HttpError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "HTTP server bound successfully"
        );

        let router = router(state, Duration::from_secs(config.request_timeout_secs.max(1)));

        Ok(Self { listener, router })
    }

    /// Address actually bound, useful when the configuration asked for port 0
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot report its address.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the server until shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HttpError> {
        tracing::info!("HTTP server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal");
            })
            .await
            .map_err(|e| HttpError::ServerError(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

const fn webhook_status(error: &WebhookError) -> StatusCode {
    match error {
        WebhookError::MissingSignature | WebhookError::InvalidSignature => {
            StatusCode::UNAUTHORIZED
        }
        WebhookError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        WebhookError::UnknownTransport(_) => StatusCode::NOT_FOUND,
        WebhookError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Provider delivery callbacks
///
/// The body is taken raw so the signature is checked over exactly the bytes
/// the provider signed.
async fn webhook_handler(
    State(state): State<AppState>,
    Path(transport): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.webhooks.ingest(&transport, signature, &body).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(error) => {
            let status = webhook_status(&error);
            if status.is_server_error() {
                tracing::error!(transport = %transport, %error, "Webhook could not be applied");
            } else {
                tracing::warn!(transport = %transport, %error, "Webhook rejected");
            }
            (
                status,
                Json(serde_json::json!({ "error": error.to_string() })),
            )
                .into_response()
        }
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the application is alive (can respond to requests).
async fn liveness_handler(State(state): State<AppState>) -> Response {
    if state.checker.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

/// Readiness probe handler
async fn readiness_handler(State(state): State<AppState>) -> Response {
    state.refresh();

    if state.checker.is_ready() {
        (StatusCode::OK, "OK").into_response()
    } else {
        let status = state.checker.get_status();
        tracing::warn!(
            queue_ready = status.queue_ready,
            scheduler_ready = status.scheduler_ready,
            queue_size = status.queue_size,
            max_queue_size = status.max_queue_size,
            "Readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}

async fn stats_handler(State(state): State<AppState>) -> Response {
    Json(state.query.delivery_stats().await).into_response()
}

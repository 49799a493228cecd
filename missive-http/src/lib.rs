//! HTTP surface of the missive delivery queue
//!
//! # Endpoints
//!
//! - **`POST /webhooks/{transport}`** - Signed delivery callbacks from a provider
//! - **`/health/live`** - Liveness probe: Returns 200 if the process is running
//! - **`/health/ready`** - Readiness probe: Returns 200 once the queue is
//!   restored, the scheduler is running and the queue is below its threshold
//! - **`/stats`** - Delivery statistics as JSON
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use missive_delivery::DeliveryService;
//! use missive_http::{AppState, HealthChecker, HttpConfig, HttpServer};
//!
//! # async fn example(service: DeliveryService) -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpConfig::default();
//! let checker = Arc::new(HealthChecker::new(config.max_queue_size));
//! let state = AppState::new(checker, Arc::new(service.clone()), service.webhook_ingest());
//! let server = HttpServer::new(&config, state).await?;
//!
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod checker;
mod config;
mod error;
mod server;

pub use checker::{HealthChecker, HealthStatus};
pub use config::HttpConfig;
pub use error::HttpError;
pub use server::{AppState, HttpServer, SIGNATURE_HEADER, router};

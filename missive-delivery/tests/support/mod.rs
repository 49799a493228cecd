//! Scripted transports and a wired-up service for integration tests
#![allow(dead_code)] // Test utility module - not all helpers used in every test
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use missive_common::{ManualClock, Message, Priority, QueueItem, audit::AuditConfig};
use missive_delivery::{
    DeliveryQueue, DeliveryService, RetryPolicy, Transport, TransportEntry, TransportError,
    TransportReceipt, TransportRegistry,
};
use missive_spool::TestBackingStore;

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// What a [`MockTransport`] does on one call
#[derive(Debug, Clone)]
pub enum Step {
    Accept(Option<String>),
    Fail(TransportError),
    /// Never answers; only the caller's timeout ends the call
    Hang,
}

/// Transport that replays a script, then repeats its fallback forever
#[derive(Debug, Clone)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Step>>>,
    fallback: Step,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
    /// Store whose writes start failing once the next send is accepted
    outage: Arc<Mutex<Option<TestBackingStore>>>,
}

impl MockTransport {
    fn with_fallback(fallback: Step) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
            outage: Arc::new(Mutex::new(None)),
        }
    }

    pub fn accepting(tracking_id: &str) -> Self {
        Self::with_fallback(Step::Accept(Some(tracking_id.to_string())))
    }

    pub fn failing() -> Self {
        Self::with_fallback(Step::Fail(TransportError::Provider {
            status: Some(503),
            message: "service unavailable".into(),
        }))
    }

    pub fn hanging() -> Self {
        Self::with_fallback(Step::Hang)
    }

    /// Play `step` before the fallback
    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `store` refuse writes right after the next send, before its
    /// outcome is recorded
    pub fn break_store_on_send(&self, store: &TestBackingStore) {
        *self.outage.lock().unwrap() = Some(store.clone());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, _item: &QueueItem) -> Result<TransportReceipt, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if let Some(store) = self.outage.lock().unwrap().take() {
            store.set_fail_writes(true);
        }

        match step {
            Step::Accept(tracking_id) => Ok(TransportReceipt { tracking_id }),
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }
}

pub struct Harness {
    pub service: DeliveryService,
    pub queue: DeliveryQueue,
    pub store: TestBackingStore,
    pub clock: ManualClock,
}

/// Service over a test store and a manual clock, with transports registered in order
pub fn harness(transports: Vec<(&str, i32, MockTransport)>) -> Harness {
    let mut registry = TransportRegistry::new();
    for (name, priority, transport) in transports {
        registry
            .register(
                TransportEntry::new(name, priority, Arc::new(transport))
                    .with_timeout(Duration::from_millis(200))
                    .with_webhook_secret(WEBHOOK_SECRET),
            )
            .unwrap();
    }

    harness_with_registry(registry)
}

pub fn harness_with_registry(registry: TransportRegistry) -> Harness {
    let store = TestBackingStore::new();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap());
    let queue = DeliveryQueue::new(Arc::new(store.clone()), Arc::new(clock.clone()));
    let service = DeliveryService::new(
        queue.clone(),
        Arc::new(registry),
        RetryPolicy::default(),
        AuditConfig::default(),
    );

    Harness {
        service,
        queue,
        store,
        clock,
    }
}

pub fn message(priority: Priority, clock: &ManualClock) -> Message {
    use missive_common::Clock;

    Message::builder()
        .to("buyer@example.com")
        .subject("Order confirmed")
        .html("<p>Your order is confirmed</p>")
        .text("Your order is confirmed")
        .priority(priority)
        .build(clock.now())
        .unwrap()
}

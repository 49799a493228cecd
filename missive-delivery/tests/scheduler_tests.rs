//! Scheduler ticks, the serve loop and the inline urgent path
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::time::Duration;

use missive_common::{Clock, DeliveryEvent, Priority, QueueStatus, Signal};
use missive_delivery::{DeliveryQueryService, QueueError, SchedulerConfig};
use pretty_assertions::assert_eq;
use support::{MockTransport, harness, message};

fn config(batch_size: usize, max_concurrent_deliveries: usize) -> SchedulerConfig {
    SchedulerConfig {
        tick_interval_secs: 1,
        batch_size,
        max_concurrent_deliveries,
        ..SchedulerConfig::default()
    }
}

#[tokio::test]
async fn test_tick_caps_batch_size() {
    let primary = MockTransport::accepting("p-1");
    let h = harness(vec![("primary", 10, primary.clone())]);

    for _ in 0..12 {
        h.service
            .enqueue(message(Priority::Medium, &h.clock))
            .await
            .unwrap();
    }

    let scheduler = h.service.scheduler(config(10, 3));
    assert_eq!(scheduler.tick().await, 10);
    assert_eq!(primary.calls(), 10);
    assert_eq!(h.service.list_items(Some(QueueStatus::Queued)).await.len(), 2);

    assert_eq!(scheduler.tick().await, 2);
    assert_eq!(h.service.list_items(Some(QueueStatus::Sent)).await.len(), 12);
    assert_eq!(scheduler.tick().await, 0);
}

#[tokio::test]
async fn test_tick_takes_highest_priority_first() {
    let h = harness(vec![("primary", 10, MockTransport::accepting("p-1"))]);

    let low = h
        .service
        .enqueue(message(Priority::Low, &h.clock))
        .await
        .unwrap();
    let urgent = h
        .service
        .enqueue(message(Priority::Urgent, &h.clock))
        .await
        .unwrap();

    let scheduler = h.service.scheduler(config(1, 1));
    assert_eq!(scheduler.tick().await, 1);

    assert_eq!(
        h.service.get_item(&urgent).await.unwrap().status(),
        QueueStatus::Sent
    );
    assert_eq!(
        h.service.get_item(&low).await.unwrap().status(),
        QueueStatus::Queued
    );
}

#[tokio::test]
async fn test_overlapping_ticks_do_not_double_dispatch() {
    let primary = MockTransport::accepting("p-1").with_delay(Duration::from_millis(50));
    let h = harness(vec![("primary", 10, primary.clone())]);

    for _ in 0..4 {
        h.service
            .enqueue(message(Priority::Medium, &h.clock))
            .await
            .unwrap();
    }

    let scheduler = h.service.scheduler(config(10, 2));
    let (first, second) = tokio::join!(scheduler.tick(), scheduler.tick());

    assert_eq!(first + second, 4);
    assert!(first == 0 || second == 0);
    assert_eq!(primary.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_serve_dispatches_on_tick_and_shuts_down() {
    let h = harness(vec![("primary", 10, MockTransport::accepting("p-1"))]);
    let scheduler = h.service.scheduler(config(10, 4));
    let mut events = h.service.subscribe();

    let id = h
        .service
        .enqueue(message(Priority::Medium, &h.clock))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let serving = scheduler.clone();
    let handle = tokio::spawn(async move { serving.serve(shutdown_rx).await });

    let sent = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let DeliveryEvent::Sent { queue_id, .. } = events.recv().await.unwrap() {
                break queue_id;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(sent, id);
    assert!(scheduler.is_running());

    // A second serve loop on the same scheduler is refused
    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    assert!(scheduler.serve(rx).await.is_err());

    shutdown_tx.send(Signal::Shutdown).unwrap();
    handle.await.unwrap().unwrap();
    assert!(!scheduler.is_running());
}

#[tokio::test]
async fn test_send_immediate_urgent_dispatches_inline() {
    let primary = MockTransport::accepting("p-7");
    let h = harness(vec![("primary", 10, primary.clone())]);

    let outcome = h
        .service
        .send_immediate(message(Priority::Urgent, &h.clock))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(primary.calls(), 1);
    let item = h.service.get_item(&outcome.queue_id).await.unwrap();
    assert_eq!(item.status(), QueueStatus::Sent);
    assert_eq!(item.tracking_id(), Some("p-7"));
}

#[tokio::test]
async fn test_send_immediate_other_priorities_only_enqueue() {
    let primary = MockTransport::accepting("p-1");
    let h = harness(vec![("primary", 10, primary.clone())]);

    let outcome = h
        .service
        .send_immediate(message(Priority::High, &h.clock))
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(primary.calls(), 0);
    assert_eq!(
        h.service.get_item(&outcome.queue_id).await.unwrap().status(),
        QueueStatus::Queued
    );
}

#[tokio::test]
async fn test_send_immediate_failure_falls_back_to_retry() {
    let h = harness(vec![("primary", 10, MockTransport::failing())]);

    let outcome = h
        .service
        .send_immediate(message(Priority::Urgent, &h.clock))
        .await
        .unwrap();

    assert!(!outcome.success);
    let item = h.service.get_item(&outcome.queue_id).await.unwrap();
    assert_eq!(item.status(), QueueStatus::Queued);
    assert_eq!(item.attempts(), 1);
    assert_eq!(item.max_retries(), 5);
    assert!(item.next_retry_at().is_some());
}

#[tokio::test]
async fn test_unpersisted_outcome_is_written_on_next_tick() {
    let primary = MockTransport::accepting("trk-1");
    let h = harness(vec![("primary", 10, primary.clone())]);
    let dispatcher = h.service.dispatcher();
    let id = h
        .service
        .enqueue(message(Priority::Medium, &h.clock))
        .await
        .unwrap();

    primary.break_store_on_send(&h.store);
    assert!(matches!(
        dispatcher.dispatch(&id).await,
        Err(QueueError::Storage(_))
    ));
    assert_eq!(
        h.service.get_item(&id).await.unwrap().status(),
        QueueStatus::Sending
    );
    assert_eq!(dispatcher.pending_outcomes(), 1);

    // Still failing: kept for later
    assert_eq!(dispatcher.record_pending().await, 0);
    assert_eq!(dispatcher.pending_outcomes(), 1);

    h.store.set_fail_writes(false);
    let scheduler = h.service.scheduler(config(10, 2));
    assert_eq!(scheduler.tick().await, 0);

    let item = h.service.get_item(&id).await.unwrap();
    assert_eq!(item.status(), QueueStatus::Sent);
    assert_eq!(item.tracking_id(), Some("trk-1"));
    assert_eq!(h.queue.find_by_tracking_id("trk-1"), Some(id));
    assert_eq!(dispatcher.pending_outcomes(), 0);
    assert_eq!(primary.calls(), 1);
    assert_eq!(h.store.items().await.unwrap()[0].status(), QueueStatus::Sent);
}

#[tokio::test]
async fn test_unpersisted_failure_keeps_retry_schedule() {
    let primary = MockTransport::failing();
    let h = harness(vec![("primary", 10, primary.clone())]);
    let dispatcher = h.service.dispatcher();
    let id = h
        .service
        .enqueue(message(Priority::Medium, &h.clock))
        .await
        .unwrap();
    let attempted_at = h.clock.now();

    primary.break_store_on_send(&h.store);
    assert!(dispatcher.dispatch(&id).await.is_err());
    h.store.set_fail_writes(false);
    h.clock.advance(chrono::Duration::seconds(30));

    assert_eq!(dispatcher.record_pending().await, 1);
    let item = h.service.get_item(&id).await.unwrap();
    assert_eq!(item.status(), QueueStatus::Queued);
    assert_eq!(item.attempts(), 1);
    assert_eq!(item.last_attempt_at(), Some(attempted_at));
    assert_eq!(
        item.next_retry_at(),
        Some(attempted_at + chrono::Duration::minutes(2))
    );
}

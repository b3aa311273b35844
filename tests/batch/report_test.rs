//! Batch aggregation: every recipient reaches exactly one terminal outcome.

use std::time::Duration;

use straylight::types::DriverEvent;

use crate::common::{harness, recipients, wait_until, FakeBehavior, HarnessOptions};

#[tokio::test]
async fn mixed_outcomes_account_for_every_recipient() {
    let h = harness(
        FakeBehavior {
            unregistered: vec!["20100000002".to_owned(), "20100000004".to_owned()],
            auto_events: vec![DriverEvent::Ready],
            ..FakeBehavior::default()
        },
        HarnessOptions::default(),
    );
    h.session.start_session().await;
    wait_until(Duration::from_secs(5), || {
        h.session.status().state == straylight::types::ConnectionState::Connected
    })
    .await;

    let batch = recipients(&["0100000001", "100000002", "0100000003", "100000004"]);
    let report = h
        .coordinator
        .submit_batch(&batch, Some("hi".to_owned()), Vec::new())
        .await
        .expect("batch should be accepted");

    assert_eq!(report.total(), batch.len());
    assert_eq!(
        report.delivered,
        vec!["20100000001".to_owned(), "20100000003".to_owned()]
    );
    assert_eq!(report.failed.len(), 2);
    for address in ["20100000002", "20100000004"] {
        assert_eq!(
            report.failed.get(address).map(String::as_str),
            Some("recipient not registered")
        );
    }
}

#[tokio::test]
async fn mid_batch_disconnect_resolves_queued_tasks_and_overflow_is_reported() {
    let h = harness(
        FakeBehavior::ready(),
        HarnessOptions {
            capacity: 2,
            // No drain loop: both queued tasks are still pending when the
            // disconnect lands, and the third never fits.
            spawn_drain: false,
            ..HarnessOptions::default()
        },
    );
    h.session.start_session().await;
    wait_until(Duration::from_secs(5), || {
        h.session.status().state == straylight::types::ConnectionState::Connected
    })
    .await;

    let coordinator = h.coordinator;
    let queue = std::sync::Arc::clone(&h.queue);
    let submit = tokio::spawn(async move {
        coordinator
            .submit_batch(
                &recipients(&["0100000001", "0100000002", "0100000003"]),
                Some("hi".to_owned()),
                Vec::new(),
            )
            .await
    });

    wait_until(Duration::from_secs(5), || queue.len() == 2).await;
    h.factory
        .connection(0)
        .emit(DriverEvent::Disconnected { reason: None })
        .await;

    let report = submit
        .await
        .expect("submit task should not panic")
        .expect("batch should be accepted");

    assert_eq!(report.total(), 3);
    assert!(report.delivered.is_empty());
    assert_eq!(
        report.failed.get("20100000001").map(String::as_str),
        Some("transport error: disconnected")
    );
    assert_eq!(
        report.failed.get("20100000002").map(String::as_str),
        Some("transport error: disconnected")
    );
    assert_eq!(
        report.failed.get("20100000003").map(String::as_str),
        Some("delivery queue full")
    );
}

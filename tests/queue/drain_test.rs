//! Drain-loop behavior: strict FIFO, single-flight execution, and the
//! per-task delivery pipeline.

use std::time::Duration;

use crate::common::{connected_harness, harness, recipients, DriverCall, FakeBehavior, HarnessOptions};

#[tokio::test]
async fn tasks_execute_in_fifo_order_without_overlap() {
    let h = harness(
        FakeBehavior {
            // Latency widens the window in which overlap would show up.
            call_delay: Duration::from_millis(5),
            auto_events: vec![straylight::types::DriverEvent::Ready],
            ..FakeBehavior::default()
        },
        HarnessOptions::default(),
    );
    h.session.start_session().await;
    crate::common::wait_until(Duration::from_secs(5), || {
        h.session.status().state == straylight::types::ConnectionState::Connected
    })
    .await;

    let report = h
        .coordinator
        .submit_batch(
            &recipients(&["0100000001", "0100000002", "0100000003"]),
            Some("hello".to_owned()),
            Vec::new(),
        )
        .await
        .expect("batch should be accepted");

    assert_eq!(report.delivered.len(), 3);
    assert!(report.failed.is_empty());

    let driver = &h.factory.connection(0).driver;
    let expected: Vec<DriverCall> = ["20100000001", "20100000002", "20100000003"]
        .iter()
        .flat_map(|address| {
            vec![
                DriverCall::IsRegistered((*address).to_owned()),
                DriverCall::SendText {
                    address: (*address).to_owned(),
                    text: "hello".to_owned(),
                },
            ]
        })
        .collect();
    assert_eq!(driver.calls(), expected);
    assert_eq!(driver.max_concurrent(), 1, "sends must never overlap");
}

#[tokio::test]
async fn unregistered_recipients_are_never_sent_to() {
    let h = harness(
        FakeBehavior {
            unregistered: vec!["20100000002".to_owned()],
            auto_events: vec![straylight::types::DriverEvent::Ready],
            ..FakeBehavior::default()
        },
        HarnessOptions::default(),
    );
    h.session.start_session().await;
    crate::common::wait_until(Duration::from_secs(5), || {
        h.session.status().state == straylight::types::ConnectionState::Connected
    })
    .await;

    let report = h
        .coordinator
        .submit_batch(
            &recipients(&["0100000001", "100000002"]),
            Some("hi".to_owned()),
            Vec::new(),
        )
        .await
        .expect("batch should be accepted");

    assert_eq!(report.delivered, vec!["20100000001".to_owned()]);
    assert_eq!(
        report.failed.get("20100000002").map(String::as_str),
        Some("recipient not registered")
    );

    let calls = h.factory.connection(0).driver.calls();
    let sent_to_unregistered = calls.iter().any(|call| {
        matches!(
            call,
            DriverCall::SendText { address, .. } if address == "20100000002"
        )
    });
    assert!(!sent_to_unregistered);
}

#[tokio::test]
async fn attachments_send_in_order_with_caption_on_first_only() {
    let h = connected_harness().await;
    h.store.insert("report.png", "image/png");
    h.store.insert("clip.mp4", "video/mp4");

    let report = h
        .coordinator
        .submit_batch(
            &recipients(&["0100000001"]),
            Some("monthly numbers".to_owned()),
            vec!["report.png".to_owned(), "clip.mp4".to_owned()],
        )
        .await
        .expect("batch should be accepted");

    assert_eq!(report.delivered.len(), 1);

    let calls = h.factory.connection(0).driver.calls();
    assert_eq!(
        calls,
        vec![
            DriverCall::IsRegistered("20100000001".to_owned()),
            DriverCall::SendAttachment {
                address: "20100000001".to_owned(),
                file_name: "report.png".to_owned(),
                caption: Some("monthly numbers".to_owned()),
                as_document: false,
            },
            DriverCall::SendAttachment {
                address: "20100000001".to_owned(),
                file_name: "clip.mp4".to_owned(),
                caption: None,
                // Videos go out as documents.
                as_document: true,
            },
        ]
    );
}

#[tokio::test]
async fn missing_attachment_fails_the_task() {
    let h = connected_harness().await;

    let report = h
        .coordinator
        .submit_batch(
            &recipients(&["0100000001"]),
            None,
            vec!["vanished.png".to_owned()],
        )
        .await
        .expect("batch should be accepted");

    assert!(report.delivered.is_empty());
    assert_eq!(
        report.failed.get("20100000001").map(String::as_str),
        Some("attachment error: not found")
    );
}

#[tokio::test]
async fn undeterminable_content_type_fails_the_task() {
    let h = connected_harness().await;
    h.store.mark_unsupported("mystery.bin");

    let report = h
        .coordinator
        .submit_batch(
            &recipients(&["0100000001"]),
            None,
            vec!["mystery.bin".to_owned()],
        )
        .await
        .expect("batch should be accepted");

    assert_eq!(
        report.failed.get("20100000001").map(String::as_str),
        Some("attachment error: unsupported type")
    );
}

#[tokio::test]
async fn first_attachment_failure_aborts_the_rest() {
    let h = harness(
        FakeBehavior {
            attachment_failure: Some("media refused".to_owned()),
            auto_events: vec![straylight::types::DriverEvent::Ready],
            ..FakeBehavior::default()
        },
        HarnessOptions::default(),
    );
    h.session.start_session().await;
    crate::common::wait_until(Duration::from_secs(5), || {
        h.session.status().state == straylight::types::ConnectionState::Connected
    })
    .await;
    h.store.insert("one.png", "image/png");
    h.store.insert("two.png", "image/png");

    let report = h
        .coordinator
        .submit_batch(
            &recipients(&["0100000001"]),
            None,
            vec!["one.png".to_owned(), "two.png".to_owned()],
        )
        .await
        .expect("batch should be accepted");

    let reason = report
        .failed
        .get("20100000001")
        .expect("task should have failed");
    assert!(reason.starts_with("attachment error:"), "got: {reason}");

    let attachment_sends = h
        .factory
        .connection(0)
        .driver
        .calls()
        .iter()
        .filter(|call| matches!(call, DriverCall::SendAttachment { .. }))
        .count();
    assert_eq!(attachment_sends, 1, "remaining attachments must be skipped");
}

#[tokio::test]
async fn text_transport_failure_is_reported() {
    let h = harness(
        FakeBehavior {
            text_failure: Some("socket reset".to_owned()),
            auto_events: vec![straylight::types::DriverEvent::Ready],
            ..FakeBehavior::default()
        },
        HarnessOptions::default(),
    );
    h.session.start_session().await;
    crate::common::wait_until(Duration::from_secs(5), || {
        h.session.status().state == straylight::types::ConnectionState::Connected
    })
    .await;

    let report = h
        .coordinator
        .submit_batch(&recipients(&["0100000001"]), Some("hi".to_owned()), Vec::new())
        .await
        .expect("batch should be accepted");

    let reason = report
        .failed
        .get("20100000001")
        .expect("task should have failed");
    assert!(reason.starts_with("transport error:"), "got: {reason}");
}

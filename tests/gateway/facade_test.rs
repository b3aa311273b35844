//! Facade wiring: the boundary operations exposed to the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use straylight::config::GatewayConfig;
use straylight::credentials::CredentialStore;
use straylight::driver::DriverFactory;
use straylight::gateway::{Gateway, GatewayError};
use straylight::store::ContentStore;
use straylight::types::ConnectionState;

use crate::common::{recipients, wait_until, FakeBehavior, FakeFactory, FakeStore};

fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.delivery.pacing_ms = 0;
    config.delivery.connect_grace_secs = 2;
    config.session.restart_initial_ms = 10;
    config.session.restart_max_ms = 40;
    config
}

fn build(behavior: FakeBehavior) -> (Gateway, Arc<FakeFactory>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir should be creatable");
    let factory = FakeFactory::new(behavior);
    let store = FakeStore::new();
    let gateway = Gateway::new(
        &test_config(),
        Arc::clone(&factory) as Arc<dyn DriverFactory>,
        store as Arc<dyn ContentStore>,
        CredentialStore::new(tmp.path().join("session")),
    );
    (gateway, factory, tmp)
}

#[tokio::test]
async fn status_reflects_the_session_and_batches_flow_through() {
    let (gateway, _factory, _tmp) = build(FakeBehavior::ready());

    assert_eq!(gateway.status().state, ConnectionState::Disconnected);
    gateway.start().await;
    wait_until(Duration::from_secs(5), || {
        gateway.status().state == ConnectionState::Connected
    })
    .await;

    let report = gateway
        .submit_batch(
            &recipients(&["0100000001"]),
            Some("hi".to_owned()),
            Vec::new(),
        )
        .await
        .expect("batch should be accepted");
    assert_eq!(report.delivered, vec!["20100000001".to_owned()]);
    assert_eq!(gateway.queue_depth(), 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn request_disconnect_forces_a_fresh_session() {
    let (gateway, factory, _tmp) = build(FakeBehavior::ready());

    gateway.start().await;
    wait_until(Duration::from_secs(5), || {
        gateway.status().state == ConnectionState::Connected
    })
    .await;
    assert_eq!(factory.connect_count(), 1);

    gateway.request_disconnect().await;

    factory.wait_for_connects(2).await;
    wait_until(Duration::from_secs(5), || {
        gateway.status().state == ConnectionState::Connected
    })
    .await;

    gateway.shutdown().await;
}

#[tokio::test]
async fn validation_errors_pass_through_the_facade() {
    let (gateway, _factory, _tmp) = build(FakeBehavior::ready());
    gateway.start().await;
    wait_until(Duration::from_secs(5), || {
        gateway.status().state == ConnectionState::Connected
    })
    .await;

    let result = gateway.submit_batch(&[], None, Vec::new()).await;
    assert!(matches!(result, Err(GatewayError::Validation(_))));

    gateway.shutdown().await;
}

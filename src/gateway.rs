//! Gateway facade: wires the session, queue, and coordinator together and
//! exposes the three boundary operations the HTTP layer calls.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::batch::BulkSendCoordinator;
use crate::config::GatewayConfig;
use crate::credentials::CredentialStore;
use crate::driver::DriverFactory;
use crate::queue::DeliveryQueue;
use crate::session::SessionManager;
use crate::store::ContentStore;
use crate::types::{BatchReport, ConnectionState, StatusSnapshot};

/// Errors surfaced to batch callers.
///
/// Connection-level failures never appear here; they are absorbed by the
/// session manager's self-healing transitions and show up per-task as
/// transport errors, or in [`Gateway::status`].
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The batch shape is invalid; no task was created.
    #[error("invalid batch: {0}")]
    Validation(String),

    /// The session did not reach Connected within the grace period; no
    /// task was created.
    #[error("session not connected (state: {state:?})")]
    NotConnected {
        /// The state the session was in when the grace period expired.
        state: ConnectionState,
    },
}

/// The assembled gateway: one session, one queue, one drain loop.
pub struct Gateway {
    session: Arc<SessionManager>,
    queue: Arc<DeliveryQueue>,
    coordinator: BulkSendCoordinator,
    drain: tokio::task::JoinHandle<()>,
}

impl Gateway {
    /// Wire a gateway from configuration and its injected collaborators.
    ///
    /// Spawns the drain loop immediately; it parks until the session
    /// connects. Call [`Gateway::start`] to begin connecting.
    pub fn new(
        config: &GatewayConfig,
        factory: Arc<dyn DriverFactory>,
        store: Arc<dyn ContentStore>,
        credentials: CredentialStore,
    ) -> Self {
        let queue = Arc::new(DeliveryQueue::new(config.delivery.queue_capacity));
        let session = Arc::new(SessionManager::new(
            factory,
            credentials,
            Arc::clone(&queue),
            config.session.restart_policy(),
        ));

        let drain = tokio::spawn(Arc::clone(&queue).run_drain(
            Arc::clone(&session),
            store,
            config.delivery.pacing(),
            config.delivery.country_prefix.clone(),
        ));

        let coordinator = BulkSendCoordinator::new(
            Arc::clone(&queue),
            Arc::clone(&session),
            config.delivery.country_prefix.clone(),
            Duration::from_secs(config.delivery.connect_grace_secs),
        );

        Self {
            session,
            queue,
            coordinator,
            drain,
        }
    }

    /// Begin connecting. Idempotent; returns without waiting for pairing
    /// or authentication to finish.
    pub async fn start(&self) {
        self.session.start_session().await;
    }

    /// Latest session state and pairing challenge, the single source of
    /// truth for "can I send right now".
    pub fn status(&self) -> StatusSnapshot {
        self.session.status()
    }

    /// Number of tasks waiting in the delivery queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Tear the session down and immediately begin a fresh one, forcing a
    /// new pairing. Acknowledged once the teardown has completed.
    pub async fn request_disconnect(&self) {
        info!("disconnect requested");
        self.session.stop_session().await;
        self.session.start_session().await;
    }

    /// Submit a broadcast batch; see
    /// [`BulkSendCoordinator::submit_batch`].
    ///
    /// # Errors
    ///
    /// Propagates [`GatewayError`] from validation or an unavailable
    /// session; per-recipient failures are reported in the
    /// [`BatchReport`], never as errors.
    pub async fn submit_batch(
        &self,
        recipients: &[String],
        text_body: Option<String>,
        attachment_refs: Vec<String>,
    ) -> Result<BatchReport, GatewayError> {
        self.coordinator
            .submit_batch(recipients, text_body, attachment_refs)
            .await
    }

    /// Stop the session and the drain loop. The gateway cannot be reused
    /// afterwards.
    pub async fn shutdown(&self) {
        self.session.stop_session().await;
        self.drain.abort();
        info!("gateway shut down");
    }
}

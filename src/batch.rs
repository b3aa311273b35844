//! Batch expansion and aggregation: the boundary operation callers invoke.
//!
//! A batch is a broadcast: the same text and attachments go to every
//! recipient. The coordinator expands it into one [`SendTask`] per
//! recipient, enqueues them all, then waits for every task's completion
//! sink. Waiting is per-task; only the queue's drain is serialized, so a
//! slow send never blocks the accounting of the ones already finished.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::address;
use crate::gateway::GatewayError;
use crate::queue::DeliveryQueue;
use crate::session::SessionManager;
use crate::types::{BatchReport, DeliveryOutcome, SendTask};

/// Expands batch requests into send tasks and aggregates their outcomes.
pub struct BulkSendCoordinator {
    queue: Arc<DeliveryQueue>,
    session: Arc<SessionManager>,
    country_prefix: String,
    connect_grace: Duration,
}

impl BulkSendCoordinator {
    /// Create a coordinator over the queue and session.
    pub fn new(
        queue: Arc<DeliveryQueue>,
        session: Arc<SessionManager>,
        country_prefix: String,
        connect_grace: Duration,
    ) -> Self {
        Self {
            queue,
            session,
            country_prefix,
            connect_grace,
        }
    }

    /// Submit a broadcast batch and wait for every recipient's outcome.
    ///
    /// Waits up to the configured grace period for the session to reach
    /// Connected, then enqueues one task per recipient and blocks until
    /// each reaches a terminal outcome. Every recipient appears in the
    /// report exactly once, keyed by normalized address.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] when the batch shape is invalid (no
    /// recipients, or neither text nor attachments); no task is created.
    /// [`GatewayError::NotConnected`] when the session does not come up
    /// within the grace period; no task is created.
    pub async fn submit_batch(
        &self,
        recipients: &[String],
        text_body: Option<String>,
        attachment_refs: Vec<String>,
    ) -> Result<BatchReport, GatewayError> {
        if recipients.is_empty() {
            return Err(GatewayError::Validation(
                "recipients must not be empty".to_owned(),
            ));
        }
        let text_body = text_body.filter(|text| !text.trim().is_empty());
        if text_body.is_none() && attachment_refs.is_empty() {
            return Err(GatewayError::Validation(
                "either a message or attachments are required".to_owned(),
            ));
        }

        if !self.session.wait_connected(self.connect_grace).await {
            let state = self.session.status().state;
            warn!(?state, "batch rejected, session not connected");
            return Err(GatewayError::NotConnected { state });
        }

        let batch_id = Uuid::new_v4();
        info!(
            batch = %batch_id,
            recipients = recipients.len(),
            attachments = attachment_refs.len(),
            "batch submitted"
        );

        let mut pending = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let address = address::normalize(recipient, &self.country_prefix);
            let (task, receiver) = SendTask::new(
                recipient.clone(),
                text_body.clone(),
                attachment_refs.clone(),
            );
            if let Err(task) = self.queue.enqueue(task) {
                // The rejection is this task's terminal outcome; it never
                // entered the queue.
                task.complete(DeliveryOutcome::QueueFull);
            }
            pending.push((address, receiver));
        }

        let mut report = BatchReport::default();
        for (address, receiver) in pending {
            let outcome = receiver
                .await
                .unwrap_or_else(|_| DeliveryOutcome::TransportError("task abandoned".to_owned()));
            match outcome.failure_reason() {
                None => report.delivered.push(address),
                Some(reason) => {
                    report.failed.insert(address, reason);
                }
            }
        }

        info!(
            batch = %batch_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "batch completed"
        );
        Ok(report)
    }
}

//! Core data model shared across the gateway: connection lifecycle states,
//! driver events, send tasks, and delivery outcomes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Lifecycle state of the chat-network session.
///
/// Owned exclusively by the session manager; exactly one state is active at
/// a time and transitions only occur through its event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No driver exists; sends are impossible.
    Disconnected,
    /// A driver is being constructed and is dialing the network.
    Initializing,
    /// The network issued a pairing challenge that must be completed
    /// out-of-band (e.g. scanning a QR code) before authentication.
    AwaitingPairing,
    /// Credentials were accepted; waiting for the session to become usable.
    Authenticating,
    /// The session is live; the delivery queue may drain.
    Connected,
    /// An explicit disconnect is in progress.
    Disconnecting,
}

impl ConnectionState {
    /// Whether sends can be issued in this state.
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// One-time credential-linking payload presented during first-time
/// authentication, e.g. a scannable QR code.
///
/// Present only while the session is [`ConnectionState::AwaitingPairing`];
/// cleared on any transition out of that state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingChallenge {
    /// Opaque pairing token as issued by the network (base64 payload).
    pub token: String,
    /// When the challenge was issued.
    pub issued_at: DateTime<Utc>,
}

impl PairingChallenge {
    /// Create a challenge stamped with the current time.
    pub fn new(token: String) -> Self {
        Self {
            token,
            issued_at: Utc::now(),
        }
    }
}

/// Lifecycle event emitted by a [`crate::driver::ConnectionDriver`].
///
/// Consumed single-threadedly by the session manager's event loop so
/// transition handling is serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// The network requires out-of-band pairing before it will authenticate.
    PairingChallenge {
        /// Opaque pairing token to present to the operator.
        token: String,
    },
    /// Stored credentials were accepted.
    Authenticated,
    /// The session is fully established and usable for sends.
    Ready,
    /// The network rejected the stored credentials.
    AuthFailed {
        /// Human-readable rejection reason, if the network provided one.
        reason: Option<String>,
    },
    /// The connection dropped.
    Disconnected {
        /// Human-readable drop reason, if known.
        reason: Option<String>,
    },
}

/// Terminal result of one [`SendTask`]. Exactly one outcome is produced per
/// task, ever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Every step succeeded: the text and/or all attachments were sent.
    Delivered,
    /// The normalized address is not registered on the chat network; no
    /// send was attempted.
    RecipientNotRegistered,
    /// An attachment could not be resolved or sent. Attachments already
    /// sent for this recipient are not retracted.
    AttachmentError(String),
    /// The transport failed before or during the send, including
    /// disconnect-induced abandonment of queued tasks.
    TransportError(String),
    /// The delivery queue was at capacity; the task never entered it.
    QueueFull,
}

impl DeliveryOutcome {
    /// The failure reason recorded in a [`BatchReport`], or `None` for a
    /// successful delivery.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Delivered => None,
            Self::RecipientNotRegistered => Some("recipient not registered".to_owned()),
            Self::AttachmentError(reason) => Some(format!("attachment error: {reason}")),
            Self::TransportError(reason) => Some(format!("transport error: {reason}")),
            Self::QueueFull => Some("delivery queue full".to_owned()),
        }
    }
}

/// Unit of work representing one recipient's message and attachments within
/// a batch.
///
/// Born at enqueue time, consumed exactly once by the drain loop, discarded
/// after its outcome reaches the completion sink. Never re-enqueued; a retry
/// is a fresh task with a fresh id.
pub struct SendTask {
    /// Correlation id for logging and tracing.
    pub id: Uuid,
    /// Raw recipient input as submitted by the caller; normalized into a
    /// network address at execution time.
    pub recipient: String,
    /// Message text. Used as the body of a text-only send, or as the
    /// caption of the first attachment.
    pub text_body: Option<String>,
    /// Ordered content-store references to attach.
    pub attachment_refs: Vec<String>,
    /// When the task was created.
    pub enqueued_at: DateTime<Utc>,
    /// Single-shot result sink; the coordinator holds the receiving side.
    completion: oneshot::Sender<DeliveryOutcome>,
}

// Manual Debug impl because oneshot::Sender doesn't implement Debug.
impl std::fmt::Debug for SendTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendTask")
            .field("id", &self.id)
            .field("recipient", &self.recipient)
            .field("text_body", &self.text_body.as_deref().map(str::len))
            .field("attachment_refs", &self.attachment_refs)
            .field("enqueued_at", &self.enqueued_at)
            .field("completion", &"<oneshot::Sender>")
            .finish()
    }
}

impl SendTask {
    /// Create a task and the receiver its outcome will arrive on.
    pub fn new(
        recipient: String,
        text_body: Option<String>,
        attachment_refs: Vec<String>,
    ) -> (Self, oneshot::Receiver<DeliveryOutcome>) {
        let (tx, rx) = oneshot::channel();
        let task = Self {
            id: Uuid::new_v4(),
            recipient,
            text_body,
            attachment_refs,
            enqueued_at: Utc::now(),
            completion: tx,
        };
        (task, rx)
    }

    /// Fulfill the completion sink with the task's terminal outcome.
    ///
    /// Consumes the task so an outcome can only ever be delivered once.
    /// If the receiver was dropped (the batch caller went away), the send
    /// is silently ignored.
    pub fn complete(self, outcome: DeliveryOutcome) {
        let _ = self.completion.send(outcome);
    }
}

/// Aggregated result of one batch submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Normalized addresses that reached [`DeliveryOutcome::Delivered`].
    pub delivered: Vec<String>,
    /// Normalized address to failure reason, for every task that did not.
    pub failed: BTreeMap<String, String>,
}

impl BatchReport {
    /// Total number of tasks the report accounts for.
    pub fn total(&self) -> usize {
        self.delivered.len().saturating_add(self.failed.len())
    }
}

/// A content-store reference resolved to an on-disk staged file.
///
/// Size and MIME admission happen at upload time, outside this crate;
/// resolution re-checks only existence and type determinability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedAttachment {
    /// Absolute path of the staged file.
    pub path: PathBuf,
    /// File name presented to the recipient.
    pub file_name: String,
    /// MIME type determined from the staged file.
    pub content_type: String,
    /// File size in bytes.
    pub size_bytes: u64,
}

impl StagedAttachment {
    /// Whether the attachment is a video (sent as a document to avoid
    /// network-side transcoding limits).
    pub fn is_video(&self) -> bool {
        self.content_type.starts_with("video/")
    }
}

/// Point-in-time view of the session, safe to read concurrently with
/// transitions. The single source of truth for "can I send right now".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Pending pairing challenge, present only while
    /// [`ConnectionState::AwaitingPairing`].
    pub pairing: Option<PairingChallenge>,
    /// Consecutive automatic restart attempts since the last successful
    /// connection.
    pub restart_attempts: u32,
    /// Persistent session error once the restart budget is exhausted, or
    /// the most recent initialization failure.
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    /// A snapshot for a freshly constructed, never-started session.
    pub fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            pairing: None,
            restart_attempts: 0,
            last_error: None,
        }
    }
}

//! Connection driver boundary: the opaque handle to the chat-network
//! session.
//!
//! The gateway never speaks the network's wire protocol. A
//! [`ConnectionDriver`] exposes the three primitives delivery needs plus
//! teardown; lifecycle events arrive on the mpsc channel handed over in the
//! [`DriverHandle`] at construction time. The concrete [`bridge`]
//! implementation talks HTTP to a sidecar process that owns the real
//! protocol session; tests inject scripted fakes through [`DriverFactory`].

pub mod bridge;
pub mod events;
pub mod sidecar;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{DriverEvent, StagedAttachment};

pub use bridge::{BridgeDriver, BridgeFactory};

/// Errors from the connection driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The session is not connected; no send is possible.
    #[error("not connected to the chat network")]
    NotConnected,

    /// HTTP request to the bridge failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge accepted the request but reported a failure.
    #[error("bridge rejected the request: {0}")]
    Rejected(String),

    /// Driver construction or the initial health check failed.
    #[error("driver initialization failed: {0}")]
    Init(String),

    /// Reading a staged attachment from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options for a single attachment send.
#[derive(Debug, Clone, Default)]
pub struct AttachmentSendOptions {
    /// Caption shown with the attachment; set on the first attachment of a
    /// task only.
    pub caption: Option<String>,
    /// Send the payload as a plain document instead of inline media. Used
    /// for videos to avoid network-side transcoding limits.
    pub as_document: bool,
}

/// Opaque handle to a live chat-network session.
///
/// Owned by the session manager; only the delivery queue's drain loop calls
/// the send primitives. All methods are safe to call concurrently, but the
/// gateway serializes sends by design.
#[async_trait]
pub trait ConnectionDriver: Send + Sync {
    /// Whether the normalized address belongs to a registered account.
    async fn is_recipient_registered(&self, address: &str) -> Result<bool, DriverError>;

    /// Send a plain text message.
    async fn send_text(&self, address: &str, text: &str) -> Result<(), DriverError>;

    /// Send one staged attachment.
    async fn send_attachment(
        &self,
        address: &str,
        attachment: &StagedAttachment,
        options: &AttachmentSendOptions,
    ) -> Result<(), DriverError>;

    /// Tear down the network session. Idempotent; errors are surfaced so
    /// the caller can log them, but the driver must be considered dead
    /// regardless.
    async fn disconnect(&self) -> Result<(), DriverError>;
}

/// A freshly constructed driver plus the channel its lifecycle events
/// arrive on.
pub struct DriverHandle {
    /// The driver itself.
    pub driver: Arc<dyn ConnectionDriver>,
    /// Lifecycle events, consumed by the session manager's event loop.
    pub events: mpsc::Receiver<DriverEvent>,
}

// Manual Debug impl because trait objects and receivers don't implement it.
impl std::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("driver", &"<dyn ConnectionDriver>")
            .field("events", &"<mpsc::Receiver>")
            .finish()
    }
}

/// Constructs one driver per session attempt.
///
/// The session manager calls this on every (re)initialization; tests
/// substitute a factory that returns scripted fakes and counts
/// constructions.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Construct a fresh driver and begin connecting.
    ///
    /// Returns once the driver exists and its event stream is live; the
    /// connection itself progresses asynchronously through the events.
    async fn connect(&self) -> Result<DriverHandle, DriverError>;
}

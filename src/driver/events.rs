//! Event listener for bridge lifecycle events.
//!
//! Connects to the bridge's `/events/poll` HTTP long-polling endpoint and
//! forwards decoded [`DriverEvent`]s to the session manager via an mpsc
//! channel.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::DriverEvent;

/// Wire format of a bridge lifecycle event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    /// The network issued a pairing challenge.
    Qr {
        /// Base64 QR payload.
        token: String,
    },
    /// Stored credentials were accepted.
    Authenticated,
    /// The session is fully usable.
    Ready,
    /// The network rejected the stored credentials.
    AuthFailure {
        /// Human-readable reason, if available.
        reason: Option<String>,
    },
    /// The connection dropped.
    Disconnected {
        /// Human-readable reason, if available.
        reason: Option<String>,
    },
}

impl From<BridgeEvent> for DriverEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { token } => DriverEvent::PairingChallenge { token },
            BridgeEvent::Authenticated => DriverEvent::Authenticated,
            BridgeEvent::Ready => DriverEvent::Ready,
            BridgeEvent::AuthFailure { reason } => DriverEvent::AuthFailed { reason },
            BridgeEvent::Disconnected { reason } => DriverEvent::Disconnected { reason },
        }
    }
}

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Initial reconnect backoff (milliseconds).
const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Spawn an event listener that forwards bridge events to the given channel.
///
/// Returns immediately. The listener runs as a background Tokio task and
/// reconnects automatically on poll failure with exponential backoff. It
/// exits when the receiving side of `event_tx` is dropped (the session
/// generation was superseded).
pub fn spawn_event_listener(
    base_url: String,
    auth_token: Option<String>,
    event_tx: mpsc::Sender<DriverEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{base_url}/events/poll");
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            info!(url = %poll_url, "connecting to bridge event stream");

            match poll_events(&poll_url, auth_token.as_deref(), &event_tx).await {
                Ok(()) => {
                    info!("bridge event stream closed");
                    break;
                }
                Err(e) => {
                    if event_tx.is_closed() {
                        break;
                    }
                    warn!(error = %e, backoff_ms, "bridge event stream error, reconnecting");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    backoff_ms = backoff_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
                }
            }
        }
    })
}

/// Poll the bridge for events in a loop. Returns `Err` on non-timeout
/// network errors so the caller can reconnect with backoff, `Ok` when the
/// receiver is gone and the listener should stop.
async fn poll_events(
    poll_url: &str,
    auth_token: Option<&str>,
    event_tx: &mpsc::Sender<DriverEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        let mut request = client.get(poll_url);
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(events) = resp.json::<Vec<BridgeEvent>>().await {
                    for event in events {
                        debug!(?event, "received bridge event");
                        if event_tx.send(event.into()).await.is_err() {
                            // Receiver dropped; the session was superseded, shut down.
                            return Ok(());
                        }
                    }
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            Err(e) if e.is_timeout() => {
                // Normal: long-poll timeout expired, just retry immediately.
                continue;
            }
            Err(e) => {
                return Err(e.into());
            }
        }
    }
}

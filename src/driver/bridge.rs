//! HTTP client for the straylight-bridge sidecar.
//!
//! The bridge owns the actual chat-network protocol session and exposes it
//! over a small HTTP API on localhost. All driver operations go through
//! this client; lifecycle events are long-polled by [`super::events`].

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::spawn_event_listener;
use super::{AttachmentSendOptions, ConnectionDriver, DriverError, DriverFactory, DriverHandle};
use crate::config::BridgeConfig;
use crate::types::StagedAttachment;

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations. Attachment uploads ride the
/// same budget; admission caps payloads at 16 MiB upstream.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Number of health-check retries before giving up.
const HEALTH_CHECK_RETRIES: u32 = 5;

/// Delay between health-check attempts in milliseconds.
const HEALTH_CHECK_DELAY_MS: u64 = 2_000;

/// Buffer size of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Body for `POST /send`.
#[derive(Serialize)]
struct SendTextBody<'a> {
    address: &'a str,
    text: &'a str,
}

/// Body for `POST /send-media`.
#[derive(Serialize)]
struct SendMediaBody<'a> {
    address: &'a str,
    /// Base64-encoded payload. Bounded by the 16 MiB upload admission cap.
    media: String,
    content_type: &'a str,
    file_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    as_document: bool,
}

/// Connection status from `GET /status`.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeStatus {
    /// Whether the bridge holds a live network session.
    pub connected: bool,
    /// The account identifier linked to the session, if any.
    pub account: Option<String>,
}

/// Driver implementation backed by the bridge HTTP API.
pub struct BridgeDriver {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl BridgeDriver {
    /// Create a driver pointing at the given base URL.
    pub fn new(base_url: String, auth_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url,
            auth_token,
        }
    }

    /// Attach the access token header when one is configured.
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET a bridge endpoint and unwrap the response envelope.
    async fn get_data<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<T, DriverError> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self.authorized(self.client.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(DriverError::NotConnected);
        }
        let body: BridgeResponse<T> = resp.json().await?;
        body.data.ok_or_else(|| {
            DriverError::Rejected(body.error.unwrap_or_else(|| "empty response".to_owned()))
        })
    }

    /// POST a JSON body to a bridge endpoint, discarding the payload.
    async fn post_ok<B: Serialize>(&self, endpoint: &str, body: &B) -> Result<(), DriverError> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self
            .authorized(self.client.post(&url))
            .json(body)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();
        warn!(%status, endpoint, "bridge request failed: {body_text}");
        Err(DriverError::Rejected(format!("{status}: {body_text}")))
    }

    /// Check whether the bridge is reachable (regardless of session state).
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/status", self.base_url);
        match self.authorized(self.client.get(&url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Wait for the bridge to become reachable, retrying with a fixed delay.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Init`] when the bridge never comes up.
    pub async fn wait_healthy(&self) -> Result<(), DriverError> {
        for attempt in 0..HEALTH_CHECK_RETRIES {
            if self.health_check().await {
                return Ok(());
            }
            if attempt < HEALTH_CHECK_RETRIES.saturating_sub(1) {
                tokio::time::sleep(std::time::Duration::from_millis(HEALTH_CHECK_DELAY_MS)).await;
            }
        }
        Err(DriverError::Init("bridge is not reachable".to_owned()))
    }

    /// Get the current connection status from the bridge.
    pub async fn status(&self) -> Result<BridgeStatus, DriverError> {
        self.get_data("/status").await
    }

    /// Get the pending pairing token (base64 QR payload), if one exists.
    pub async fn pairing_token(&self) -> Result<String, DriverError> {
        self.get_data("/qr").await
    }
}

#[async_trait]
impl ConnectionDriver for BridgeDriver {
    async fn is_recipient_registered(&self, address: &str) -> Result<bool, DriverError> {
        self.get_data(&format!("/registered/{address}")).await
    }

    async fn send_text(&self, address: &str, text: &str) -> Result<(), DriverError> {
        self.post_ok("/send", &SendTextBody { address, text }).await?;
        debug!(address, "text sent via bridge");
        Ok(())
    }

    async fn send_attachment(
        &self,
        address: &str,
        attachment: &StagedAttachment,
        options: &AttachmentSendOptions,
    ) -> Result<(), DriverError> {
        let bytes = tokio::fs::read(&attachment.path).await?;
        let media = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.post_ok(
            "/send-media",
            &SendMediaBody {
                address,
                media,
                content_type: &attachment.content_type,
                file_name: &attachment.file_name,
                caption: options.caption.as_deref(),
                as_document: options.as_document,
            },
        )
        .await?;
        debug!(
            address,
            file = %attachment.file_name,
            size = attachment.size_bytes,
            "attachment sent via bridge"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.post_ok("/logout", &serde_json::json!({})).await
    }
}

/// Factory producing [`BridgeDriver`]s against a configured bridge.
pub struct BridgeFactory {
    base_url: String,
    auth_token: Option<String>,
}

impl BridgeFactory {
    /// Create a factory from bridge configuration and an optional access
    /// token.
    pub fn new(config: &BridgeConfig, auth_token: Option<String>) -> Self {
        Self {
            base_url: config.effective_base_url(),
            auth_token,
        }
    }
}

#[async_trait]
impl DriverFactory for BridgeFactory {
    async fn connect(&self) -> Result<DriverHandle, DriverError> {
        let driver = BridgeDriver::new(self.base_url.clone(), self.auth_token.clone());
        driver.wait_healthy().await?;

        let (event_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        // The listener exits on its own once the session is superseded and
        // the receiver is dropped.
        let _listener = spawn_event_listener(
            self.base_url.clone(),
            self.auth_token.clone(),
            event_tx,
        );

        Ok(DriverHandle {
            driver: Arc::new(driver),
            events,
        })
    }
}

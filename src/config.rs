//! Configuration loading and runtime paths.
//!
//! Loads gateway configuration from `./config.toml` (or
//! `$STRAYLIGHT_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::queue::PacingPolicy;
use crate::session::RestartPolicy;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Delivery pipeline settings (`[delivery]`).
    pub delivery: DeliveryConfig,
    /// Session lifecycle settings (`[session]`).
    pub session: SessionConfig,
    /// Sidecar bridge settings (`[bridge]`).
    pub bridge: BridgeConfig,
}

/// Delivery pipeline settings: normalization, pacing, and backpressure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Default country-code prefix prepended to national numbers.
    pub country_prefix: String,
    /// Fixed pause between consecutive sends, in milliseconds.
    pub pacing_ms: u64,
    /// Maximum number of queued tasks before enqueues are rejected.
    pub queue_capacity: usize,
    /// How long `submit_batch` waits for the session to become connected
    /// before failing fast, in seconds.
    pub connect_grace_secs: u64,
    /// Directory holding staged attachment files.
    pub staging_dir: Option<PathBuf>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            country_prefix: default_country_prefix(),
            pacing_ms: default_pacing_ms(),
            queue_capacity: default_queue_capacity(),
            connect_grace_secs: default_connect_grace_secs(),
            staging_dir: None,
        }
    }
}

impl DeliveryConfig {
    /// Pacing policy for the delivery queue's drain loop.
    pub fn pacing(&self) -> PacingPolicy {
        PacingPolicy::new(Duration::from_millis(self.pacing_ms))
    }
}

/// Session lifecycle settings: automatic-restart backoff bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Initial restart backoff, in milliseconds.
    pub restart_initial_ms: u64,
    /// Maximum restart backoff, in milliseconds.
    pub restart_max_ms: u64,
    /// Consecutive failed restarts before the session parks in
    /// `Disconnected` with a persistent error.
    pub restart_max_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restart_initial_ms: default_restart_initial_ms(),
            restart_max_ms: default_restart_max_ms(),
            restart_max_attempts: default_restart_max_attempts(),
        }
    }
}

impl SessionConfig {
    /// Restart policy for the session manager.
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            initial: Duration::from_millis(self.restart_initial_ms),
            max: Duration::from_millis(self.restart_max_ms),
            max_attempts: self.restart_max_attempts,
        }
    }
}

/// Sidecar bridge settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Full base URL of the bridge. Overrides `port` when set.
    pub base_url: Option<String>,
    /// Port the bridge listens on at `127.0.0.1` when `base_url` is unset.
    pub port: u16,
    /// Container image for the managed bridge sidecar.
    pub image: String,
    /// Whether the gateway manages the bridge container lifecycle itself.
    pub manage_container: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            port: default_bridge_port(),
            image: default_bridge_image(),
            manage_container: true,
        }
    }
}

impl BridgeConfig {
    /// Effective base URL of the bridge HTTP API.
    pub fn effective_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_owned(),
            None => format!("http://127.0.0.1:{}", self.port),
        }
    }
}

// Default value functions for serde

fn default_country_prefix() -> String {
    "20".to_owned()
}
fn default_pacing_ms() -> u64 {
    2_000
}
fn default_queue_capacity() -> usize {
    1_024
}
fn default_connect_grace_secs() -> u64 {
    15
}
fn default_restart_initial_ms() -> u64 {
    1_000
}
fn default_restart_max_ms() -> u64 {
    30_000
}
fn default_restart_max_attempts() -> u32 {
    8
}
fn default_bridge_port() -> u16 {
    3001
}
fn default_bridge_image() -> String {
    "ghcr.io/straylight/straylight-bridge:latest".to_owned()
}

impl GatewayConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$STRAYLIGHT_CONFIG_PATH` or `./config.toml`.
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or if the resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: GatewayConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(GatewayConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config file path using a custom env resolver (for testing).
    fn config_path(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("STRAYLIGHT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("STRAYLIGHT_COUNTRY_PREFIX") {
            self.delivery.country_prefix = v;
        }
        Self::override_parsed(&env, "STRAYLIGHT_PACING_MS", &mut self.delivery.pacing_ms);
        Self::override_parsed(
            &env,
            "STRAYLIGHT_QUEUE_CAPACITY",
            &mut self.delivery.queue_capacity,
        );
        Self::override_parsed(
            &env,
            "STRAYLIGHT_CONNECT_GRACE_SECS",
            &mut self.delivery.connect_grace_secs,
        );
        if let Some(v) = env("STRAYLIGHT_STAGING_DIR") {
            self.delivery.staging_dir = Some(PathBuf::from(v));
        }

        Self::override_parsed(
            &env,
            "STRAYLIGHT_RESTART_INITIAL_MS",
            &mut self.session.restart_initial_ms,
        );
        Self::override_parsed(
            &env,
            "STRAYLIGHT_RESTART_MAX_MS",
            &mut self.session.restart_max_ms,
        );
        Self::override_parsed(
            &env,
            "STRAYLIGHT_RESTART_MAX_ATTEMPTS",
            &mut self.session.restart_max_attempts,
        );

        if let Some(v) = env("STRAYLIGHT_BRIDGE_URL") {
            self.bridge.base_url = Some(v);
        }
        Self::override_parsed(&env, "STRAYLIGHT_BRIDGE_PORT", &mut self.bridge.port);
        if let Some(v) = env("STRAYLIGHT_BRIDGE_IMAGE") {
            self.bridge.image = v;
        }
    }

    /// Parse an env override into `target`, warning on invalid values.
    fn override_parsed<T: std::str::FromStr>(
        env: impl Fn(&str) -> Option<String>,
        key: &str,
        target: &mut T,
    ) {
        if let Some(v) = env(key) {
            match v.parse() {
                Ok(parsed) => *target = parsed,
                Err(_) => {
                    tracing::warn!(var = key, value = %v, "ignoring invalid env override");
                }
            }
        }
    }

    /// Reject configurations that cannot work.
    fn validate(&self) -> Result<()> {
        if self.delivery.country_prefix.is_empty()
            || !self
                .delivery
                .country_prefix
                .chars()
                .all(|c| c.is_ascii_digit())
        {
            anyhow::bail!(
                "delivery.country_prefix must be digits-only, got {:?}",
                self.delivery.country_prefix
            );
        }
        if self.delivery.queue_capacity == 0 {
            anyhow::bail!("delivery.queue_capacity must be at least 1");
        }
        if let Some(url) = &self.bridge.base_url {
            url::Url::parse(url).with_context(|| format!("invalid bridge.base_url: {url}"))?;
        }
        Ok(())
    }
}

// ── Runtime paths ───────────────────────────────────────────────

/// Resolved filesystem locations under the gateway home directory.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Gateway home (`~/.straylight` unless `$STRAYLIGHT_HOME` overrides).
    pub root: PathBuf,
    /// Daily-rotated log files.
    pub logs_dir: PathBuf,
    /// Runtime credentials file (`.env`).
    pub env_file: PathBuf,
    /// Chat-network session state mounted into the bridge; wiped on
    /// re-authentication.
    pub session_dir: PathBuf,
    /// Default staged-attachment directory when the config does not name one.
    pub staging_dir: PathBuf,
}

/// Resolve runtime paths under `$STRAYLIGHT_HOME` or `~/.straylight`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> Result<RuntimePaths> {
    let root = match std::env::var("STRAYLIGHT_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base = directories::BaseDirs::new()
                .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
            base.home_dir().join(".straylight")
        }
    };
    Ok(RuntimePaths {
        logs_dir: root.join("logs"),
        env_file: root.join(".env"),
        session_dir: root.join("session"),
        staging_dir: root.join("staging"),
        root,
    })
}

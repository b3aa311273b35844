//! Straylight CLI entry point.
//!
//! Provides `start`, `pair`, `send`, and `status` subcommands for running
//! the gateway daemon, completing the QR pairing flow, sending a one-shot
//! broadcast batch, and probing the bridge.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use straylight::config::{runtime_paths, GatewayConfig, RuntimePaths};
use straylight::credentials::{load_credentials, CredentialStore};
use straylight::driver::bridge::BridgeDriver;
use straylight::driver::{sidecar, BridgeFactory, DriverFactory};
use straylight::gateway::Gateway;
use straylight::store::{ContentStore, FsContentStore};
use straylight::types::ConnectionState;

/// How often the pairing flow polls session status.
const PAIR_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long the pairing flow waits for a connection before giving up.
const PAIR_TIMEOUT: Duration = Duration::from_secs(180);

/// Straylight: bulk-messaging gateway over a stateful chat-network session.
#[derive(Parser)]
#[command(name = "straylight", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the gateway daemon until interrupted.
    Start,
    /// Start a session and walk through QR pairing on the terminal.
    Pair,
    /// Send a one-shot broadcast batch and print the per-recipient report.
    Send {
        /// Recipients, as raw phone-like input.
        #[arg(required = true)]
        recipients: Vec<String>,
        /// Message text (caption when attachments are present).
        #[arg(long, short)]
        message: Option<String>,
        /// Content-store references to attach, in order.
        #[arg(long = "attach")]
        attachments: Vec<String>,
    },
    /// Probe the bridge and print its connection status.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start => handle_start().await,
        Command::Pair => handle_pair().await,
        Command::Send {
            recipients,
            message,
            attachments,
        } => handle_send(recipients, message, attachments).await,
        Command::Status => handle_status().await,
    }
}

/// Shared wiring for the subcommands that need a live gateway.
async fn build_gateway(
    config: &GatewayConfig,
    paths: &RuntimePaths,
) -> anyhow::Result<Gateway> {
    let credentials = load_credentials(&paths.env_file)
        .with_context(|| format!("failed to load {}", paths.env_file.display()))?;
    let token = credentials.bridge_token();

    if config.bridge.manage_container {
        let docker = bollard::Docker::connect_with_local_defaults()
            .context("failed to connect to Docker for the bridge sidecar")?;
        sidecar::ensure_container(
            &docker,
            &config.bridge.image,
            config.bridge.port,
            &paths.session_dir,
        )
        .await
        .context("failed to ensure the bridge sidecar container")?;
    }

    let factory: Arc<dyn DriverFactory> = Arc::new(BridgeFactory::new(&config.bridge, token));
    let staging_dir = config
        .delivery
        .staging_dir
        .clone()
        .unwrap_or_else(|| paths.staging_dir.clone());
    let store: Arc<dyn ContentStore> = Arc::new(FsContentStore::new(staging_dir));
    let session_store = CredentialStore::new(paths.session_dir.clone());

    Ok(Gateway::new(config, factory, store, session_store))
}

/// Run the gateway daemon.
async fn handle_start() -> anyhow::Result<()> {
    let config = GatewayConfig::load().context("failed to load configuration")?;
    let paths = runtime_paths()?;
    let _logging_guard = straylight::logging::init_daemon(&paths.logs_dir)?;

    let gateway = build_gateway(&config, &paths).await?;
    gateway.start().await;
    info!("straylight gateway started");

    // Surface pairing challenges on the console so the operator can link
    // the account without digging through logs.
    let mut last_token: Option<String> = None;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for shutdown signal")?;
                break;
            }
            () = tokio::time::sleep(PAIR_POLL_INTERVAL) => {
                let status = gateway.status();
                if let Some(pairing) = status.pairing {
                    if last_token.as_deref() != Some(pairing.token.as_str()) {
                        println!("pairing required, scan this token:\n{}", pairing.token);
                        last_token = Some(pairing.token);
                    }
                } else {
                    last_token = None;
                }
            }
        }
    }

    info!("shutdown signal received");
    gateway.shutdown().await;
    Ok(())
}

/// Walk through the pairing flow on the terminal.
async fn handle_pair() -> anyhow::Result<()> {
    straylight::logging::init_cli();
    let config = GatewayConfig::load().context("failed to load configuration")?;
    let paths = runtime_paths()?;

    let gateway = build_gateway(&config, &paths).await?;
    gateway.start().await;

    let started = tokio::time::Instant::now();
    let mut printed_token: Option<String> = None;
    loop {
        if started.elapsed() >= PAIR_TIMEOUT {
            gateway.shutdown().await;
            anyhow::bail!("pairing timed out after {}s", PAIR_TIMEOUT.as_secs());
        }

        let status = gateway.status();
        match status.state {
            ConnectionState::Connected => {
                println!("linked: session is connected");
                gateway.shutdown().await;
                return Ok(());
            }
            ConnectionState::AwaitingPairing => {
                if let Some(pairing) = status.pairing {
                    if printed_token.as_deref() != Some(pairing.token.as_str()) {
                        println!("scan this token with the chat app:\n{}", pairing.token);
                        printed_token = Some(pairing.token);
                    }
                }
            }
            _ => {
                if let Some(error) = status.last_error {
                    warn!(error = %error, "session not healthy yet");
                }
            }
        }

        tokio::time::sleep(PAIR_POLL_INTERVAL).await;
    }
}

/// Send one broadcast batch and print the report as JSON.
async fn handle_send(
    recipients: Vec<String>,
    message: Option<String>,
    attachments: Vec<String>,
) -> anyhow::Result<()> {
    straylight::logging::init_cli();
    let config = GatewayConfig::load().context("failed to load configuration")?;
    let paths = runtime_paths()?;

    let gateway = build_gateway(&config, &paths).await?;
    gateway.start().await;

    let result = gateway.submit_batch(&recipients, message, attachments).await;
    gateway.shutdown().await;

    let report = result.context("batch was not accepted")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} of {} recipients failed",
            report.failed.len(),
            report.total()
        )
    }
}

/// Probe the bridge and print its status.
async fn handle_status() -> anyhow::Result<()> {
    straylight::logging::init_cli();
    let config = GatewayConfig::load().context("failed to load configuration")?;
    let paths = runtime_paths()?;

    let credentials = load_credentials(&paths.env_file)
        .with_context(|| format!("failed to load {}", paths.env_file.display()))?;
    let driver = BridgeDriver::new(
        config.bridge.effective_base_url(),
        credentials.bridge_token(),
    );

    let status = driver.status().await.context("bridge is not reachable")?;
    println!(
        "bridge: reachable\nsession: {}\naccount: {}",
        if status.connected {
            "connected"
        } else {
            "not connected"
        },
        status.account.as_deref().unwrap_or("none")
    );
    Ok(())
}

//! Bridge container lifecycle: ensure the straylight-bridge sidecar is
//! running before a session starts.
//!
//! Uses the inspect -> start -> pull + create pattern. The session-state
//! directory is mounted into the container so pairing survives bridge
//! restarts (until the gateway wipes it).

use std::collections::HashMap;
use std::path::Path;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use super::DriverError;

/// Container name for the bridge sidecar.
pub const CONTAINER_NAME: &str = "straylight-bridge";

/// Port the bridge listens on inside the container.
const BRIDGE_PORT: u16 = 3001;

/// Memory limit for the bridge sidecar (512 MB).
const MEMORY_LIMIT_BYTES: i64 = 512 * 1024 * 1024;

/// Mount point of the session-state directory inside the container.
const SESSION_MOUNT: &str = "/data/session";

/// Ensure the bridge sidecar container is running.
///
/// Inspect first; start it if it exists but is stopped; otherwise pull the
/// image and create it with the session directory mounted and the port
/// bound to localhost only.
///
/// # Errors
///
/// Returns [`DriverError::Init`] when the container cannot be inspected,
/// created, or started.
pub async fn ensure_container(
    docker: &Docker,
    image: &str,
    host_port: u16,
    session_dir: &Path,
) -> Result<(), DriverError> {
    // Step 1: Check if the container already exists.
    match docker.inspect_container(CONTAINER_NAME, None).await {
        Ok(info) => {
            let running = info.state.as_ref().and_then(|s| s.running).unwrap_or(false);
            if running {
                info!(container = CONTAINER_NAME, "bridge sidecar already running");
                return Ok(());
            }
            // Container exists but is stopped; start it.
            docker
                .start_container(CONTAINER_NAME, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| DriverError::Init(format!("failed to start container: {e}")))?;
            info!(container = CONTAINER_NAME, "bridge sidecar started");
            return Ok(());
        }
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => {
            // Container doesn't exist; fall through to create it.
        }
        Err(e) => {
            return Err(DriverError::Init(format!(
                "failed to inspect container: {e}"
            )));
        }
    }

    // Step 2: Pull the image.
    let pull_opts = CreateImageOptions {
        from_image: image,
        ..Default::default()
    };
    let mut pull_stream = docker.create_image(Some(pull_opts), None, None);
    while let Some(result) = pull_stream.next().await {
        if let Err(e) = result {
            warn!(error = %e, "image pull warning");
        }
    }
    info!(image, "bridge sidecar image pulled");

    // Step 3: Create the container with the port bound to 127.0.0.1 and
    // the session-state directory mounted.
    let port_key = format!("{BRIDGE_PORT}/tcp");
    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        port_key.clone(),
        Some(vec![PortBinding {
            host_ip: Some("127.0.0.1".to_owned()),
            host_port: Some(host_port.to_string()),
        }]),
    );

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: Some(vec![format!(
            "{}:{SESSION_MOUNT}",
            session_dir.display()
        )]),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(5),
        }),
        memory: Some(MEMORY_LIMIT_BYTES),
        ..Default::default()
    };

    let mut labels = HashMap::new();
    labels.insert("straylight".to_owned(), "true".to_owned());

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(port_key, HashMap::new());

    let container_config = ContainerConfig {
        image: Some(image.to_owned()),
        labels: Some(labels),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    };

    let create_opts = CreateContainerOptions {
        name: CONTAINER_NAME.to_owned(),
        platform: None,
    };
    docker
        .create_container(Some(create_opts), container_config)
        .await
        .map_err(|e| DriverError::Init(format!("failed to create container: {e}")))?;

    docker
        .start_container(CONTAINER_NAME, None::<StartContainerOptions<String>>)
        .await
        .map_err(|e| DriverError::Init(format!("failed to start container: {e}")))?;

    info!(
        container = CONTAINER_NAME,
        image, "bridge sidecar created and started"
    );
    Ok(())
}

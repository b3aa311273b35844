//! Credential handling: runtime `.env` loading and the chat-network session
//! state directory.
//!
//! Two concerns live here. [`load_credentials`] reads the bridge access
//! token (and any other secrets) from the gateway's `.env` file with strict
//! permission checks. [`CredentialStore`] owns the on-disk session-state
//! directory the bridge mounts; wiping it before re-initialization is what
//! prevents a poisoned session from being reused.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

/// Env key holding the bridge API access token.
pub const BRIDGE_TOKEN_KEY: &str = "STRAYLIGHT_BRIDGE_TOKEN";

/// Runtime credentials loaded from the `.env` file.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Returns a credential value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// The bridge API access token, if configured.
    pub fn bridge_token(&self) -> Option<String> {
        self.get(BRIDGE_TOKEN_KEY)
            .filter(|token| !token.trim().is_empty())
            .map(str::to_owned)
    }
}

/// Load credentials from a specific `.env` path.
///
/// A missing file yields empty credentials (the bridge may run without an
/// access token on a trusted host).
///
/// # Errors
///
/// Returns an error if the file exists but its permissions are too broad
/// or parsing fails.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        debug!(path = %path.display(), "no credentials file, continuing without");
        return Ok(Credentials::default());
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in credentials file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(Credentials { vars })
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Session state store
// ---------------------------------------------------------------------------

/// On-disk store for the chat-network session state (pairing keys, auth
/// blobs) that the bridge reads and writes.
///
/// The gateway never interprets the contents; it only guarantees the
/// directory exists with private permissions and wipes it when the network
/// rejects the stored credentials.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `root`. The directory is created lazily by
    /// [`CredentialStore::ensure`].
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The session-state directory path (for mounting into the bridge).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ensure the directory exists with private (0700) permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or its
    /// permissions cannot be set.
    pub fn ensure(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!(
                "failed to create session state directory {}",
                self.root.display()
            )
        })?;
        enforce_private_dir_permissions(&self.root)
    }

    /// Best-effort wipe of all stored session state.
    ///
    /// Called before re-initialization so a poisoned session is never
    /// reused. Failures are logged and swallowed; a fresh driver can still
    /// be constructed and the network will simply demand a new pairing.
    pub fn wipe(&self) {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!(path = %self.root.display(), "session credentials wiped");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    path = %self.root.display(),
                    error = %e,
                    "failed to wipe session credentials, continuing"
                );
            }
        }
        if let Err(e) = self.ensure() {
            warn!(error = %e, "failed to recreate session state directory");
        }
    }
}

/// Set 0700 on a directory when the platform supports it.
fn enforce_private_dir_permissions(path: &Path) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

//! Secure-copy retrieval of the fixture manifest into a staging area.

use super::{FixtureManifest, StagingArea};
use crate::credentials::ConnectionCredentials;
use crate::errors::FetchError;
use crate::runtime::{run_with_timeout, TimedResult};
use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A channel that can copy one remote path to a local destination.
#[async_trait]
pub trait SecureCopyTransport: Send + Sync {
    /// Copies `remote` to `local`.
    ///
    /// `local` is either an existing directory or a file path whose parent
    /// exists.
    async fn copy(
        &self,
        remote: &str,
        local: &Path,
        auth: &ConnectionCredentials,
    ) -> Result<(), FetchError>;

    /// Whether the remote host's key is checked before copying.
    fn checks_host_keys(&self) -> bool {
        true
    }
}

/// Trust settings for the fixture host.
///
/// Host key checking is off by default: fixture hosts are ephemeral and
/// rotate their keys. This is an accepted risk, stated in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Pass `StrictHostKeyChecking=yes` instead of `no`.
    pub strict_host_key_checking: bool,
    /// SSH port, if not 22.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Feed the password through `sshpass`. When false, `scp` must be able
    /// to authenticate on its own (agent or key file).
    pub use_sshpass: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            strict_host_key_checking: false,
            port: None,
            use_sshpass: true,
        }
    }
}

/// `scp`-based transport.
#[derive(Debug, Clone)]
pub struct ScpTransport {
    trust: TrustConfig,
    scp_program: String,
    sshpass_program: String,
}

impl ScpTransport {
    /// Creates a transport with the given trust settings.
    #[must_use]
    pub fn new(trust: TrustConfig) -> Self {
        Self {
            trust,
            scp_program: "scp".to_string(),
            sshpass_program: "sshpass".to_string(),
        }
    }

    /// Builds the command for one copy. The password travels in `SSHPASS`.
    #[must_use]
    pub fn build_command(
        &self,
        remote: &str,
        local: &Path,
        auth: &ConnectionCredentials,
    ) -> Command {
        let mut cmd = if self.trust.use_sshpass {
            let mut cmd = Command::new(&self.sshpass_program);
            cmd.arg("-e").arg(&self.scp_program).env("SSHPASS", &auth.password);
            cmd
        } else {
            Command::new(&self.scp_program)
        };

        let checking = if self.trust.strict_host_key_checking { "yes" } else { "no" };
        cmd.arg("-r")
            .arg("-o")
            .arg(format!("StrictHostKeyChecking={checking}"));
        if !self.trust.strict_host_key_checking {
            cmd.arg("-o").arg("UserKnownHostsFile=/dev/null");
        }
        if let Some(port) = self.trust.port {
            cmd.arg("-P").arg(port.to_string());
        }
        cmd.arg(format!("{}@{}:{}", auth.username, auth.host, remote))
            .arg(local);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl SecureCopyTransport for ScpTransport {
    async fn copy(
        &self,
        remote: &str,
        local: &Path,
        auth: &ConnectionCredentials,
    ) -> Result<(), FetchError> {
        let output = self
            .build_command(remote, local, auth)
            .output()
            .await
            .map_err(|e| FetchError::transport(remote, format!("failed to start scp: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let cause = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .map_or_else(|| format!("scp exited with {}", output.status), |l| l.trim().to_string());
        Err(FetchError::transport(remote, cause))
    }

    fn checks_host_keys(&self) -> bool {
        self.trust.strict_host_key_checking
    }
}

/// Copies every manifest entry into the staging area.
#[derive(Clone)]
pub struct FixtureFetcher {
    transport: Arc<dyn SecureCopyTransport>,
    concurrency: usize,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for FixtureFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureFetcher")
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl FixtureFetcher {
    /// Creates a fetcher that copies one entry at a time.
    #[must_use]
    pub fn new(transport: Arc<dyn SecureCopyTransport>) -> Self {
        Self {
            transport,
            concurrency: 1,
            timeout: None,
        }
    }

    /// Sets the maximum number of concurrent copies.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the wall-clock budget for the whole fetch.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetches the manifest into `staging`.
    ///
    /// Returns once every copy finished, or as soon as one fails; in-flight
    /// copies are dropped at that point.
    pub async fn fetch(
        &self,
        manifest: &FixtureManifest,
        staging: &StagingArea,
        auth: &ConnectionCredentials,
    ) -> Result<(), FetchError> {
        match staging.is_empty() {
            Ok(true) => {}
            Ok(false) => {
                return Err(FetchError::Staging(format!(
                    "staging area {} is not empty",
                    staging.root().display()
                )))
            }
            Err(e) => return Err(FetchError::Staging(e.to_string())),
        }

        self.warn_if_host_unverified(auth);
        info!(
            host = %auth.host,
            entries = manifest.entries.len(),
            concurrency = self.concurrency,
            "Fetching fixtures"
        );

        let transport = &self.transport;
        let copies = stream::iter(manifest.entries.iter().map(Ok::<_, FetchError>))
            .try_for_each_concurrent(self.concurrency, |entry| async move {
                let dest = staging.path_for(&entry.local);
                let dir = if entry.targets_directory() {
                    Some(dest.as_path())
                } else {
                    dest.parent()
                };
                if let Some(dir) = dir {
                    tokio::fs::create_dir_all(dir).await.map_err(|e| {
                        FetchError::Staging(format!("failed to create {}: {e}", dir.display()))
                    })?;
                }

                debug!(remote = %entry.remote, local = %dest.display(), "Copying fixture");
                transport.copy(&entry.remote, &dest, auth).await
            });

        match run_with_timeout(self.timeout, copies).await {
            TimedResult::Ok(()) => {
                info!("Fixtures fetched");
                Ok(())
            }
            TimedResult::Err(e) => {
                warn!(error = %e, "Fixture fetch failed");
                Err(e)
            }
            TimedResult::Timeout => Err(FetchError::Timeout {
                timeout_secs: self.timeout.map_or(0, |t| t.as_secs()),
            }),
        }
    }

    /// Logs the disabled host key check once per fetch. Returns true if it did.
    fn warn_if_host_unverified(&self, auth: &ConnectionCredentials) -> bool {
        if self.transport.checks_host_keys() {
            return false;
        }
        warn!(
            host = %auth.host,
            "Host key checking disabled by configuration (accepted risk)"
        );
        true
    }
}

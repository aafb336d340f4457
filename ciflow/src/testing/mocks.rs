//! Doubles for the pipeline's external collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::ConnectionCredentials;
use crate::errors::{FetchError, PublishError, TestFailure};
use crate::fixtures::SecureCopyTransport;
use crate::publish::PublishClient;
use crate::runner::{AdapterOutcome, CoverageReport, TestFrameworkAdapter, TestInvocation};

/// A transport serving fixed file contents per remote path.
///
/// A copy into a directory writes `dir/<name>`; a copy to a file path writes
/// that path. Unknown remotes fail with a transport error.
#[derive(Debug, Clone, Default)]
pub struct StaticTransport {
    files: HashMap<String, Vec<(String, Vec<u8>)>>,
    attempted: Arc<Mutex<Vec<String>>>,
}

impl StaticTransport {
    /// Creates a transport serving nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `bytes` as `name` when `remote` is copied.
    #[must_use]
    pub fn with_file(
        mut self,
        remote: impl Into<String>,
        name: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        self.files
            .entry(remote.into())
            .or_default()
            .push((name.into(), bytes.to_vec()));
        self
    }

    /// Remote paths copied so far, in call order.
    #[must_use]
    pub fn attempted(&self) -> Vec<String> {
        self.attempted.lock().clone()
    }

    /// Number of copies attempted.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.attempted.lock().len()
    }
}

#[async_trait]
impl SecureCopyTransport for StaticTransport {
    async fn copy(
        &self,
        remote: &str,
        local: &Path,
        _auth: &ConnectionCredentials,
    ) -> Result<(), FetchError> {
        self.attempted.lock().push(remote.to_string());
        let files = self
            .files
            .get(remote)
            .ok_or_else(|| FetchError::transport(remote, "No such file or directory"))?;

        for (name, bytes) in files {
            let dest = if local.is_dir() {
                local.join(name)
            } else {
                local.to_path_buf()
            };
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| FetchError::transport(remote, e.to_string()))?;
            }
            tokio::fs::write(&dest, bytes)
                .await
                .map_err(|e| FetchError::transport(remote, e.to_string()))?;
        }
        Ok(())
    }
}

/// A transport that fails on one remote path and succeeds, writing nothing,
/// on every other.
#[derive(Debug, Clone)]
pub struct FailingTransport {
    failing_remote: String,
    cause: String,
    attempted: Arc<Mutex<Vec<String>>>,
}

impl FailingTransport {
    /// Creates a transport failing on `failing_remote` with `cause`.
    #[must_use]
    pub fn new(failing_remote: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            failing_remote: failing_remote.into(),
            cause: cause.into(),
            attempted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Remote paths copied so far, in call order.
    #[must_use]
    pub fn attempted(&self) -> Vec<String> {
        self.attempted.lock().clone()
    }
}

#[async_trait]
impl SecureCopyTransport for FailingTransport {
    async fn copy(
        &self,
        remote: &str,
        _local: &Path,
        _auth: &ConnectionCredentials,
    ) -> Result<(), FetchError> {
        self.attempted.lock().push(remote.to_string());
        if remote == self.failing_remote {
            Err(FetchError::transport(remote, self.cause.clone()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct Flight {
    in_flight: usize,
    peak: usize,
    completed: usize,
}

/// Decrements the in-flight count when a copy finishes or is dropped.
struct FlightGuard(Arc<Mutex<Flight>>);

impl FlightGuard {
    fn start(flight: &Arc<Mutex<Flight>>) -> Self {
        let mut f = flight.lock();
        f.in_flight += 1;
        f.peak = f.peak.max(f.in_flight);
        Self(Arc::clone(flight))
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

/// A transport that sleeps before succeeding, tracking how many copies
/// overlap.
///
/// An optional failing remote fails immediately without sleeping.
#[derive(Debug, Clone)]
pub struct SlowTransport {
    delay: Duration,
    failure: Option<(String, String)>,
    flight: Arc<Mutex<Flight>>,
}

impl SlowTransport {
    /// Creates a transport sleeping `delay` per copy.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failure: None,
            flight: Arc::new(Mutex::new(Flight::default())),
        }
    }

    /// Fails copies of `remote` at once with `cause`.
    #[must_use]
    pub fn with_failure(mut self, remote: impl Into<String>, cause: impl Into<String>) -> Self {
        self.failure = Some((remote.into(), cause.into()));
        self
    }

    /// Copies currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flight.lock().in_flight
    }

    /// Highest number of copies that ran at the same time.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.flight.lock().peak
    }

    /// Copies that slept to completion.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.flight.lock().completed
    }
}

#[async_trait]
impl SecureCopyTransport for SlowTransport {
    async fn copy(
        &self,
        remote: &str,
        _local: &Path,
        _auth: &ConnectionCredentials,
    ) -> Result<(), FetchError> {
        let _guard = FlightGuard::start(&self.flight);
        if let Some((failing, cause)) = &self.failure {
            if failing == remote {
                return Err(FetchError::transport(remote, cause.clone()));
            }
        }
        tokio::time::sleep(self.delay).await;
        self.flight.lock().completed += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Pass,
    PassWithoutCoverage,
    Exit(i32),
}

/// A test framework adapter with a scripted result.
///
/// A passing script writes a small Cobertura document to the requested
/// artifact path.
#[derive(Debug, Clone)]
pub struct ScriptedTestAdapter {
    script: Script,
    delay: Option<Duration>,
    invocations: Arc<Mutex<Vec<TestInvocation>>>,
}

impl ScriptedTestAdapter {
    fn scripted(script: Script) -> Self {
        Self {
            script,
            delay: None,
            invocations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Passes and writes coverage.
    #[must_use]
    pub fn passing() -> Self {
        Self::scripted(Script::Pass)
    }

    /// Passes but writes no coverage artifact.
    #[must_use]
    pub fn passing_without_coverage() -> Self {
        Self::scripted(Script::PassWithoutCoverage)
    }

    /// Exits with `code`.
    #[must_use]
    pub fn failing(code: i32) -> Self {
        Self::scripted(Script::Exit(code))
    }

    /// Sleeps before reporting.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Invocations received so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<TestInvocation> {
        self.invocations.lock().clone()
    }

    /// Number of times the suite was run.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.invocations.lock().len()
    }
}

#[async_trait]
impl TestFrameworkAdapter for ScriptedTestAdapter {
    async fn execute(&self, invocation: &TestInvocation) -> Result<AdapterOutcome, TestFailure> {
        self.invocations.lock().push(invocation.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let command = format!("scripted-tests {}", invocation.test_root.display());
        match self.script {
            Script::Exit(code) => Ok(AdapterOutcome {
                command,
                exit_code: Some(code),
                coverage_path: None,
            }),
            Script::PassWithoutCoverage => Ok(AdapterOutcome {
                command,
                exit_code: Some(0),
                coverage_path: None,
            }),
            Script::Pass => {
                if let Some(parent) = invocation.artifact.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await.map_err(|e| {
                            TestFailure::Spawn {
                                command: command.clone(),
                                cause: e.to_string(),
                            }
                        })?;
                    }
                }
                tokio::fs::write(&invocation.artifact, b"<coverage line-rate=\"1.0\"/>\n")
                    .await
                    .map_err(|e| TestFailure::Spawn {
                        command: command.clone(),
                        cause: e.to_string(),
                    })?;
                Ok(AdapterOutcome {
                    command,
                    exit_code: Some(0),
                    coverage_path: Some(invocation.artifact.clone()),
                })
            }
        }
    }
}

/// A publish client that records uploads and returns a fixed result.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublishClient {
    error: Option<PublishError>,
    uploads: Arc<Mutex<Vec<(PathBuf, String)>>>,
}

impl RecordingPublishClient {
    /// Accepts every upload.
    #[must_use]
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Fails every upload with `error`.
    #[must_use]
    pub fn failing(error: PublishError) -> Self {
        Self {
            error: Some(error),
            uploads: Arc::default(),
        }
    }

    /// Uploads attempted so far as `(report path, reporter id)`.
    #[must_use]
    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl PublishClient for RecordingPublishClient {
    async fn upload(&self, report: &CoverageReport, reporter_id: &str) -> Result<(), PublishError> {
        self.uploads
            .lock()
            .push((report.path.clone(), reporter_id.to_string()));
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

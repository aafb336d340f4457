//! Test execution with coverage collection.
//!
//! The test framework itself is external. [`TestRunner`] drives it through a
//! [`TestFrameworkAdapter`] and turns the adapter's exit code and artifact
//! path into either a [`CoverageReport`] or a [`TestFailure`].

use crate::errors::TestFailure;
use crate::runtime::{run_with_timeout, TimedResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Environment variable pointing the test suite at the verified fixtures.
pub const FIXTURE_DIR_ENV: &str = "CIFLOW_FIXTURE_DIR";

/// Interchange format of a coverage artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageFormat {
    /// Cobertura XML, as written by `coverage xml`.
    #[default]
    Cobertura,
    /// LCOV tracefile.
    Lcov,
}

impl CoverageFormat {
    /// MIME type used when uploading the artifact.
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Cobertura => "application/xml",
            Self::Lcov => "text/plain",
        }
    }
}

/// A machine-readable coverage artifact produced by a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Location of the artifact.
    pub path: PathBuf,
    /// Artifact format.
    pub format: CoverageFormat,
}

/// Everything the adapter needs to run the suite once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInvocation {
    /// Root of the code under coverage.
    pub source_root: PathBuf,
    /// Root of the test suite.
    pub test_root: PathBuf,
    /// Verified fixture directory.
    pub fixture_dir: PathBuf,
    /// Where the coverage artifact should be written.
    pub artifact: PathBuf,
}

/// What the adapter reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOutcome {
    /// The command line that decided the outcome, for messages.
    pub command: String,
    /// Exit code; `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Coverage artifact, if one was written.
    pub coverage_path: Option<PathBuf>,
}

/// Bridge to an external test framework.
#[async_trait]
pub trait TestFrameworkAdapter: Send + Sync {
    /// Runs the suite once.
    ///
    /// Only failures to start the framework are errors here; a failing suite
    /// is reported through [`AdapterOutcome::exit_code`].
    async fn execute(&self, invocation: &TestInvocation) -> Result<AdapterOutcome, TestFailure>;
}

/// Runs a fixed sequence of commands, e.g. `coverage run` then `coverage xml`.
///
/// Each argument may contain `{source}`, `{tests}`, `{artifact}` and
/// `{fixtures}` placeholders.
#[derive(Debug, Clone)]
pub struct CommandTestAdapter {
    commands: Vec<Vec<String>>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl Default for CommandTestAdapter {
    fn default() -> Self {
        Self::new(default_test_commands())
    }
}

/// `coverage run --source={source} -m pytest {tests}` followed by `coverage xml -o {artifact}`.
#[must_use]
pub fn default_test_commands() -> Vec<Vec<String>> {
    let to_owned = |args: &[&str]| args.iter().map(ToString::to_string).collect::<Vec<_>>();
    vec![
        to_owned(&["coverage", "run", "--source={source}", "-m", "pytest", "{tests}"]),
        to_owned(&["coverage", "xml", "-o", "{artifact}"]),
    ]
}

impl CommandTestAdapter {
    /// Creates an adapter for the given command templates.
    #[must_use]
    pub fn new(commands: Vec<Vec<String>>) -> Self {
        Self {
            commands,
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Adds environment variables for every command.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Substitutes invocation placeholders in one template.
    #[must_use]
    pub fn render(template: &[String], invocation: &TestInvocation) -> Vec<String> {
        template
            .iter()
            .map(|arg| {
                arg.replace("{source}", &invocation.source_root.to_string_lossy())
                    .replace("{tests}", &invocation.test_root.to_string_lossy())
                    .replace("{artifact}", &invocation.artifact.to_string_lossy())
                    .replace("{fixtures}", &invocation.fixture_dir.to_string_lossy())
            })
            .collect()
    }
}

#[async_trait]
impl TestFrameworkAdapter for CommandTestAdapter {
    async fn execute(&self, invocation: &TestInvocation) -> Result<AdapterOutcome, TestFailure> {
        let mut last = AdapterOutcome {
            command: String::new(),
            exit_code: Some(0),
            coverage_path: None,
        };

        for template in &self.commands {
            let argv = Self::render(template, invocation);
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            let command_line = argv.join(" ");
            info!(command = %command_line, "Running test command");

            let mut cmd = Command::new(program);
            cmd.args(args)
                .envs(&self.env)
                .env(FIXTURE_DIR_ENV, &invocation.fixture_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(true);
            if let Some(dir) = &self.working_dir {
                cmd.current_dir(dir);
            }

            let status = cmd.status().await.map_err(|e| TestFailure::Spawn {
                command: command_line.clone(),
                cause: e.to_string(),
            })?;

            last = AdapterOutcome {
                command: command_line,
                exit_code: status.code(),
                coverage_path: None,
            };
            if !status.success() {
                return Ok(last);
            }
        }

        last.coverage_path = Some(self.resolve_artifact(&invocation.artifact));
        Ok(last)
    }
}

impl CommandTestAdapter {
    fn resolve_artifact(&self, artifact: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if artifact.is_relative() => dir.join(artifact),
            _ => artifact.to_path_buf(),
        }
    }
}

/// Runs the suite and checks its result.
#[derive(Clone)]
pub struct TestRunner {
    adapter: Arc<dyn TestFrameworkAdapter>,
    artifact: PathBuf,
    format: CoverageFormat,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("artifact", &self.artifact)
            .field("format", &self.format)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TestRunner {
    /// Creates a runner writing a Cobertura report to `coverage.xml`.
    #[must_use]
    pub fn new(adapter: Arc<dyn TestFrameworkAdapter>) -> Self {
        Self {
            adapter,
            artifact: PathBuf::from("coverage.xml"),
            format: CoverageFormat::default(),
            timeout: None,
        }
    }

    /// Sets the coverage artifact location and format.
    #[must_use]
    pub fn with_artifact(mut self, path: impl Into<PathBuf>, format: CoverageFormat) -> Self {
        self.artifact = path.into();
        self.format = format;
        self
    }

    /// Sets the wall-clock budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the suite against the verified fixtures in `fixture_dir`.
    pub async fn run(
        &self,
        source_root: &Path,
        test_root: &Path,
        fixture_dir: &Path,
    ) -> Result<CoverageReport, TestFailure> {
        let invocation = TestInvocation {
            source_root: source_root.to_path_buf(),
            test_root: test_root.to_path_buf(),
            fixture_dir: fixture_dir.to_path_buf(),
            artifact: self.artifact.clone(),
        };

        let execution = self.adapter.execute(&invocation);
        let outcome = match run_with_timeout(self.timeout, execution).await {
            TimedResult::Ok(outcome) => outcome,
            TimedResult::Err(e) => return Err(e),
            TimedResult::Timeout => {
                return Err(TestFailure::Timeout {
                    timeout_secs: self.timeout.map_or(0, |t| t.as_secs()),
                })
            }
        };

        if outcome.exit_code != Some(0) {
            warn!(command = %outcome.command, code = ?outcome.exit_code, "Test suite failed");
            return Err(TestFailure::NonZeroExit {
                command: outcome.command,
                code: outcome.exit_code,
            });
        }

        let path = outcome.coverage_path.unwrap_or_else(|| self.artifact.clone());
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(TestFailure::MissingCoverage {
                path: path.display().to_string(),
            });
        }

        info!(coverage = %path.display(), "Test suite passed");
        Ok(CoverageReport {
            path,
            format: self.format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTestAdapter;

    fn invocation() -> TestInvocation {
        TestInvocation {
            source_root: PathBuf::from("src/graphnet"),
            test_root: PathBuf::from("tests"),
            fixture_dir: PathBuf::from("/tmp/stage"),
            artifact: PathBuf::from("coverage.xml"),
        }
    }

    #[test]
    fn test_render_default_commands() {
        let rendered: Vec<_> = default_test_commands()
            .iter()
            .map(|t| CommandTestAdapter::render(t, &invocation()).join(" "))
            .collect();
        assert_eq!(
            rendered,
            vec![
                "coverage run --source=src/graphnet -m pytest tests",
                "coverage xml -o coverage.xml",
            ]
        );
    }

    #[tokio::test]
    async fn test_runner_returns_report_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("coverage.xml");
        let runner = TestRunner::new(Arc::new(ScriptedTestAdapter::passing()))
            .with_artifact(&artifact, CoverageFormat::Cobertura);

        let report = runner
            .run(Path::new("src"), Path::new("tests"), dir.path())
            .await
            .unwrap();
        assert_eq!(report.path, artifact);
        assert!(artifact.exists());
    }

    #[tokio::test]
    async fn test_runner_surfaces_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TestRunner::new(Arc::new(ScriptedTestAdapter::failing(1)))
            .with_artifact(dir.path().join("coverage.xml"), CoverageFormat::Cobertura);

        let err = runner
            .run(Path::new("src"), Path::new("tests"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TestFailure::NonZeroExit { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_runner_requires_coverage_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TestRunner::new(Arc::new(ScriptedTestAdapter::passing_without_coverage()))
            .with_artifact(dir.path().join("coverage.xml"), CoverageFormat::Cobertura);

        let err = runner
            .run(Path::new("src"), Path::new("tests"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TestFailure::MissingCoverage { .. }));
    }

    #[tokio::test]
    async fn test_runner_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TestRunner::new(Arc::new(
            ScriptedTestAdapter::passing().with_delay(Duration::from_secs(5)),
        ))
        .with_timeout(Some(Duration::from_millis(20)));

        let err = runner
            .run(Path::new("src"), Path::new("tests"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TestFailure::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_adapter_runs_commands_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CommandTestAdapter::new(vec![
            vec!["sh".into(), "-c".into(), "test -n \"$CIFLOW_FIXTURE_DIR\"".into()],
            vec!["sh".into(), "-c".into(), "echo '<coverage/>' > {artifact}".into()],
        ])
        .with_working_dir(dir.path());

        let outcome = adapter.execute(&invocation()).await.unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.coverage_path, Some(dir.path().join("coverage.xml")));
        assert!(dir.path().join("coverage.xml").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_adapter_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = CommandTestAdapter::new(vec![
            vec!["sh".into(), "-c".into(), "exit 3".into()],
            vec!["sh".into(), "-c".into(), "touch {artifact}".into()],
        ])
        .with_working_dir(dir.path());

        let outcome = adapter.execute(&invocation()).await.unwrap();
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.command, "sh -c exit 3");
        assert!(!dir.path().join("coverage.xml").exists());
    }

    #[tokio::test]
    async fn test_command_adapter_reports_spawn_failure() {
        let adapter = CommandTestAdapter::new(vec![vec!["ciflow-no-such-binary-12345".into()]]);
        let err = adapter.execute(&invocation()).await.unwrap_err();
        assert!(matches!(err, TestFailure::Spawn { .. }));
    }
}

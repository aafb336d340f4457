//! Error types for the ciflow pipeline.
//!
//! Each stage owns its own error enum so that stage failures can be matched
//! precisely by the controller. [`CiflowError`] is the umbrella type used at
//! the library boundary.
//!
//! Note that a denied credential gate is not an error: it is a
//! [`GateDecision`](crate::credentials::GateDecision) that routes stages to
//! `skipped`.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for ciflow operations.
#[derive(Debug, Error)]
pub enum CiflowError {
    /// The pipeline definition could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Fixture retrieval failed.
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// Fixture verification failed.
    #[error("{0}")]
    Integrity(#[from] IntegrityError),

    /// The test suite failed.
    #[error("{0}")]
    Test(#[from] TestFailure),

    /// Coverage publishing failed.
    #[error("{0}")]
    Publish(#[from] PublishError),
}

/// Errors raised while loading or validating the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// The file that failed to load.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration parsed but violates a constraint.
    #[error("invalid config: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Errors raised by the fixture fetch stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Copying one manifest entry failed. Remaining copies are aborted.
    #[error("transport failure while fetching '{path}': {cause}")]
    TransportFailure {
        /// The remote path being copied.
        path: String,
        /// Transport-level cause.
        cause: String,
    },

    /// The fetch stage exceeded its wall-clock budget.
    #[error("fixture fetch timed out after {timeout_secs}s")]
    Timeout {
        /// The configured timeout.
        timeout_secs: u64,
    },

    /// The staging area could not be prepared.
    #[error("staging area error: {0}")]
    Staging(String),
}

impl FetchError {
    /// Creates a transport failure error.
    #[must_use]
    pub fn transport(path: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::TransportFailure {
            path: path.into(),
            cause: cause.into(),
        }
    }
}

/// Errors raised by the integrity verification stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    /// The aggregate digest of the staged fixtures differs from the expected literal.
    #[error("fixture digest mismatch: expected {expected}, actual {actual}")]
    DigestMismatch {
        /// The configured digest.
        expected: String,
        /// The digest computed over the staging area.
        actual: String,
    },

    /// No file in the staging area matched the fixture filter.
    #[error("no fixture files found under {root}")]
    NoFixturesFound {
        /// The staging root that was scanned.
        root: String,
    },

    /// A staged file could not be read.
    #[error("failed to read fixture {path}: {message}")]
    Io {
        /// The file that could not be read.
        path: String,
        /// The IO error message.
        message: String,
    },
}

impl IntegrityError {
    /// Creates a digest mismatch error.
    #[must_use]
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an IO error for a fixture path.
    #[must_use]
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors raised by the test stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TestFailure {
    /// The test framework exited unsuccessfully.
    #[error("test command `{command}` exited with {}", code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")))]
    NonZeroExit {
        /// The command that failed.
        command: String,
        /// The exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// The test framework could not be started.
    #[error("failed to start test command `{command}`: {cause}")]
    Spawn {
        /// The command that could not be started.
        command: String,
        /// The spawn error.
        cause: String,
    },

    /// The run finished but produced no coverage artifact.
    #[error("coverage artifact not found at {path}")]
    MissingCoverage {
        /// Where the artifact was expected.
        path: String,
    },

    /// The test stage exceeded its wall-clock budget.
    #[error("test run timed out after {timeout_secs}s")]
    Timeout {
        /// The configured timeout.
        timeout_secs: u64,
    },

    /// No verified fixture directory was available to test against.
    #[error("tests require a verified fixture directory")]
    FixturesUnverified,
}

/// Errors raised while publishing the coverage report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// The report could not be delivered.
    #[error("coverage upload failed: {0}")]
    Transport(String),

    /// The reporting service refused the upload.
    #[error("coverage upload rejected with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The report artifact could not be read.
    #[error("failed to read coverage report {path}: {message}")]
    Io {
        /// The artifact path.
        path: String,
        /// The IO error message.
        message: String,
    },
}

fn error_map(kind: &str, message: String) -> HashMap<String, serde_json::Value> {
    let mut map = HashMap::new();
    map.insert("type".to_string(), serde_json::json!(kind));
    map.insert("message".to_string(), serde_json::json!(message));
    map
}

impl CiflowError {
    /// Returns the error type tag used in JSON reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Fetch(FetchError::TransportFailure { .. }) => "TransportFailure",
            Self::Fetch(FetchError::Timeout { .. }) => "FetchTimeout",
            Self::Fetch(FetchError::Staging(_)) => "StagingError",
            Self::Integrity(IntegrityError::DigestMismatch { .. }) => "DigestMismatch",
            Self::Integrity(IntegrityError::NoFixturesFound { .. }) => "NoFixturesFound",
            Self::Integrity(IntegrityError::Io { .. }) => "IntegrityIoError",
            Self::Test(TestFailure::Timeout { .. }) => "TestTimeout",
            Self::Test(_) => "TestFailure",
            Self::Publish(_) => "PublishError",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = error_map(self.kind(), self.to_string());
        if let Self::Integrity(IntegrityError::DigestMismatch { expected, actual }) = self {
            map.insert("expected".to_string(), serde_json::json!(expected));
            map.insert("actual".to_string(), serde_json::json!(actual));
        }
        map
    }
}

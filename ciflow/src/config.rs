//! Pipeline definition loaded from `ciflow.toml`.
//!
//! Every section is optional and falls back to the defaults below, except
//! `[[manifest.entries]]`: a pipeline without fixtures does not validate.

use crate::credentials::CredentialKeys;
use crate::errors::ConfigError;
use crate::fixtures::{FixtureManifest, TrustConfig};
use crate::publish::DEFAULT_PUBLISH_ENDPOINT;
use crate::runner::{default_test_commands, CoverageFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name used in logs and the result report.
    #[serde(default = "default_name")]
    pub name: String,

    /// Branch that pull requests must target to run.
    #[serde(default = "default_primary_branch")]
    pub primary_branch: String,

    /// Fixtures and their expected digest.
    #[serde(default)]
    pub manifest: FixtureManifest,

    /// Secret key names for each gate.
    #[serde(default)]
    pub credentials: CredentialKeys,

    /// Fetch tuning.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Fixture host trust settings.
    #[serde(default)]
    pub trust: TrustConfig,

    /// Test run settings.
    #[serde(default)]
    pub tests: TestConfig,

    /// Coverage publishing settings.
    #[serde(default)]
    pub publish: PublishConfig,
}

fn default_name() -> String {
    "ciflow".to_string()
}

fn default_primary_branch() -> String {
    "main".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            primary_branch: default_primary_branch(),
            manifest: FixtureManifest::default(),
            credentials: CredentialKeys::default(),
            fetch: FetchConfig::default(),
            trust: TrustConfig::default(),
            tests: TestConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Sets the fixture manifest.
    #[must_use]
    pub fn with_manifest(mut self, manifest: FixtureManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.manifest.validate()?;

        if self.primary_branch.trim().is_empty() {
            return Err(ConfigError::validation("primary_branch must not be empty"));
        }
        if self.fetch.concurrency == 0 {
            return Err(ConfigError::validation("fetch.concurrency must be at least 1"));
        }
        if self.tests.commands.is_empty() || self.tests.commands.iter().any(Vec::is_empty) {
            return Err(ConfigError::validation("tests.commands must be non-empty command lines"));
        }

        let keys = &self.credentials;
        for (field, value) in [
            ("credentials.host", &keys.host),
            ("credentials.username", &keys.username),
            ("credentials.password", &keys.password),
            ("credentials.reporter_id", &keys.reporter_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::validation(format!("{field} must name a key")));
            }
        }
        let shared = keys.shared();
        if !shared.is_empty() {
            return Err(ConfigError::validation(format!(
                "credentials for remote access and publishing must use distinct keys, shared: {}",
                shared.join(", ")
            )));
        }
        Ok(())
    }
}

/// Fixture fetch tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum concurrent copies.
    pub concurrency: usize,
    /// Budget for the whole fetch; 0 disables the timeout.
    pub timeout_secs: u64,
    /// Fixed staging directory; a fresh temporary directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_secs: 600,
            staging_dir: None,
        }
    }
}

/// Test run settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Root of the code under coverage.
    pub source_root: PathBuf,
    /// Root of the test suite.
    pub test_root: PathBuf,
    /// Coverage artifact path.
    pub coverage_artifact: PathBuf,
    /// Coverage artifact format.
    pub coverage_format: CoverageFormat,
    /// Command templates, run in order.
    pub commands: Vec<Vec<String>>,
    /// Budget for the whole run; 0 disables the timeout.
    pub timeout_secs: u64,
    /// Extra environment for the test commands.
    pub env: BTreeMap<String, String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("src"),
            test_root: PathBuf::from("tests"),
            coverage_artifact: PathBuf::from("coverage.xml"),
            coverage_format: CoverageFormat::default(),
            commands: default_test_commands(),
            timeout_secs: 3600,
            env: BTreeMap::new(),
        }
    }
}

/// Coverage publishing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Endpoint template with `{commit}` and `{language}` placeholders.
    pub endpoint: String,
    /// Language reported alongside the coverage.
    pub language: String,
    /// Upload timeout; 0 disables the timeout.
    pub timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_PUBLISH_ENDPOINT.to_string(),
            language: "python".to_string(),
            timeout_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixtureEntry, DEFAULT_EXPECTED_DIGEST};
    use crate::integrity::DigestAlgorithm;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
[[manifest.entries]]
remote = "/data/graphnet/test_data/*"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = PipelineConfig::from_toml(MINIMAL).unwrap();

        assert_eq!(config.primary_branch, "main");
        assert_eq!(config.manifest.expected_digest, DEFAULT_EXPECTED_DIGEST);
        assert_eq!(config.manifest.algorithm, DigestAlgorithm::Md5);
        assert_eq!(
            config.manifest.entries,
            vec![FixtureEntry::new("/data/graphnet/test_data/*", ".")]
        );
        assert_eq!(config.credentials.remote_access(), vec!["HOST", "USERNAME", "PASSWORD"]);
        assert_eq!(config.credentials.publish(), vec!["REPORTER_ID"]);
        assert_eq!(config.fetch.concurrency, 4);
        assert_eq!(config.tests.timeout_secs, 3600);
        assert_eq!(config.publish.timeout_secs, 120);
        assert!(!config.trust.strict_host_key_checking);
    }

    #[test]
    fn test_round_trip() {
        let config = PipelineConfig::default().with_manifest(FixtureManifest::new(
            vec![FixtureEntry::new("/data/a/*", "."), FixtureEntry::new("/data/b.i3", "b/")],
            DEFAULT_EXPECTED_DIGEST,
        ));

        let text = config.to_toml().unwrap();
        let parsed = PipelineConfig::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_toml(
            r#"
name = "graphnet"
primary_branch = "master"

[manifest]
expected_digest = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
algorithm = "sha256"

[[manifest.entries]]
remote = "/data/*"

[credentials]
reporter_id = "CODACY_TOKEN"

[trust]
strict_host_key_checking = true
port = 2222

[tests]
commands = [["pytest", "{tests}"]]
"#,
        )
        .unwrap();

        assert_eq!(config.name, "graphnet");
        assert_eq!(config.primary_branch, "master");
        assert_eq!(config.manifest.algorithm, DigestAlgorithm::Sha256);
        assert_eq!(config.credentials.reporter_id, "CODACY_TOKEN");
        assert_eq!(config.credentials.host, "HOST");
        assert_eq!(config.trust.port, Some(2222));
        assert_eq!(config.tests.commands, vec![vec!["pytest", "{tests}"]]);
    }

    #[test]
    fn test_rejects_invalid_digest_literal() {
        let err = PipelineConfig::from_toml(
            r#"
[manifest]
expected_digest = "not-a-digest"

[[manifest.entries]]
remote = "/data/*"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_escaping_local_path() {
        let err = PipelineConfig::from_toml(
            r#"
[[manifest.entries]]
remote = "/data/*"
local = "../outside"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_missing_entries() {
        assert!(matches!(
            PipelineConfig::from_toml("").unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn test_rejects_bad_toml() {
        assert!(matches!(
            PipelineConfig::from_toml("[manifest").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let text = format!("{MINIMAL}\n[fetch]\nconcurrency = 0\n");
        assert!(matches!(
            PipelineConfig::from_toml(&text).unwrap_err(),
            ConfigError::Validation(_)
        ));
    }

    #[test]
    fn test_rejects_key_shared_between_gates() {
        let text = format!("{MINIMAL}\n[credentials]\nreporter_id = \"PASSWORD\"\n");
        let err = PipelineConfig::from_toml(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("PASSWORD"));
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/ciflow.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ciflow.toml"));
    }
}

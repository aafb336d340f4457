//! The fixed list of remote fixtures and the digest they must hash to.

use crate::errors::ConfigError;
use crate::integrity::DigestAlgorithm;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// Aggregate digest of the published test fixture set.
pub const DEFAULT_EXPECTED_DIGEST: &str = "80006a6d58338eb8ea153d2b7b02c0a1";

/// File names that count as fixtures: I3 files, optionally compressed.
pub const DEFAULT_FILE_FILTER: &str = r"\.i3(\.(bz2|gz|zst))?$";

/// One remote path and where it lands in the staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureEntry {
    /// Remote path expression, passed to the transport as-is.
    pub remote: String,
    /// Destination relative to the staging root. `"."` means the root itself.
    #[serde(default = "default_local")]
    pub local: String,
}

fn default_local() -> String {
    ".".to_string()
}

impl FixtureEntry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(remote: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            local: local.into(),
        }
    }

    /// Returns true if the destination names a directory rather than a file.
    #[must_use]
    pub fn targets_directory(&self) -> bool {
        self.local.is_empty() || self.local == "." || self.local.ends_with('/')
    }
}

/// The remote fixture set pinned by the pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureManifest {
    /// Entries in fetch order.
    #[serde(default)]
    pub entries: Vec<FixtureEntry>,
    /// Expected aggregate digest, hex.
    #[serde(default = "default_expected_digest")]
    pub expected_digest: String,
    /// Hash function for per-file and aggregate digests.
    #[serde(default)]
    pub algorithm: DigestAlgorithm,
    /// Regex applied to file names when enumerating the staging area.
    #[serde(default = "default_file_filter")]
    pub file_filter: String,
}

fn default_expected_digest() -> String {
    DEFAULT_EXPECTED_DIGEST.to_string()
}

fn default_file_filter() -> String {
    DEFAULT_FILE_FILTER.to_string()
}

impl Default for FixtureManifest {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            expected_digest: default_expected_digest(),
            algorithm: DigestAlgorithm::default(),
            file_filter: default_file_filter(),
        }
    }
}

impl FixtureManifest {
    /// Creates a manifest with the given entries and expected digest.
    #[must_use]
    pub fn new(entries: Vec<FixtureEntry>, expected_digest: impl Into<String>) -> Self {
        Self {
            entries,
            expected_digest: expected_digest.into(),
            ..Self::default()
        }
    }

    /// Sets the digest algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the file-name filter.
    #[must_use]
    pub fn with_file_filter(mut self, pattern: impl Into<String>) -> Self {
        self.file_filter = pattern.into();
        self
    }

    /// Compiles the file-name filter.
    pub fn file_filter(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.file_filter).map_err(|e| {
            ConfigError::validation(format!("manifest.file_filter is not a valid regex: {e}"))
        })
    }

    /// Validates the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no entries, a destination escapes the
    /// staging area, the digest literal does not fit the algorithm, or the
    /// filter does not compile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::validation("manifest has no fixture entries"));
        }

        for entry in &self.entries {
            if entry.remote.trim().is_empty() {
                return Err(ConfigError::validation("manifest entry has an empty remote path"));
            }
            let local = Path::new(&entry.local);
            let escapes = local
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(ConfigError::validation(format!(
                    "manifest entry '{}' must stay inside the staging area (got '{}')",
                    entry.remote, entry.local
                )));
            }
        }

        if !self.algorithm.is_valid_hex(&self.expected_digest) {
            return Err(ConfigError::validation(format!(
                "expected_digest '{}' is not a {}-character {} hex digest",
                self.expected_digest,
                self.algorithm.hex_len(),
                self.algorithm
            )));
        }

        self.file_filter().map(|_| ())
    }
}

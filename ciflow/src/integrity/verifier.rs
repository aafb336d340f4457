//! Aggregate-digest verification of a staging area.

use super::digest::{aggregate_digest, digest_file, DigestAlgorithm, DigestRecord};
use crate::errors::{ConfigError, IntegrityError};
use crate::fixtures::{FixtureManifest, StagingArea};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use tracing::{debug, error, info};
use walkdir::WalkDir;

/// What the verifier saw in the staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSummary {
    /// Algorithm used.
    pub algorithm: DigestAlgorithm,
    /// Aggregate digest over all records.
    pub aggregate: String,
    /// Per-file records, sorted by path.
    pub records: Vec<DigestRecord>,
}

/// Checks staged fixtures against an expected aggregate digest.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    algorithm: DigestAlgorithm,
    filter: Regex,
}

impl IntegrityVerifier {
    /// Creates a verifier.
    #[must_use]
    pub fn new(algorithm: DigestAlgorithm, filter: Regex) -> Self {
        Self { algorithm, filter }
    }

    /// Creates a verifier using the manifest's algorithm and file filter.
    pub fn for_manifest(manifest: &FixtureManifest) -> Result<Self, ConfigError> {
        Ok(Self::new(manifest.algorithm, manifest.file_filter()?))
    }

    /// Digests every matching file under `root`.
    ///
    /// Records are keyed by their path relative to `root` and returned sorted.
    pub fn collect(&self, root: &Path) -> Result<Vec<DigestRecord>, IntegrityError> {
        let mut records = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| IntegrityError::Io {
                path: e
                    .path()
                    .map_or_else(|| root.display().to_string(), |p| p.display().to_string()),
                message: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !self.filter.is_match(&name) {
                continue;
            }

            let relative = strip_root(root, entry.path());
            let digest = digest_file(self.algorithm, entry.path())
                .map_err(|e| IntegrityError::io(relative.clone(), &e))?;
            debug!(path = %relative, digest = %digest, "Fixture digested");
            records.push(DigestRecord::new(relative, digest));
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    /// Computes the aggregate digest of `root`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::NoFixturesFound`] if nothing matched the
    /// filter. The digest of an empty listing is never reported.
    pub fn compute(&self, root: &Path) -> Result<DigestSummary, IntegrityError> {
        let records = self.collect(root)?;
        if records.is_empty() {
            return Err(IntegrityError::NoFixturesFound {
                root: root.display().to_string(),
            });
        }
        Ok(DigestSummary {
            algorithm: self.algorithm,
            aggregate: aggregate_digest(self.algorithm, &records),
            records,
        })
    }

    /// Verifies the staging area against `expected_digest` (hex, any case).
    pub fn verify(
        &self,
        staging: &StagingArea,
        expected_digest: &str,
    ) -> Result<DigestSummary, IntegrityError> {
        self.verify_dir(staging.root(), expected_digest)
    }

    /// Verifies the files under `root` against `expected_digest`.
    pub fn verify_dir(
        &self,
        root: &Path,
        expected_digest: &str,
    ) -> Result<DigestSummary, IntegrityError> {
        let summary = self.compute(root)?;
        if summary.aggregate.eq_ignore_ascii_case(expected_digest.trim()) {
            info!(
                files = summary.records.len(),
                digest = %summary.aggregate,
                "Fixture digest verified"
            );
            Ok(summary)
        } else {
            error!(
                expected = %expected_digest,
                actual = %summary.aggregate,
                files = summary.records.len(),
                "Fixture digest mismatch"
            );
            Err(IntegrityError::mismatch(expected_digest, summary.aggregate))
        }
    }
}

/// Renders `path` relative to `root` with `/` separators.
fn strip_root(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::DEFAULT_FILE_FILTER;
    use crate::integrity::digest_bytes;
    use std::fs;

    fn verifier() -> IntegrityVerifier {
        IntegrityVerifier::new(DigestAlgorithm::Md5, Regex::new(DEFAULT_FILE_FILTER).unwrap())
    }

    fn stage(files: &[(&str, &[u8])]) -> StagingArea {
        let staging = StagingArea::ephemeral().unwrap();
        for (path, bytes) in files {
            let full = staging.root().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, bytes).unwrap();
        }
        staging
    }

    #[test]
    fn test_collect_strips_prefix_and_filters() {
        let staging = stage(&[
            ("upgoing/a.i3.zst", b"a"),
            ("b.i3.gz", b"b"),
            ("README.md", b"ignored"),
        ]);
        let records = verifier().collect(staging.root()).unwrap();

        let paths: Vec<_> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["b.i3.gz", "upgoing/a.i3.zst"]);
        assert_eq!(records[1].digest, "0cc175b9c0f1b6a831c399e269772661");
    }

    #[test]
    fn test_verify_accepts_matching_digest_in_any_case() {
        // printf '0cc175b9c0f1b6a831c399e269772661' | md5sum
        let staging = stage(&[("a.i3", b"a")]);
        let expected = "d7afde3e7059cd0a0fe09eec4b0008cd";

        let summary = verifier().verify(&staging, &expected.to_uppercase()).unwrap();
        assert_eq!(summary.aggregate, expected);
        assert_eq!(summary.records.len(), 1);
    }

    #[test]
    fn test_verify_reports_both_digests_on_mismatch() {
        let staging = stage(&[("a.i3", b"a")]);
        let expected = "80006a6d58338eb8ea153d2b7b02c0a1";

        let err = verifier().verify(&staging, expected).unwrap_err();
        match err {
            IntegrityError::DigestMismatch { expected: e, actual } => {
                assert_eq!(e, expected);
                assert_eq!(actual.len(), 32);
                assert_ne!(actual, expected);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_corrupted_file_changes_aggregate() {
        let good = stage(&[("a.i3", b"a"), ("b.i3", b"b")]);
        let expected = verifier().compute(good.root()).unwrap().aggregate;

        let bad = stage(&[("a.i3", b"a"), ("b.i3", b"B")]);
        let err = verifier().verify(&bad, &expected).unwrap_err();
        assert!(matches!(err, IntegrityError::DigestMismatch { .. }));
    }

    #[test]
    fn test_empty_staging_is_an_error_even_for_empty_digest() {
        let staging = stage(&[("notes.txt", b"not a fixture")]);
        let empty_digest = digest_bytes(DigestAlgorithm::Md5, b"");

        let err = verifier().verify(&staging, &empty_digest).unwrap_err();
        assert!(matches!(err, IntegrityError::NoFixturesFound { .. }));
    }

    #[test]
    fn test_aggregate_independent_of_creation_order() {
        let forward = stage(&[("x/1.i3", b"1"), ("x/2.i3", b"2"), ("y.i3", b"3")]);
        let backward = stage(&[("y.i3", b"3"), ("x/2.i3", b"2"), ("x/1.i3", b"1")]);

        assert_eq!(
            verifier().compute(forward.root()).unwrap(),
            verifier().compute(backward.root()).unwrap()
        );
    }

    #[test]
    fn test_renamed_fixtures_keep_their_aggregate() {
        let original = stage(&[("a.i3", b"a"), ("b.i3", b"b")]);
        let renamed = stage(&[("x.i3", b"a"), ("y.i3", b"b")]);

        let original = verifier().compute(original.root()).unwrap().aggregate;
        assert_eq!(original, "3bc22fb7aaebe9c8c5d7de312b876bb8");
        assert_eq!(verifier().compute(renamed.root()).unwrap().aggregate, original);
    }

    #[test]
    fn test_strip_root() {
        assert_eq!(
            strip_root(Path::new("/tmp/stage"), Path::new("/tmp/stage/sub/a.i3")),
            "sub/a.i3"
        );
    }
}

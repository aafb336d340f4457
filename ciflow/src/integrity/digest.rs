//! Per-file and aggregate fixture digests.
//!
//! The aggregate digest is the digest of the per-file hex digests,
//! concatenated with no separator in order of their path relative to the
//! staging root. Paths only decide the order; they are not hashed. In a shell:
//! `find . -type f -exec md5sum {} + | sort -k 2 | cut -d' ' -f1 | tr -d '\n' | md5sum`.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hash function used for fixture digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// MD5, 32 hex characters.
    #[default]
    Md5,
    /// SHA-256, 64 hex characters.
    Sha256,
}

impl DigestAlgorithm {
    /// Length of a hex-encoded digest.
    #[must_use]
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Returns true if `value` looks like a digest of this algorithm.
    #[must_use]
    pub fn is_valid_hex(&self, value: &str) -> bool {
        value.len() == self.hex_len() && value.chars().all(|c| c.is_ascii_hexdigit())
    }

    fn hasher(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Md5(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Digest of one staged fixture file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestRecord {
    /// Path relative to the staging root, `/`-separated.
    pub path: String,
    /// Lowercase hex digest of the file contents.
    pub digest: String,
}

impl DigestRecord {
    /// Creates a new record.
    #[must_use]
    pub fn new(path: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            digest: digest.into(),
        }
    }
}

/// Hashes an in-memory buffer.
#[must_use]
pub fn digest_bytes(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    let mut hasher = algorithm.hasher();
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// Hashes a file without loading it into memory.
pub fn digest_file(algorithm: DigestAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = algorithm.hasher();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize_hex())
}

/// Sorts records by path, the only order the aggregate is defined over.
fn sorted_by_path(records: &[DigestRecord]) -> Vec<&DigestRecord> {
    let mut sorted: Vec<&DigestRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    sorted
}

/// Renders an `md5sum`-style listing (`"{hex}  {path}\n"`, path-sorted) for display.
#[must_use]
pub fn digest_listing(records: &[DigestRecord]) -> String {
    let mut listing = String::new();
    for record in sorted_by_path(records) {
        listing.push_str(&record.digest);
        listing.push_str("  ");
        listing.push_str(&record.path);
        listing.push('\n');
    }
    listing
}

/// Computes the aggregate digest of a set of per-file records.
///
/// The result does not depend on the order of `records`, and file names
/// never enter the hash.
#[must_use]
pub fn aggregate_digest(algorithm: DigestAlgorithm, records: &[DigestRecord]) -> String {
    let mut hasher = algorithm.hasher();
    for record in sorted_by_path(records) {
        hasher.update(record.digest.as_bytes());
    }
    hasher.finalize_hex()
}

//! Remote fixture retrieval.
//!
//! This module provides:
//! - The fixture manifest pinned by the pipeline definition
//! - The run-scoped staging area
//! - The fetcher and its secure-copy transport

mod fetcher;
mod manifest;
mod staging;

pub use fetcher::{FixtureFetcher, ScpTransport, SecureCopyTransport, TrustConfig};
pub use manifest::{FixtureEntry, FixtureManifest, DEFAULT_EXPECTED_DIGEST, DEFAULT_FILE_FILTER};
pub use staging::StagingArea;

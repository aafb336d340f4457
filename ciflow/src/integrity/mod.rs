//! Fixture integrity verification.

mod digest;
mod verifier;

pub use digest::{
    aggregate_digest, digest_bytes, digest_file, digest_listing, DigestAlgorithm, DigestRecord,
};
pub use verifier::{DigestSummary, IntegrityVerifier};

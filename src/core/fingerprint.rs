//! Build fingerprinting.
//!
//! A fingerprint is the SHA-256 of a build's product discriminant. It is
//! used for history and audit. Two jobs for the same product set may both
//! be in flight, so a fingerprint is never a uniqueness guarantee.

use sha2::{Digest, Sha256};

use crate::domain::Build;

/// Hash a discriminant string (lower-case hex SHA-256)
pub fn calculate_hash(discriminant: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(discriminant.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of a build's product set
pub fn build_fingerprint(build: &Build) -> String {
    calculate_hash(&build.get_product_discriminant())
}

//! Content fingerprinting for rendered configurations.
//!
//! The digest is only an equality oracle: a changed fingerprint means the
//! configuration changed and a new configuration version must be published.

use sha2::{Digest, Sha256};

/// Compute the hex digest of a rendered configuration artifact.
pub fn fingerprint(artifact: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(artifact);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        // writing to a String cannot fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}

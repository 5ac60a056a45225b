// Hashing helpers

use sha2::{Digest, Sha256};

/// SHA-256 hex digest (lowercase).
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Short content fingerprint for log lines. Identifies a saved blob without revealing it.
pub fn blob_fingerprint(input: &[u8]) -> String {
    let mut hex = sha256_hex(input);
    hex.truncate(12);
    hex
}

//! Stable content hashing for entity identities

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the input string.
///
/// Used for canonical opportunity ids and researcher profile ids; the same
/// input always produces the same id across runs and machines.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

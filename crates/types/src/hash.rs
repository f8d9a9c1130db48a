//! SHA-256 hashing helpers.
//!
//! Every hash in the system is the lowercase hex encoding of a SHA-256
//! digest, matching the wire and storage representations.

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes to a lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)
}

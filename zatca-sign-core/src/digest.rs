//! SHA-256 helpers in the encodings the authority expects.
use std::fmt::Write;

use base64ct::{Base64, Encoding};
use sha2::{Digest, Sha256};

/// Base64 of the raw SHA-256 digest.
pub fn sha256_base64(bytes: &[u8]) -> String {
    Base64::encode_string(&Sha256::digest(bytes))
}

/// Base64 of the lowercase hex SHA-256 digest, as used for certificate and
/// signed-properties digests.
pub fn sha256_hex_base64(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    let mut hex_hash = String::with_capacity(hash.len() * 2);
    for byte in hash {
        let _ = write!(&mut hex_hash, "{byte:02x}");
    }
    Base64::encode_string(hex_hash.as_bytes())
}

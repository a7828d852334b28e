//! Checksum module for envelope integrity verification.
//!
//! xxHash3-64 over the final stored payload (after compression and encryption).
//! Detects accidental corruption; tamper resistance is the AEAD layer's job.

use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Length of a checksum token in hex characters.
pub const DIGEST_HEX_LEN: usize = 16;

/// Computes the checksum token for the given data: 16 lowercase hex characters.
pub fn digest(data: &[u8]) -> String {
    format!("{:016x}", xxh3_64(data))
}

/// Verifies that the data matches the given checksum token.
///
/// # Returns
/// `true` if the computed digest matches `token`, `false` otherwise (including
/// malformed tokens).
pub fn verify(data: &[u8], token: &str) -> bool {
    let actual = digest(data);
    let matches = actual.eq_ignore_ascii_case(token);
    if !matches {
        debug!(
            expected = token,
            actual = %actual,
            size = data.len(),
            "checksum mismatch"
        );
    }
    matches
}

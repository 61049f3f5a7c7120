//! Script fingerprints recorded alongside each applied update.

use sha2::{Digest, Sha256};

/// The function used to fingerprint update scripts.
///
/// The algorithm is part of the persisted state: switching it for a database that already has
/// recorded updates makes every recorded checksum mismatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// 32-bit rolling hash `h = 31 * h + c` over the UTF-16 code units of the script,
    /// wrapping on overflow. Equal to Java's `String.hashCode`, the value stored by
    /// pre-existing `schema_version` tables.
    #[default]
    JavaHash,
    /// The first eight bytes of the script's SHA-256 digest, read as a big-endian `i64`.
    Sha256,
}

impl ChecksumAlgorithm {
    /// Fingerprint `script` with this algorithm.
    pub fn compute(&self, script: &str) -> i64 {
        match self {
            ChecksumAlgorithm::JavaHash => i64::from(checksum(script)),
            ChecksumAlgorithm::Sha256 => {
                let digest = Sha256::digest(script.as_bytes());
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest[..8]);
                i64::from_be_bytes(prefix)
            }
        }
    }
}

/// The default script checksum. See [ChecksumAlgorithm::JavaHash].
pub fn checksum(script: &str) -> i32 {
    script
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_mul(31).wrapping_add(i32::from(unit))
        })
}

//! Payment proof: a preimage whose SHA-256 equals the bound payment hash.
//!
//! Clients send the preimage as text. When that text is valid even-length hex
//! it is hashed as the decoded bytes, otherwise as its raw UTF-8 bytes.

use sha2::{Digest, Sha256};

use crate::identifier::PAYMENT_HASH_LEN;

/// Returns the bytes a presented preimage stands for.
#[must_use]
pub fn decode(preimage: &str) -> Vec<u8> {
    if preimage.len() % 2 == 0 {
        if let Ok(bytes) = hex::decode(preimage) {
            return bytes;
        }
    }
    preimage.as_bytes().to_vec()
}

/// SHA-256 of the decoded preimage.
#[must_use]
pub fn hash(preimage: &str) -> [u8; PAYMENT_HASH_LEN] {
    Sha256::digest(decode(preimage)).into()
}

/// `true` if `preimage` hashes to `payment_hash`.
///
/// The hash bytes are compared without early exit.
#[must_use]
pub fn matches(preimage: &str, payment_hash: &[u8; PAYMENT_HASH_LEN]) -> bool {
    let computed = hash(preimage);
    computed
        .iter()
        .zip(payment_hash)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_preimage_is_decoded() {
        let preimage = "00".repeat(32);
        let expected: [u8; 32] = Sha256::digest([0u8; 32]).into();
        assert_eq!(hash(&preimage), expected);
    }

    #[test]
    fn test_non_hex_preimage_uses_text_bytes() {
        assert_eq!(decode("not-hex"), b"not-hex".to_vec());
        // odd length hex falls back to text too
        assert_eq!(decode("abc"), b"abc".to_vec());
    }

    #[test]
    fn test_matches() {
        let preimage = "ab".repeat(32);
        let payment_hash = hash(&preimage);
        assert!(matches(&preimage, &payment_hash));
        assert!(!matches(&"cd".repeat(32), &payment_hash));
    }
}

//! The fixed-layout L402 token identifier.
//!
//! ```text
//! +---------+------------------+------------------+
//! | version | subject id       | payment hash     |
//! | 2 bytes | 32 bytes         | 32 bytes         |
//! +---------+------------------+------------------+
//! ```
//!
//! The version is a big-endian `u16` and is always `0`. The subject id is
//! random and only serves to make identifiers unique. The payment hash is the
//! raw 32-byte hash of the invoice, not its hex text.

use rand::RngExt;
use rand::rng;

use crate::error::Error;

/// Length of a payment hash in bytes.
pub const PAYMENT_HASH_LEN: usize = 32;

/// Length of the random subject id in bytes.
pub const SUBJECT_ID_LEN: usize = 32;

/// Total encoded identifier length.
pub const IDENTIFIER_LEN: usize = 2 + SUBJECT_ID_LEN + PAYMENT_HASH_LEN;

/// The only identifier version this revision emits or accepts.
pub const IDENTIFIER_VERSION: u16 = 0;

/// A decoded L402 identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    subject_id: [u8; SUBJECT_ID_LEN],
    payment_hash: [u8; PAYMENT_HASH_LEN],
}

impl Identifier {
    /// Creates an identifier with a fresh random subject id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPaymentHash`] if `payment_hash` is not 32 bytes.
    pub fn new(payment_hash: &[u8]) -> Result<Self, Error> {
        let payment_hash: [u8; PAYMENT_HASH_LEN] = payment_hash
            .try_into()
            .map_err(|_| Error::InvalidPaymentHash(payment_hash.len()))?;
        let subject_id: [u8; SUBJECT_ID_LEN] = rng().random();
        Ok(Self {
            subject_id,
            payment_hash,
        })
    }

    /// Parses a 66-byte identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] on a length or version mismatch.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != IDENTIFIER_LEN {
            return Err(Error::InvalidIdentifier(format!(
                "expected {IDENTIFIER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        if version != IDENTIFIER_VERSION {
            return Err(Error::InvalidIdentifier(format!(
                "unknown version {version}"
            )));
        }
        let mut subject_id = [0u8; SUBJECT_ID_LEN];
        subject_id.copy_from_slice(&bytes[2..2 + SUBJECT_ID_LEN]);
        let mut payment_hash = [0u8; PAYMENT_HASH_LEN];
        payment_hash.copy_from_slice(&bytes[2 + SUBJECT_ID_LEN..]);
        Ok(Self {
            subject_id,
            payment_hash,
        })
    }

    /// Serializes to the 66-byte wire layout.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IDENTIFIER_LEN);
        out.extend_from_slice(&IDENTIFIER_VERSION.to_be_bytes());
        out.extend_from_slice(&self.subject_id);
        out.extend_from_slice(&self.payment_hash);
        out
    }

    /// Identifier version; always [`IDENTIFIER_VERSION`].
    #[must_use]
    pub const fn version(&self) -> u16 {
        IDENTIFIER_VERSION
    }

    /// The random subject id.
    #[must_use]
    pub const fn subject_id(&self) -> &[u8; SUBJECT_ID_LEN] {
        &self.subject_id
    }

    /// The raw payment hash.
    #[must_use]
    pub const fn payment_hash(&self) -> &[u8; PAYMENT_HASH_LEN] {
        &self.payment_hash
    }
}

/// Builds the encoded identifier for `payment_hash` in one step.
///
/// # Errors
///
/// Returns [`Error::InvalidPaymentHash`] if `payment_hash` is not 32 bytes.
pub fn encode(payment_hash: &[u8]) -> Result<Vec<u8>, Error> {
    Identifier::new(payment_hash).map(|id| id.encode())
}

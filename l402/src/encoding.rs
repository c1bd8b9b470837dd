//! Base64 encoding and decoding utilities.
//!
//! Two alphabets show up on the L402 wire: standard padded base64 wraps the
//! whole token (it must survive inside a quoted header parameter and never
//! contain `:`), while the binary fields inside the token JSON use the
//! URL-safe alphabet without padding.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD as b64, URL_SAFE_NO_PAD as b64url};
use std::fmt::Display;

/// A wrapper for base64-encoded byte data (standard alphabet, padded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Decodes the base64 string bytes to raw binary data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encodes raw binary data into base64 string bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        let encoded = b64.encode(input.as_ref());
        Self(encoded.into_bytes())
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Base64Bytes {
    fn from(slice: &[u8]) -> Self {
        Self(slice.to_vec())
    }
}

impl From<&str> for Base64Bytes {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Encodes bytes with the URL-safe alphabet, no padding.
pub fn encode_url<T: AsRef<[u8]>>(input: T) -> String {
    b64url.encode(input.as_ref())
}

/// Decodes URL-safe, unpadded base64.
///
/// # Errors
///
/// Returns an error if the input is not canonical URL-safe base64.
pub fn decode_url<T: AsRef<[u8]>>(input: T) -> Result<Vec<u8>, base64::DecodeError> {
    b64url.decode(input.as_ref())
}

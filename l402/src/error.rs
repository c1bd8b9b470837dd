//! Error types for the L402 core.

/// Errors raised while building or decoding L402 values.
///
/// Token *verification* never surfaces these: it folds every failure into an
/// invalid [`Verification`](crate::macaroon::Verification). They appear when
/// issuing tokens, parsing caveats directly, or constructing components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The payment hash was not exactly 32 bytes.
    #[error("payment hash must be 32 bytes, got {0}")]
    InvalidPaymentHash(usize),

    /// An identifier had the wrong length or an unknown version.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A caveat could not be built or parsed.
    #[error("invalid caveat: {0}")]
    InvalidCaveat(String),

    /// The token serialization could not be decoded.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Hex decoding failed.
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Setup-time configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    /// Creates an [`Error::InvalidCaveat`] from any displayable message.
    #[must_use]
    pub fn caveat(message: impl Into<String>) -> Self {
        Self::InvalidCaveat(message.into())
    }

    /// Creates an [`Error::InvalidConfiguration`] from any displayable message.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}

//! Error types for the HTTP transport layer.

/// Errors that can occur while decoding L402 HTTP headers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    /// The header does not start with the `L402 ` scheme prefix.
    #[error("expected the L402 authorization scheme")]
    UnsupportedScheme,

    /// The credential is not `<token>:<preimage>` with both parts present.
    #[error("malformed L402 credential: {0}")]
    MalformedCredential(&'static str),

    /// The challenge is missing a parameter or has a badly quoted one.
    #[error("malformed L402 challenge: {0}")]
    MalformedChallenge(&'static str),
}

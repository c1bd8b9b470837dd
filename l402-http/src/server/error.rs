//! Error types for the L402 route guard.
//!
//! Every credential problem folds into a fresh `402` challenge; only backend
//! and issuance failures surface as server errors.

use l402::backend::BackendError;

/// Why a presented credential was refused. For server-side diagnostics only;
/// clients always see the same `402` challenge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The `Authorization` value is not `L402 <token>:<preimage>`.
    #[error("malformed credential")]
    MalformedCredential,
    /// The token failed signature or structure verification.
    #[error("token failed verification: {0}")]
    SignatureInvalid(String),
    /// The token carries no usable payment hash.
    #[error("token has no payment hash")]
    MissingPaymentHash,
    /// The preimage does not hash to the bound payment hash.
    #[error("preimage does not match payment hash")]
    PreimageMismatch,
    /// The backend does not report the invoice as settled.
    #[error("invoice is not settled")]
    SettlementNotConfirmed,
    /// A caveat rejected this request.
    #[error("caveat not satisfied: {0}")]
    CaveatUnsatisfied(String),
}

/// Errors the guard cannot answer with a challenge.
#[derive(Debug, thiserror::Error)]
pub enum PaygateError {
    /// The payment backend failed while issuing or checking an invoice.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A token could not be minted for a fresh invoice.
    #[error("token issuance failed: {0}")]
    Issuance(#[from] l402::Error),
    /// The challenge cannot be carried in a `WWW-Authenticate` header.
    #[error("invalid challenge header: {0}")]
    InvalidChallenge(#[from] http::header::InvalidHeaderValue),
}

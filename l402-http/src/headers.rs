//! Encoding and decoding of the L402 HTTP headers.
//!
//! ```text
//! WWW-Authenticate: L402 macaroon="<token>", invoice="<bolt11>"
//! Authorization:    L402 <token>:<preimage>
//! ```
//!
//! Tokens are standard base64 and never contain `:`, so the credential splits
//! unambiguously.

use std::fmt;

use crate::constants::L402_SCHEME;
use crate::error::HttpError;

/// A client credential: the token it was challenged with plus the preimage
/// its wallet learned by paying.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Serialized token.
    pub token: String,
    /// Payment preimage, normally 64 hex characters.
    pub preimage: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("preimage", &"<redacted>")
            .finish()
    }
}

/// The two parameters of a `WWW-Authenticate: L402` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeHeader {
    /// Serialized token.
    pub macaroon: String,
    /// BOLT-11 payment request.
    pub invoice: String,
}

fn scheme_prefix() -> String {
    format!("{L402_SCHEME} ")
}

/// Encodes the `WWW-Authenticate` challenge value.
#[must_use]
pub fn encode_challenge(token: &str, invoice: &str) -> String {
    format!("{L402_SCHEME} macaroon=\"{token}\", invoice=\"{invoice}\"")
}

/// Decodes a `WWW-Authenticate` challenge value. Parameter order is free.
///
/// # Errors
///
/// Returns [`HttpError::UnsupportedScheme`] for another scheme, or
/// [`HttpError::MalformedChallenge`] if either parameter is missing or
/// not a quoted string.
pub fn parse_challenge(value: &str) -> Result<ChallengeHeader, HttpError> {
    let params = value
        .strip_prefix(scheme_prefix().as_str())
        .ok_or(HttpError::UnsupportedScheme)?;

    let mut macaroon = None;
    let mut invoice = None;
    for param in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, quoted) = param
            .split_once('=')
            .ok_or(HttpError::MalformedChallenge("parameter without value"))?;
        let unquoted = quoted
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .ok_or(HttpError::MalformedChallenge("unquoted parameter value"))?;
        match name.trim() {
            "macaroon" => macaroon = Some(unquoted.to_owned()),
            "invoice" => invoice = Some(unquoted.to_owned()),
            _ => {}
        }
    }

    match (macaroon, invoice) {
        (Some(macaroon), Some(invoice)) if !macaroon.is_empty() && !invoice.is_empty() => {
            Ok(ChallengeHeader { macaroon, invoice })
        }
        _ => Err(HttpError::MalformedChallenge(
            "macaroon and invoice are both required",
        )),
    }
}

/// Encodes an `Authorization` credential value.
#[must_use]
pub fn encode_authorization(token: &str, preimage: &str) -> String {
    format!("{L402_SCHEME} {token}:{preimage}")
}

/// Decodes an `Authorization` credential value.
///
/// The value must start with exactly `L402 ` and the remainder must contain
/// exactly one `:` with non-empty text on both sides.
///
/// # Errors
///
/// Returns [`HttpError::UnsupportedScheme`] or [`HttpError::MalformedCredential`].
pub fn parse_authorization(value: &str) -> Result<Credential, HttpError> {
    let credential = value
        .strip_prefix(scheme_prefix().as_str())
        .ok_or(HttpError::UnsupportedScheme)?;
    let (token, preimage) = credential
        .split_once(':')
        .ok_or(HttpError::MalformedCredential("missing ':' separator"))?;
    if preimage.contains(':') {
        return Err(HttpError::MalformedCredential("more than one ':' separator"));
    }
    if token.is_empty() || preimage.is_empty() {
        return Err(HttpError::MalformedCredential("empty token or preimage"));
    }
    Ok(Credential {
        token: token.to_owned(),
        preimage: preimage.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_format() {
        assert_eq!(
            encode_challenge("dG9r", "lnbc1"),
            r#"L402 macaroon="dG9r", invoice="lnbc1""#
        );
    }

    #[test]
    fn test_parse_challenge() {
        let parsed = parse_challenge(&encode_challenge("dG9r", "lnbc1")).unwrap();
        assert_eq!(parsed.macaroon, "dG9r");
        assert_eq!(parsed.invoice, "lnbc1");

        let swapped = parse_challenge(r#"L402 invoice="lnbc1", macaroon="dG9r""#).unwrap();
        assert_eq!(swapped, parsed);
    }

    #[test]
    fn test_parse_challenge_rejects_incomplete() {
        assert_eq!(
            parse_challenge(r#"Bearer realm="x""#),
            Err(HttpError::UnsupportedScheme)
        );
        assert!(parse_challenge(r#"L402 macaroon="dG9r""#).is_err());
        assert!(parse_challenge(r#"L402 macaroon=dG9r, invoice="lnbc1""#).is_err());
        assert!(parse_challenge(r#"L402 macaroon="", invoice="lnbc1""#).is_err());
    }

    #[test]
    fn test_parse_authorization() {
        let credential = parse_authorization("L402 dG9rZW4=:00ff").unwrap();
        assert_eq!(credential.token, "dG9rZW4=");
        assert_eq!(credential.preimage, "00ff");
        assert_eq!(
            parse_authorization(&encode_authorization("dG9rZW4=", "00ff")).unwrap(),
            credential
        );
    }

    #[test]
    fn test_parse_authorization_rejects_malformed() {
        for value in [
            "L402 abc",
            "L402 :abc",
            "L402 abc:",
            "L402 a:b:c",
            "L402 ",
            "l402 abc:def",
            "L402abc:def",
            "Bearer abc:def",
            "LSAT abc:def",
            "",
        ] {
            assert!(parse_authorization(value).is_err(), "{value:?} accepted");
        }
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = parse_authorization("L402 c2VjcmV0:deadbeef").unwrap();
        let debug = format!("{credential:?}");
        assert!(!debug.contains("c2VjcmV0"));
        assert!(!debug.contains("deadbeef"));
    }
}

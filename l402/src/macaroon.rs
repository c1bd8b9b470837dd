//! Macaroon-style tokens: issuance, attenuation, serialization and verification.
//!
//! # Signature chain
//!
//! ```text
//! k      = HMAC-SHA256("macaroons-key-generator", secret)
//! sig_0  = HMAC-SHA256(k, identifier)
//! sig_i  = HMAC-SHA256(sig_{i-1}, caveat_i)      // caveat_i = "<kind> = <value>"
//! ```
//!
//! Anyone holding a token can append a caveat (the new signature only needs the
//! old one), but nobody without the secret can drop or edit one. Reordering
//! caveats changes the chain and invalidates the token.
//!
//! # Serialization
//!
//! A token travels as standard base64 over compact JSON:
//!
//! ```json
//! {"v":2,"l":"https://localhost:3000","i64":"<b64url>","c":[{"i":"payment-hash = ..."}],"s64":"<b64url>"}
//! ```
//!
//! Binary fields use unpadded URL-safe base64. Unknown fields and any version
//! other than `2` are rejected.

use std::fmt;
use std::time::Duration;

use hmac::{Hmac, Mac};
use rand::RngExt;
use rand::rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::caveat::{self, Caveat};
use crate::encoding::{self, Base64Bytes};
use crate::error::Error;
use crate::identifier::{Identifier, PAYMENT_HASH_LEN};
use crate::timestamp::UnixMillis;

type HmacSha256 = Hmac<Sha256>;

/// Key-derivation tag applied to the root secret.
const KEY_GENERATOR: &[u8] = b"macaroons-key-generator";

/// JSON serialization format version.
pub const FORMAT_VERSION: u8 = 2;

/// Minimum length of a signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Default anchor location.
pub const DEFAULT_LOCATION: &str = "https://localhost:3000";

/// Default token validity window (one day).
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(86_400);

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any size");
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn root_signature(secret: &[u8], identifier: &[u8]) -> [u8; 32] {
    hmac(&hmac(KEY_GENERATOR, secret), identifier)
}

/// A signed token.
#[derive(Clone, PartialEq, Eq)]
pub struct Macaroon {
    location: String,
    identifier: Vec<u8>,
    caveats: Vec<Caveat>,
    signature: [u8; 32],
}

// Signature bytes are a bearer secret once combined with the caveats.
impl fmt::Debug for Macaroon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macaroon")
            .field("location", &self.location)
            .field("identifier", &hex::encode(&self.identifier))
            .field("caveats", &self.caveats)
            .field("signature", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireMacaroon {
    v: u8,
    l: String,
    #[serde(rename = "i64")]
    identifier: String,
    c: Vec<WireCaveat>,
    #[serde(rename = "s64")]
    signature: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireCaveat {
    i: String,
}

impl Macaroon {
    /// Creates an unrestricted token signed with `secret`.
    #[must_use]
    pub fn new(location: impl Into<String>, secret: &[u8], identifier: Vec<u8>) -> Self {
        let signature = root_signature(secret, &identifier);
        Self {
            location: location.into(),
            identifier,
            caveats: Vec::new(),
            signature,
        }
    }

    /// Appends a caveat, advancing the signature chain. Needs no secret.
    pub fn add_caveat(&mut self, caveat: Caveat) {
        self.signature = hmac(&self.signature, caveat.to_string().as_bytes());
        self.caveats.push(caveat);
    }

    /// Builder-style [`Macaroon::add_caveat`].
    #[must_use]
    pub fn with_caveat(mut self, caveat: Caveat) -> Self {
        self.add_caveat(caveat);
        self
    }

    /// The anchor location. Not covered by the signature.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The raw identifier bytes.
    #[must_use]
    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    /// Caveats in chain order.
    #[must_use]
    pub fn caveats(&self) -> &[Caveat] {
        &self.caveats
    }

    /// Replays the signature chain under `secret` and compares in constant time.
    #[must_use]
    pub fn verify_signature(&self, secret: &[u8]) -> bool {
        let Some((last, rest)) = self.caveats.split_last() else {
            return mac_matches(&hmac(KEY_GENERATOR, secret), &self.identifier, &self.signature);
        };
        let running = rest.iter().fold(root_signature(secret, &self.identifier), |sig, c| {
            hmac(&sig, c.to_string().as_bytes())
        });
        mac_matches(&running, last.to_string().as_bytes(), &self.signature)
    }

    /// Encodes the token for transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if JSON encoding fails.
    pub fn serialize(&self) -> Result<String, Error> {
        let wire = WireMacaroon {
            v: FORMAT_VERSION,
            l: self.location.clone(),
            identifier: encoding::encode_url(&self.identifier),
            c: self
                .caveats
                .iter()
                .map(|c| WireCaveat { i: c.to_string() })
                .collect(),
            signature: encoding::encode_url(self.signature),
        };
        let json = serde_json::to_vec(&wire)?;
        Ok(Base64Bytes::encode(json).to_string())
    }

    /// Decodes a token produced by [`Macaroon::serialize`].
    ///
    /// This checks structure only; use [`verify`] to check the signature.
    ///
    /// # Errors
    ///
    /// Returns an error on bad base64, bad JSON, an unknown format version,
    /// a malformed caveat, or a signature of the wrong length.
    pub fn deserialize(token: &str) -> Result<Self, Error> {
        let json = Base64Bytes::from(token).decode()?;
        let wire: WireMacaroon = serde_json::from_slice(&json)?;
        if wire.v != FORMAT_VERSION {
            return Err(Error::InvalidToken(format!("unsupported version {}", wire.v)));
        }
        let identifier = encoding::decode_url(&wire.identifier)?;
        let signature: [u8; 32] = encoding::decode_url(&wire.signature)?
            .try_into()
            .map_err(|_| Error::InvalidToken("signature must be 32 bytes".into()))?;
        let caveats = wire
            .c
            .iter()
            .map(|c| Caveat::parse(&c.i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            location: wire.l,
            identifier,
            caveats,
            signature,
        })
    }
}

fn mac_matches(key: &[u8], data: &[u8], expected: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any size");
    mac.update(data);
    mac.verify_slice(expected).is_ok()
}

/// Result of [`issue`]: the transport form plus the structured token.
#[derive(Debug, Clone)]
pub struct Issued {
    /// Base64 serialization, as placed in the `WWW-Authenticate` header.
    pub token: String,
    /// The structured token.
    pub macaroon: Macaroon,
}

/// Issues a token bound to `payment_hash`.
///
/// Caveats are appended in a fixed order: `payment-hash`, `expiration`, then
/// `caveats` as given.
///
/// # Errors
///
/// Returns [`Error::InvalidPaymentHash`] if the hash is not 32 bytes, or
/// [`Error::InvalidCaveat`] if `caveats` already contains a payment-hash or
/// expiration caveat.
pub fn issue(
    location: &str,
    secret: &[u8],
    payment_hash: &[u8],
    expires_at: UnixMillis,
    caveats: &[Caveat],
) -> Result<Issued, Error> {
    let identifier = Identifier::new(payment_hash)?;
    if let Some(c) = caveats
        .iter()
        .find(|c| matches!(c, Caveat::PaymentHash(_) | Caveat::Expiration(_)))
    {
        return Err(Error::caveat(format!(
            "{} caveats are added by the issuer",
            c.kind()
        )));
    }
    let mut macaroon = Macaroon::new(location, secret, identifier.encode())
        .with_caveat(Caveat::payment_hash(*identifier.payment_hash()))
        .with_caveat(Caveat::expiration(expires_at));
    for caveat in caveats {
        macaroon.add_caveat(caveat.clone());
    }
    let token = macaroon.serialize()?;
    Ok(Issued { token, macaroon })
}

/// Why a token failed verification. For server-side diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReason {
    /// The serialization could not be decoded.
    #[error("malformed token: {0}")]
    Malformed(String),
    /// The token names a different location than the verifier.
    #[error("location mismatch")]
    LocationMismatch,
    /// The signature chain does not match under the given secret.
    #[error("signature mismatch")]
    SignatureMismatch,
    /// A required caveat kind is absent.
    #[error("missing {0} caveat")]
    MissingCaveat(&'static str),
    /// A caveat kind that must be unique appears more than once.
    #[error("duplicate {0} caveat")]
    DuplicateCaveat(&'static str),
}

/// Outcome of [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Whether the token is authentic and structurally complete.
    pub valid: bool,
    /// The token's caveats, in chain order. Empty when the token did not decode.
    pub caveats: Vec<Caveat>,
    /// Why the token is invalid, when it is.
    pub reason: Option<InvalidReason>,
}

impl Verification {
    fn invalid(reason: InvalidReason, caveats: Vec<Caveat>) -> Self {
        Self {
            valid: false,
            caveats,
            reason: Some(reason),
        }
    }

    /// The bound payment hash, if a payment-hash caveat is present.
    #[must_use]
    pub fn payment_hash(&self) -> Option<[u8; PAYMENT_HASH_LEN]> {
        self.caveats.iter().find_map(|c| match c {
            Caveat::PaymentHash(hash) => Some(*hash),
            _ => None,
        })
    }

    /// The deadline, if an expiration caveat is present.
    #[must_use]
    pub fn expiration(&self) -> Option<UnixMillis> {
        self.caveats.iter().find_map(|c| match c {
            Caveat::Expiration(deadline) => Some(*deadline),
            _ => None,
        })
    }
}

/// Verifies a serialized token against `secret`.
///
/// Never fails: a malformed token, a wrong secret, or a missing or duplicated
/// payment-hash/expiration caveat all produce `valid == false`.
#[must_use]
pub fn verify(token: &str, secret: &[u8]) -> Verification {
    match Macaroon::deserialize(token) {
        Ok(macaroon) => verify_macaroon(macaroon, secret),
        Err(err) => Verification::invalid(InvalidReason::Malformed(err.to_string()), Vec::new()),
    }
}

fn verify_macaroon(macaroon: Macaroon, secret: &[u8]) -> Verification {
    let signature_ok = macaroon.verify_signature(secret);
    let caveats = macaroon.caveats;
    if !signature_ok {
        return Verification::invalid(InvalidReason::SignatureMismatch, caveats);
    }
    for kind in [caveat::PAYMENT_HASH, caveat::EXPIRATION] {
        match caveats.iter().filter(|c| c.kind() == kind).count() {
            0 => return Verification::invalid(InvalidReason::MissingCaveat(kind), caveats),
            1 => {}
            _ => return Verification::invalid(InvalidReason::DuplicateCaveat(kind), caveats),
        }
    }
    Verification {
        valid: true,
        caveats,
        reason: None,
    }
}

/// Issues and verifies tokens for one location under one secret.
#[derive(Clone)]
pub struct Minter {
    location: String,
    secret: Vec<u8>,
    validity: Duration,
}

impl fmt::Debug for Minter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Minter")
            .field("location", &self.location)
            .field("secret", &"<redacted>")
            .field("validity", &self.validity)
            .finish()
    }
}

impl Minter {
    /// Creates a minter with the default validity window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `secret` is shorter than
    /// [`MIN_SECRET_LEN`] or `location` is empty.
    pub fn new(location: impl Into<String>, secret: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let location = location.into();
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::config(format!(
                "signing secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        if location.is_empty() {
            return Err(Error::config("location must not be empty"));
        }
        Ok(Self {
            location,
            secret,
            validity: DEFAULT_VALIDITY,
        })
    }

    /// Generates a random secret of [`MIN_SECRET_LEN`] bytes.
    #[must_use]
    pub fn generate_secret() -> [u8; MIN_SECRET_LEN] {
        rng().random()
    }

    /// Sets how long issued tokens stay valid.
    #[must_use]
    pub const fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// The anchor location.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The signing secret.
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// The validity window.
    #[must_use]
    pub const fn validity(&self) -> Duration {
        self.validity
    }

    /// Issues a token expiring one validity window after `now`.
    ///
    /// # Errors
    ///
    /// See [`issue`].
    pub fn issue(
        &self,
        payment_hash: &[u8],
        now: UnixMillis,
        caveats: &[Caveat],
    ) -> Result<Issued, Error> {
        issue(
            &self.location,
            &self.secret,
            payment_hash,
            now + self.validity,
            caveats,
        )
    }

    /// Verifies a token, additionally requiring it to name this minter's location.
    #[must_use]
    pub fn verify(&self, token: &str) -> Verification {
        self.verify_with_secret(token, &self.secret)
    }

    /// Like [`Minter::verify`], but checks the chain under `secret`.
    ///
    /// Used when a session records the key a particular token was signed with.
    #[must_use]
    pub fn verify_with_secret(&self, token: &str, secret: &[u8]) -> Verification {
        match Macaroon::deserialize(token) {
            Ok(m) if m.location != self.location => {
                Verification::invalid(InvalidReason::LocationMismatch, m.caveats)
            }
            Ok(m) => verify_macaroon(m, secret),
            Err(err) => {
                Verification::invalid(InvalidReason::Malformed(err.to_string()), Vec::new())
            }
        }
    }
}

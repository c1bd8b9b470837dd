#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the L402 authorization protocol.
//!
//! L402 pairs a macaroon-style bearer token with a Lightning invoice. A server
//! answers an unauthenticated request with `402 Payment Required`, a signed token
//! and an invoice; the client pays, learns the payment preimage, and retries
//! with `Authorization: L402 <token>:<preimage>`.
//!
//! This crate holds the transport-agnostic pieces of that exchange. HTTP
//! integration lives in `l402-http`.
//!
//! # Modules
//!
//! - [`identifier`] - Fixed 66-byte token identifier (version, subject id, payment hash)
//! - [`caveat`] - Typed restrictions, request context and evaluator registry
//! - [`macaroon`] - Token issuance, attenuation, serialization and verification
//! - [`preimage`] - Payment-proof check (preimage hash against payment hash)
//! - [`session`] - TTL-bounded challenge/session store
//! - [`backend`] - Payment backend capability and an in-memory mock
//! - [`encoding`] - Base64 helpers shared by the wire formats
//! - [`timestamp`] - Millisecond Unix timestamps
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod backend;
pub mod caveat;
pub mod encoding;
pub mod error;
pub mod identifier;
pub mod macaroon;
pub mod preimage;
pub mod session;
pub mod timestamp;

pub use caveat::{Caveat, CaveatRegistry, RequestContext, UnknownCaveatPolicy};
pub use error::Error;
pub use identifier::Identifier;
pub use macaroon::{Issued, Macaroon, Minter, Verification};
pub use session::{Session, SessionStore};
pub use timestamp::UnixMillis;

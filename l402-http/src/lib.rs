#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport layer for the L402 authorization protocol.
//!
//! Provides the `WWW-Authenticate` / `Authorization` header codec, constants,
//! and (feature-gated) the tower middleware that guards routes and an LND REST
//! payment backend.
//!
//! # Modules
//!
//! - [`constants`]: header names, scheme, status code, default paths
//! - [`headers`]: challenge and credential header encoding/decoding
//! - [`error`]: header codec errors
//! - [`server`]: route guard middleware and challenge endpoint (feature: `server`)
//! - [`lnd`]: LND REST payment backend (feature: `lnd`)

pub mod constants;
pub mod error;
pub mod headers;

#[cfg(feature = "lnd")]
pub mod lnd;
#[cfg(feature = "server")]
pub mod server;

pub use error::HttpError;
pub use headers::{ChallengeHeader, Credential};

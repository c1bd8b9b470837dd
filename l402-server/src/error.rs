//! Error types for the paywall server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use l402_http::lnd::LndError;

/// Errors raised while loading [`ServerConfig`](crate::config::ServerConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid TOML or has unknown keys.
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// `secret_key` is unset or references an unset environment variable.
    #[error("secret_key is not set (missing env var?)")]
    MissingSecret,
    /// `secret_key` is not usable as a signing secret.
    #[error("invalid secret_key: {0}")]
    InvalidSecret(String),
}

/// Errors that can occur in the paywall server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The paywall rejected its configuration.
    #[error("invalid paywall configuration: {0}")]
    L402(#[from] l402::Error),

    /// The LND backend could not be constructed.
    #[error("invalid LND backend: {0}")]
    Lnd(#[from] LndError),

    /// Binding or serving failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No resource is served at this path.
    #[error("no resource at {0}")]
    NotFound(String),

    /// The mock backend has no invoice with this payment hash.
    #[error("unknown invoice {0}")]
    UnknownInvoice(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) | Self::UnknownInvoice(_) => StatusCode::NOT_FOUND,
            Self::Config(_) | Self::L402(_) | Self::Lnd(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

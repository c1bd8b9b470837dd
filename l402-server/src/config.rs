//! Paywall server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 3000
//! location = "https://api.example.com"
//! price = 100
//! secret_key = "$L402_SECRET_KEY"
//! routes = ["/protected/*"]
//!
//! [caveats]
//! methods = ["GET"]
//!
//! [backend]
//! kind = "lnd"
//! url = "https://localhost:8080"
//! macaroon = "${LND_MACAROON_HEX}"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to the configuration file (default: `config.toml`)
//! - `HOST`: override server bind address
//! - `PORT`: override server port
//! - any variable referenced by `$VAR` in the file

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use l402::caveat::Caveat;
use l402::macaroon::{DEFAULT_LOCATION, MIN_SECRET_LEN};
use l402_http::constants::DEFAULT_CHALLENGE_PATH;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `3000`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Location embedded in issued tokens.
    #[serde(default = "default_location")]
    pub location: String,

    /// Price per access, in the backend's smallest unit (default: `100`).
    #[serde(default = "default_price")]
    pub price: u64,

    /// Memo attached to every invoice.
    #[serde(default)]
    pub memo: Option<String>,

    /// Token validity window in seconds (default: one day).
    #[serde(default = "default_validity_secs")]
    pub validity_secs: u64,

    /// Session lifetime in seconds (default: one hour).
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// How often expired sessions are swept, in seconds (default: `60`).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Hex-encoded signing secret, at least 32 bytes. Required.
    #[serde(default)]
    pub secret_key: String,

    /// Path of the challenge polling endpoint.
    #[serde(default = "default_challenge_path")]
    pub challenge_path: String,

    /// Protected route globs (default: `["/protected/*"]`).
    #[serde(default = "default_routes")]
    pub routes: Vec<String>,

    /// Caveats attached to every issued token.
    #[serde(default)]
    pub caveats: CaveatConfig,

    /// Payment backend.
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Restrictions attached to every issued token. Empty lists add nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaveatConfig {
    /// Glob the request path must match.
    #[serde(default)]
    pub path: Option<String>,
    /// Allowed request methods.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Allowed `Origin` header values.
    #[serde(default)]
    pub origins: Vec<String>,
    /// Allowed client addresses, read from `X-Forwarded-For`.
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Which payment backend issues invoices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-memory invoices, settled through `POST /mock/invoices/{hash}/settle`.
    #[default]
    Mock,
    /// An LND node's REST API.
    Lnd {
        /// REST endpoint, e.g. `https://localhost:8080`.
        url: String,
        /// Hex-encoded invoice macaroon.
        #[serde(default)]
        macaroon: Option<String>,
        /// Per-request timeout in seconds (default: `10`).
        #[serde(default = "default_lnd_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    3000
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_owned()
}

const fn default_price() -> u64 {
    100
}

const fn default_validity_secs() -> u64 {
    86_400
}

const fn default_session_ttl_secs() -> u64 {
    3_600
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_challenge_path() -> String {
    DEFAULT_CHALLENGE_PATH.to_owned()
}

fn default_routes() -> Vec<String> {
    vec!["/protected/*".to_owned()]
}

const fn default_lnd_timeout_secs() -> u64 {
    10
}

impl ServerConfig {
    /// Loads configuration from `path`. A missing file yields the defaults.
    ///
    /// `$VAR` / `${VAR}` references are expanded from the process environment
    /// before parsing, then `HOST` and `PORT` override the file values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };
        let mut config = Self::from_toml(&content)?;

        if let Some(host) = std::env::var("HOST").ok().and_then(|h| h.parse().ok()) {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        Ok(config)
    }

    /// Parses configuration text after environment expansion.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] on invalid TOML or unknown keys, or
    /// [`ConfigError::Invalid`] if `sweep_interval_secs` is zero.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(&expand_env_vars(content))?;
        if config.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be greater than zero".to_owned(),
            ));
        }
        Ok(config)
    }

    /// Decodes the signing secret.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] if unset or still an unexpanded
    /// `$VAR`, or [`ConfigError::InvalidSecret`] if it is not hex of at least
    /// 32 bytes.
    pub fn secret(&self) -> Result<Vec<u8>, ConfigError> {
        let key = self.secret_key.trim();
        if key.is_empty() || key.starts_with('$') {
            return Err(ConfigError::MissingSecret);
        }
        let secret = hex::decode(key).map_err(|e| ConfigError::InvalidSecret(e.to_string()))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidSecret(format!(
                "expected at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        Ok(secret)
    }

    /// Builds the caveats attached to every token, in a fixed order.
    ///
    /// # Errors
    ///
    /// Returns [`l402::Error::InvalidCaveat`] for an unparseable value.
    pub fn caveats(&self) -> Result<Vec<Caveat>, l402::Error> {
        let CaveatConfig {
            path,
            methods,
            origins,
            ips,
        } = &self.caveats;
        let mut caveats = Vec::new();
        if let Some(path) = path {
            caveats.push(Caveat::path(path.clone())?);
        }
        if !methods.is_empty() {
            caveats.push(Caveat::methods(methods)?);
        }
        if !origins.is_empty() {
            caveats.push(Caveat::origins(origins)?);
        }
        if !ips.is_empty() {
            caveats.push(Caveat::ips(ips)?);
        }
        Ok(caveats)
    }

    /// Token validity window.
    #[must_use]
    pub const fn validity(&self) -> Duration {
        Duration::from_secs(self.validity_secs)
    }

    /// Session lifetime.
    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Sweeper period.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("environment variable pattern is valid")
});

/// Expands `$VAR` and `${VAR}` from the environment. Unset variables stay as written.
fn expand_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_else(|_| caps[0].to_owned())
        })
        .into_owned()
}

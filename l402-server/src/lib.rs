//! L402 paywall server.
//!
//! Serves a JSON resource under the configured protected routes and charges
//! for it with Lightning invoices, using either an in-memory mock backend or
//! an LND node.
//!
//! # Modules
//!
//! - [`config`]: Server configuration with environment variable expansion
//! - [`error`]: Server error types
//! - [`handlers`]: Axum route handlers

pub mod config;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::Router;
use l402::backend::{MockBackend, PaymentBackend};
use l402::session::SessionStore;
use l402_http::lnd::LndBackend;
use l402_http::server::{L402Middleware, challenge_router};

use crate::config::{BackendConfig, ServerConfig};
use crate::error::ServerError;
use crate::handlers::{SharedPaygate, health_router, mock_router, protected_resource};

/// An assembled application.
#[derive(Debug)]
pub struct App {
    /// Router serving health, challenge, mock wallet and guarded routes.
    pub router: Router,
    /// Session store shared with the paywall, for the sweeper.
    pub store: Arc<SessionStore>,
}

/// Wires the paywall described by `config` into a router.
///
/// # Errors
///
/// Returns [`ServerError`] if the secret, caveats, routes or backend URL are
/// unusable.
pub fn build_app(config: &ServerConfig) -> Result<App, ServerError> {
    let secret = config.secret()?;
    let (backend, mock): (Arc<dyn PaymentBackend>, Option<Arc<MockBackend>>) =
        match &config.backend {
            BackendConfig::Mock => {
                tracing::warn!("Using the mock payment backend; invoices are settled over HTTP");
                let mock = Arc::new(MockBackend::new());
                (Arc::clone(&mock) as Arc<dyn PaymentBackend>, Some(mock))
            }
            BackendConfig::Lnd {
                url,
                macaroon,
                timeout_secs,
            } => {
                let mut lnd = LndBackend::try_from(url.as_str())?
                    .with_timeout(std::time::Duration::from_secs(*timeout_secs));
                if let Some(macaroon) = macaroon.as_deref().filter(|m| !m.starts_with('$')) {
                    lnd = lnd.with_macaroon(macaroon);
                } else {
                    tracing::warn!("LND macaroon not set; requests are sent unauthenticated");
                }
                tracing::info!(url = %lnd.base_url(), "Using the LND payment backend");
                (Arc::new(lnd) as Arc<dyn PaymentBackend>, None)
            }
        };

    let store = Arc::new(SessionStore::new(config.session_ttl()));
    let mut builder = L402Middleware::builder(backend)
        .with_secret(secret)
        .with_location(config.location.clone())
        .with_price(config.price)
        .with_validity(config.validity())
        .with_routes(config.routes.iter().cloned())
        .with_challenge_path(config.challenge_path.clone())
        .with_session_store(Arc::clone(&store));
    if let Some(memo) = &config.memo {
        builder = builder.with_memo(memo.clone());
    }
    for caveat in config.caveats()? {
        builder = builder.with_caveat(caveat);
    }
    let middleware = builder.build()?;

    let paygate: SharedPaygate = Arc::clone(middleware.paygate());
    let guarded = Router::new()
        .fallback(protected_resource)
        .with_state(Arc::clone(&paygate))
        .layer(middleware);

    let mut router = health_router().merge(challenge_router(paygate));
    if let Some(mock) = mock {
        router = router.merge(mock_router(mock));
    }
    let router = router.merge(guarded);

    Ok(App { router, store })
}

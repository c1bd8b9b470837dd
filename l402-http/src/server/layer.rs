//! Tower middleware for enforcing [L402](https://docs.lightning.engineering/the-lightning-network/l402)
//! payments on protected routes.
//!
//! Requests to paths matched by the route policy must carry
//! `Authorization: L402 <token>:<preimage>`. Anything else is answered with
//! `402 Payment Required` and a fresh (or still-live cached) challenge.
//!
//! ## Configuration Notes
//!
//! - **[`L402MiddlewareBuilder::with_secret`]** sets the signing key. Required, at least 32 bytes.
//! - **[`L402MiddlewareBuilder::with_price`]** sets the amount each invoice is created for.
//! - **[`L402MiddlewareBuilder::with_route`]** adds a protected `*` glob. Without routes nothing is guarded.
//! - **[`L402MiddlewareBuilder::with_caveat`]** attaches a caveat to every issued token.
//! - **[`L402MiddlewareBuilder::with_registry`]** supplies predicates for custom caveat kinds.
//! - **[`L402MiddlewareBuilder::with_session_store`]** shares a store, e.g. to run its sweeper.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum_core::extract::Request;
use axum_core::response::Response;
use l402::backend::PaymentBackend;
use l402::caveat::{Caveat, CaveatRegistry};
use l402::macaroon::{DEFAULT_LOCATION, DEFAULT_VALIDITY, Minter};
use l402::session::SessionStore;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use super::paygate::Paygate;
use super::policy::RoutePolicy;
use crate::constants::DEFAULT_CHALLENGE_PATH;

/// Configures an [`L402Middleware`].
#[allow(missing_debug_implementations)] // generic backend may not implement Debug
pub struct L402MiddlewareBuilder<B> {
    backend: B,
    secret: Option<Vec<u8>>,
    location: String,
    price: u64,
    validity: Duration,
    memo: Option<String>,
    routes: Vec<String>,
    caveats: Vec<Caveat>,
    registry: CaveatRegistry,
    store: Option<Arc<SessionStore>>,
    challenge_path: String,
}

impl<B> L402MiddlewareBuilder<B> {
    /// Sets the signing secret.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the location embedded in issued tokens.
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Sets the price per access, in the backend's smallest unit.
    #[must_use]
    pub const fn with_price(mut self, price: u64) -> Self {
        self.price = price;
        self
    }

    /// Sets how long issued tokens stay valid. Defaults to one day.
    #[must_use]
    pub const fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Sets the memo invoices are created with.
    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// Adds a protected route glob.
    #[must_use]
    pub fn with_route(mut self, pattern: impl Into<String>) -> Self {
        self.routes.push(pattern.into());
        self
    }

    /// Adds several protected route globs.
    #[must_use]
    pub fn with_routes<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Attaches a caveat to every issued token.
    #[must_use]
    pub fn with_caveat(mut self, caveat: Caveat) -> Self {
        self.caveats.push(caveat);
        self
    }

    /// Sets the registry caveats are evaluated with.
    #[must_use]
    pub fn with_registry(mut self, registry: CaveatRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Uses `store` instead of a private store with the default TTL.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets where [`challenge_router`](super::challenge_router) mounts the polling endpoint.
    #[must_use]
    pub fn with_challenge_path(mut self, path: impl Into<String>) -> Self {
        self.challenge_path = path.into();
        self
    }

    /// Validates the configuration and builds the middleware.
    ///
    /// # Errors
    ///
    /// Returns [`l402::Error::InvalidConfiguration`] if the secret is missing
    /// or short, the location is empty, the price is zero, a route pattern is
    /// invalid, the challenge path is not absolute, a caveat is one the issuer
    /// adds itself, or tokens would expire before their sessions.
    pub fn build(self) -> Result<L402Middleware<B>, l402::Error> {
        let secret = self
            .secret
            .ok_or_else(|| l402::Error::config("signing secret is required"))?;
        let minter = Minter::new(self.location, secret)?.with_validity(self.validity);
        if self.price == 0 {
            return Err(l402::Error::config("price must be greater than zero"));
        }
        if !self.challenge_path.starts_with('/') {
            return Err(l402::Error::config(format!(
                "challenge path {:?} must start with '/'",
                self.challenge_path
            )));
        }
        if let Some(caveat) = self
            .caveats
            .iter()
            .find(|c| matches!(c, Caveat::PaymentHash(_) | Caveat::Expiration(_)))
        {
            return Err(l402::Error::config(format!(
                "{} caveats are added per token and cannot be configured",
                caveat.kind()
            )));
        }
        let routes = RoutePolicy::new(self.routes)?;
        let store = self.store.unwrap_or_default();
        if self.validity < store.ttl() {
            return Err(l402::Error::config(format!(
                "validity window {:?} is shorter than the session TTL {:?}",
                self.validity,
                store.ttl()
            )));
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(
            location = minter.location(),
            price = self.price,
            routes = ?routes.patterns(),
            "L402 middleware configured"
        );

        Ok(L402Middleware {
            paygate: Arc::new(Paygate {
                backend: self.backend,
                minter,
                price: self.price,
                memo: self.memo,
                caveats: self.caveats,
                registry: self.registry,
                store,
                routes,
                challenge_path: self.challenge_path,
            }),
        })
    }
}

/// The L402 middleware: a [`Layer`] guarding the routes of its policy.
///
/// Create one per application with [`L402Middleware::builder`] and apply it
/// to a router. Clones share one [`Paygate`].
#[allow(missing_debug_implementations)] // generic backend may not implement Debug
pub struct L402Middleware<B> {
    paygate: Arc<Paygate<B>>,
}

impl<B> Clone for L402Middleware<B> {
    fn clone(&self) -> Self {
        Self {
            paygate: Arc::clone(&self.paygate),
        }
    }
}

impl<B> L402Middleware<B> {
    /// Starts configuring a middleware that issues invoices through `backend`.
    #[must_use]
    pub fn builder(backend: B) -> L402MiddlewareBuilder<B> {
        L402MiddlewareBuilder {
            backend,
            secret: None,
            location: DEFAULT_LOCATION.to_owned(),
            price: 1,
            validity: DEFAULT_VALIDITY,
            memo: None,
            routes: Vec::new(),
            caveats: Vec::new(),
            registry: CaveatRegistry::new(),
            store: None,
            challenge_path: DEFAULT_CHALLENGE_PATH.to_owned(),
        }
    }

    /// The shared gate, e.g. for mounting the challenge endpoint.
    #[must_use]
    pub const fn paygate(&self) -> &Arc<Paygate<B>> {
        &self.paygate
    }
}

impl<S, B> Layer<S> for L402Middleware<B>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = L402MiddlewareService<B>;

    fn layer(&self, inner: S) -> Self::Service {
        L402MiddlewareService {
            paygate: Arc::clone(&self.paygate),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service that enforces L402 payments on incoming requests.
#[allow(missing_debug_implementations)] // BoxCloneSyncService does not implement Debug
pub struct L402MiddlewareService<B> {
    paygate: Arc<Paygate<B>>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<B> Clone for L402MiddlewareService<B> {
    fn clone(&self) -> Self {
        Self {
            paygate: Arc::clone(&self.paygate),
            inner: self.inner.clone(),
        }
    }
}

impl<B> Service<Request> for L402MiddlewareService<B>
where
    B: PaymentBackend + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    /// Delegates readiness polling to the wrapped inner service.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    /// Runs the request through the gate, forwarding it only when admitted.
    fn call(&mut self, req: Request) -> Self::Future {
        let paygate = Arc::clone(&self.paygate);
        let inner = self.inner.clone();
        Box::pin(async move { paygate.handle_request(inner, req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l402::backend::MockBackend;

    const SECRET: [u8; 32] = [3u8; 32];

    #[test]
    fn test_build_requires_secret() {
        let err = L402Middleware::builder(MockBackend::new())
            .with_route("/protected/*")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, l402::Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_build_rejects_short_secret_and_zero_price() {
        assert!(
            L402Middleware::builder(MockBackend::new())
                .with_secret(vec![0u8; 8])
                .build()
                .is_err()
        );
        assert!(
            L402Middleware::builder(MockBackend::new())
                .with_secret(SECRET)
                .with_price(0)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_build_rejects_bad_routes_and_paths() {
        assert!(
            L402Middleware::builder(MockBackend::new())
                .with_secret(SECRET)
                .with_route("")
                .build()
                .is_err()
        );
        assert!(
            L402Middleware::builder(MockBackend::new())
                .with_secret(SECRET)
                .with_challenge_path("challenge")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_build_rejects_issuer_caveats() {
        let result = L402Middleware::builder(MockBackend::new())
            .with_secret(SECRET)
            .with_caveat(Caveat::payment_hash([0u8; 32]))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_rejects_validity_shorter_than_ttl() {
        let result = L402Middleware::builder(MockBackend::new())
            .with_secret(SECRET)
            .with_validity(Duration::from_secs(60))
            .with_session_store(Arc::new(SessionStore::new(Duration::from_secs(120))))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_defaults() {
        let middleware = L402Middleware::builder(MockBackend::new())
            .with_secret(SECRET)
            .with_route("/protected/*")
            .build()
            .unwrap();
        let paygate = middleware.paygate();
        assert_eq!(paygate.minter().location(), DEFAULT_LOCATION);
        assert_eq!(paygate.minter().validity(), DEFAULT_VALIDITY);
        assert_eq!(paygate.challenge_path(), DEFAULT_CHALLENGE_PATH);
        assert!(paygate.is_protected("/protected/x"));
        assert!(!paygate.is_protected("/public"));
    }
}

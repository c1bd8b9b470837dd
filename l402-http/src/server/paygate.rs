//! Core gate logic for enforcing L402 payments.
//!
//! For a request to a protected route, [`Paygate`] classifies it into one of
//! four states:
//!
//! | State | Outcome |
//! |---|---|
//! | [`GateState::Unmatched`] | forwarded untouched |
//! | [`GateState::NoToken`] | `402` with a challenge |
//! | [`GateState::TokenPresentInvalid`] | `402` with a challenge |
//! | [`GateState::TokenPresentValid`] | forwarded to the handler |
//!
//! A credential is accepted only if the token verifies, the preimage hashes to
//! the bound payment hash, every caveat holds for this request, and the
//! backend reports the invoice as settled, checked in that order.

use std::convert::Infallible;
use std::sync::Arc;

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use l402::backend::PaymentBackend;
use l402::caveat::{self, Caveat, CaveatRegistry, RequestContext};
use l402::macaroon::{InvalidReason, Macaroon, Minter, Verification};
use l402::session::{Challenge, Session, SessionStore};
use l402::{UnixMillis, preimage};
use serde_json::json;
use tower::Service;

#[cfg(feature = "telemetry")]
use tracing::Instrument;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::error::{PaygateError, RejectReason};
use super::policy::RoutePolicy;
use crate::constants::{ACCESS_CONTROL_EXPOSE_HEADERS, WWW_AUTHENTICATE_HEADER};
use crate::headers;

/// Classification of a request against the route policy and its credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// The path is not protected.
    Unmatched,
    /// No usable `Authorization: L402` credential was presented.
    NoToken,
    /// A credential was presented and refused.
    TokenPresentInvalid(RejectReason),
    /// A credential was presented and accepted.
    TokenPresentValid {
        /// Hex payment hash the credential is bound to.
        payment_hash: String,
    },
}

/// L402 payment gate: issues challenges and checks credentials.
///
/// Built by [`L402MiddlewareBuilder`](super::L402MiddlewareBuilder) and shared
/// behind an [`Arc`] by the middleware and the challenge endpoint.
#[allow(missing_debug_implementations)] // generic backend may not implement Debug
pub struct Paygate<B> {
    pub(super) backend: B,
    pub(super) minter: Minter,
    pub(super) price: u64,
    pub(super) memo: Option<String>,
    pub(super) caveats: Vec<Caveat>,
    pub(super) registry: CaveatRegistry,
    pub(super) store: Arc<SessionStore>,
    pub(super) routes: RoutePolicy,
    pub(super) challenge_path: String,
}

impl<B> Paygate<B> {
    /// `true` if `path` is guarded.
    #[must_use]
    pub fn is_protected(&self, path: &str) -> bool {
        self.routes.matches(path)
    }

    /// The backend invoices are created with.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// The token minter.
    #[must_use]
    pub const fn minter(&self) -> &Minter {
        &self.minter
    }

    /// The shared session store.
    #[must_use]
    pub const fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Price per access, in the backend's smallest unit.
    #[must_use]
    pub const fn price(&self) -> u64 {
        self.price
    }

    /// Path the challenge polling endpoint is mounted at.
    #[must_use]
    pub fn challenge_path(&self) -> &str {
        &self.challenge_path
    }

    /// Verifies a token under the key recorded for its session, falling back
    /// to the minter's key once the session has expired.
    fn verify_token(&self, token: &str) -> Verification {
        let session = Macaroon::deserialize(token)
            .ok()
            .and_then(|m| {
                m.caveats().iter().find_map(|c| match c {
                    Caveat::PaymentHash(hash) => Some(hex::encode(hash)),
                    _ => None,
                })
            })
            .and_then(|hash| self.store.get(&hash));
        match session {
            Some(session) => self.minter.verify_with_secret(token, session.secret()),
            None => self.minter.verify(token),
        }
    }
}

impl<B> Paygate<B>
where
    B: PaymentBackend,
{
    /// Classifies a request.
    ///
    /// # Errors
    ///
    /// Returns [`PaygateError::Backend`] if the settlement check fails.
    pub async fn classify(
        &self,
        ctx: &RequestContext,
        authorization: Option<&str>,
    ) -> Result<GateState, PaygateError> {
        if !self.is_protected(ctx.path()) {
            return Ok(GateState::Unmatched);
        }
        let Some(value) = authorization else {
            return Ok(GateState::NoToken);
        };
        let Ok(credential) = headers::parse_authorization(value) else {
            #[cfg(feature = "telemetry")]
            tracing::debug!(
                reason = %RejectReason::MalformedCredential,
                "Treating request as unauthenticated"
            );
            return Ok(GateState::NoToken);
        };

        let verification = self.verify_token(&credential.token);
        if !verification.valid {
            let reason = match verification.reason {
                Some(InvalidReason::MissingCaveat(caveat::PAYMENT_HASH)) => {
                    RejectReason::MissingPaymentHash
                }
                Some(reason) => RejectReason::SignatureInvalid(reason.to_string()),
                None => RejectReason::SignatureInvalid("unknown".to_owned()),
            };
            return Ok(GateState::TokenPresentInvalid(reason));
        }
        // a valid verification always carries exactly one payment hash
        let Some(payment_hash) = verification.payment_hash() else {
            return Ok(GateState::TokenPresentInvalid(
                RejectReason::MissingPaymentHash,
            ));
        };
        if !preimage::matches(&credential.preimage, &payment_hash) {
            return Ok(GateState::TokenPresentInvalid(
                RejectReason::PreimageMismatch,
            ));
        }
        if let Some(caveat) = self.registry.first_unsatisfied(ctx, &verification.caveats) {
            return Ok(GateState::TokenPresentInvalid(
                RejectReason::CaveatUnsatisfied(caveat.to_string()),
            ));
        }

        let payment_hash = hex::encode(payment_hash);
        if !self.backend.verify_payment(&payment_hash).await? {
            return Ok(GateState::TokenPresentInvalid(
                RejectReason::SettlementNotConfirmed,
            ));
        }
        Ok(GateState::TokenPresentValid { payment_hash })
    }

    /// Returns a challenge for `route`.
    ///
    /// The challenge cached for the route is reused while it is live and its
    /// invoice is still unpaid. Otherwise a new invoice is created, a token is
    /// minted for it, and both the session and the route cache are updated.
    ///
    /// # Errors
    ///
    /// Returns [`PaygateError`] if the backend fails or the token cannot be minted.
    pub async fn challenge(&self, route: &str) -> Result<Challenge, PaygateError> {
        if let Some(cached) = self.store.get_route(route) {
            if !self
                .backend
                .verify_payment(&cached.invoice.payment_hash)
                .await?
            {
                return Ok(cached);
            }
        }

        let invoice = self
            .backend
            .create_invoice(self.price, self.memo.as_deref())
            .await?;
        let payment_hash = invoice.payment_hash_bytes()?;
        let issued = self
            .minter
            .issue(&payment_hash, UnixMillis::now(), &self.caveats)?;
        let challenge = Challenge {
            token: issued.token,
            invoice,
        };

        #[cfg(feature = "telemetry")]
        tracing::debug!(
            payment_hash = %challenge.invoice.payment_hash,
            amount = challenge.invoice.amount,
            route,
            "Issued L402 challenge"
        );

        self.store
            .insert(Session::new(challenge.clone(), self.minter.secret()));
        self.store.insert_route(route, challenge.clone());
        Ok(challenge)
    }

    /// Handles an incoming request, turning gate errors into `500` responses.
    ///
    /// # Errors
    ///
    /// This method is infallible (`Infallible` error type).
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "l402.handle_request", skip_all, fields(path = %req.uri().path()))
    )]
    pub async fn handle_request<S>(&self, inner: S, req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        match self.handle_request_fallible(inner, req).await {
            Ok(response) => Ok(response),
            Err(err) => Ok(error_into_response(&err)),
        }
    }

    /// Handles an incoming request, returning errors as [`PaygateError`].
    ///
    /// # Errors
    ///
    /// Returns [`PaygateError`] if the backend fails or a challenge cannot be built.
    pub async fn handle_request_fallible<S>(
        &self,
        inner: S,
        req: Request,
    ) -> Result<Response, PaygateError>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        let ctx = request_context(&req);
        let authorization = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let state = self.classify(&ctx, authorization.as_deref()).await?;
        record_outcome(&state);
        match state {
            GateState::Unmatched | GateState::TokenPresentValid { .. } => {
                Ok(call_inner(inner, req).await)
            }
            GateState::NoToken | GateState::TokenPresentInvalid(_) => {
                let challenge = self.challenge(ctx.path()).await?;
                payment_required(&challenge)
            }
        }
    }
}

#[cfg(feature = "telemetry")]
fn record_outcome(state: &GateState) {
    match state {
        GateState::Unmatched => {}
        GateState::NoToken => tracing::debug!("No L402 credential presented"),
        GateState::TokenPresentInvalid(reason) => {
            tracing::info!(%reason, "L402 credential rejected");
        }
        GateState::TokenPresentValid { payment_hash } => {
            tracing::debug!(%payment_hash, "L402 credential accepted");
        }
    }
}

#[cfg(not(feature = "telemetry"))]
const fn record_outcome(_state: &GateState) {}

/// Calls the inner service with proper telemetry instrumentation.
async fn call_inner<S>(mut inner: S, req: Request) -> Response
where
    S: Service<Request, Response = Response, Error = Infallible>,
    S::Future: Send,
{
    #[cfg(feature = "telemetry")]
    let result = inner
        .call(req)
        .instrument(tracing::info_span!("inner"))
        .await;
    #[cfg(not(feature = "telemetry"))]
    let result = inner.call(req).await;
    match result {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

/// Collects the method, path and headers caveats are evaluated against.
#[must_use]
pub fn request_context(req: &Request) -> RequestContext {
    req.headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .fold(
            RequestContext::new(req.method().as_str(), req.uri().path()),
            |ctx, (name, value)| ctx.with_header(name, value),
        )
}

pub(super) fn json_response(status: StatusCode, body: &serde_json::Value) -> Response {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Builds the `402 Payment Required` response for a challenge.
///
/// # Errors
///
/// Returns [`PaygateError::InvalidChallenge`] if the token or invoice cannot
/// be carried in a header.
pub fn payment_required(challenge: &Challenge) -> Result<Response, PaygateError> {
    let header = HeaderValue::try_from(headers::encode_challenge(
        &challenge.token,
        &challenge.invoice.payment_request,
    ))?;
    let mut response = json_response(
        StatusCode::PAYMENT_REQUIRED,
        &json!({
            "macaroon": challenge.token,
            "invoice": challenge.invoice.payment_request,
            "paymentHash": challenge.invoice.payment_hash,
            "amount": challenge.invoice.amount,
        }),
    );
    let headers = response.headers_mut();
    headers.insert(WWW_AUTHENTICATE, header);
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(WWW_AUTHENTICATE_HEADER),
    );
    Ok(response)
}

/// Converts a [`PaygateError`] into a JSON server error.
pub(super) fn error_into_response(err: &PaygateError) -> Response {
    #[cfg(feature = "telemetry")]
    tracing::error!(error = %err, "L402 gate failed");
    match err {
        PaygateError::Backend(_) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({ "error": "Payment backend unavailable" }),
        ),
        PaygateError::Issuance(_) | PaygateError::InvalidChallenge(_) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &json!({ "error": "Failed to issue payment challenge" }),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use l402::backend::MockBackend;
    use l402::identifier;
    use l402::macaroon::DEFAULT_LOCATION;

    use super::*;
    use crate::server::L402Middleware;

    const SECRET: [u8; 32] = [5u8; 32];

    fn paygate() -> Arc<Paygate<MockBackend>> {
        let middleware = L402Middleware::builder(MockBackend::new())
            .with_secret(SECRET)
            .with_route("/protected/*")
            .build()
            .unwrap();
        Arc::clone(middleware.paygate())
    }

    #[tokio::test]
    async fn test_token_without_payment_hash() {
        let paygate = paygate();
        let token = Macaroon::new(
            DEFAULT_LOCATION,
            &SECRET,
            identifier::encode(&[7u8; 32]).unwrap(),
        )
        .with_caveat(Caveat::expiration(
            UnixMillis::now() + Duration::from_secs(60),
        ))
        .serialize()
        .unwrap();
        let authorization = headers::encode_authorization(&token, &"00".repeat(32));
        let ctx = RequestContext::new("GET", "/protected/data");

        let state = paygate.classify(&ctx, Some(&authorization)).await.unwrap();
        assert_eq!(
            state,
            GateState::TokenPresentInvalid(RejectReason::MissingPaymentHash)
        );
    }

    #[tokio::test]
    async fn test_classify_unmatched_and_missing() {
        let paygate = paygate();
        let public = RequestContext::new("GET", "/public");
        assert_eq!(
            paygate.classify(&public, None).await.unwrap(),
            GateState::Unmatched
        );
        let protected = RequestContext::new("GET", "/protected/data");
        assert_eq!(
            paygate.classify(&protected, Some("L402 abc")).await.unwrap(),
            GateState::NoToken
        );
    }
}

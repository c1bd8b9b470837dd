//! Challenge polling endpoint.
//!
//! `GET <challenge_path>?route=<path>` answers with the challenge a request to
//! `<path>` would get, so clients can fetch and pay an invoice before calling
//! the protected route. The response is the same `402` as the middleware's.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use axum_core::response::Response;
use http::StatusCode;
use l402::backend::PaymentBackend;
use serde::Deserialize;
use serde_json::json;

use super::paygate::{Paygate, error_into_response, json_response, payment_required};

#[derive(Debug, Deserialize)]
struct ChallengeQuery {
    route: Option<String>,
}

/// Builds a router serving the polling endpoint at the gate's challenge path.
///
/// Merge it into the application router next to the guarded routes.
pub fn challenge_router<B>(paygate: Arc<Paygate<B>>) -> Router
where
    B: PaymentBackend + 'static,
{
    let path = paygate.challenge_path().to_owned();
    Router::new()
        .route(&path, get(serve_challenge::<B>))
        .with_state(paygate)
}

async fn serve_challenge<B>(
    State(paygate): State<Arc<Paygate<B>>>,
    Query(query): Query<ChallengeQuery>,
) -> Response
where
    B: PaymentBackend + 'static,
{
    let Some(route) = query.route.filter(|r| !r.is_empty()) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": "Missing route query parameter" }),
        );
    };
    if !paygate.is_protected(&route) {
        return json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": "Route is not protected" }),
        );
    }
    match paygate.challenge(&route).await {
        Ok(challenge) => {
            payment_required(&challenge).unwrap_or_else(|err| error_into_response(&err))
        }
        Err(err) => error_into_response(&err),
    }
}

//! End-to-end scenarios for the L402 middleware against an axum router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use axum::routing::get;
use l402::backend::MockBackend;
use l402::caveat::{Caveat, CaveatRegistry, UnknownCaveatPolicy};
use l402::session::SessionStore;
use l402_http::headers::{encode_authorization, parse_challenge};
use l402_http::server::{L402Middleware, L402MiddlewareBuilder, challenge_router};
use serde_json::Value;
use tower::ServiceExt;

const SECRET: [u8; 32] = [11u8; 32];

type Builder = L402MiddlewareBuilder<Arc<MockBackend>>;

struct Harness {
    app: Router,
    backend: Arc<MockBackend>,
    store: Arc<SessionStore>,
}

fn harness(configure: impl FnOnce(Builder) -> Builder) -> Harness {
    harness_with_store(Arc::new(SessionStore::default()), configure)
}

fn harness_with_store(
    store: Arc<SessionStore>,
    configure: impl FnOnce(Builder) -> Builder,
) -> Harness {
    let backend = Arc::new(MockBackend::new());
    let builder = L402Middleware::builder(Arc::clone(&backend))
        .with_secret(SECRET)
        .with_price(100)
        .with_memo("test access")
        .with_session_store(Arc::clone(&store));
    let middleware = configure(builder).build().unwrap();
    let app = Router::new()
        .route("/public", get(|| async { "public" }))
        .route(
            "/protected/data",
            get(|| async { "secret data" }).post(|| async { "posted" }),
        )
        .route(
            "/api/protected/item",
            get(|| async { "item" }).post(|| async { "item posted" }),
        )
        .layer(middleware.clone())
        .merge(challenge_router(Arc::clone(middleware.paygate())));
    Harness {
        app,
        backend,
        store,
    }
}

fn default_harness() -> Harness {
    harness(|b| b.with_route("/protected/*"))
}

fn request(method: &str, uri: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

struct Challenged {
    token: String,
    payment_hash: String,
}

async fn challenged(response: Response) -> Challenged {
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let header = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    let challenge = parse_challenge(&header).unwrap();
    let body = body_json(response).await;
    assert_eq!(body["macaroon"], challenge.macaroon);
    assert_eq!(body["invoice"], challenge.invoice);
    Challenged {
        token: challenge.macaroon,
        payment_hash: body["paymentHash"].as_str().unwrap().to_owned(),
    }
}

/// Requests `uri`, pays the resulting invoice, and returns the retry header.
async fn pay_for(h: &Harness, uri: &str) -> String {
    let challenge = challenged(send(&h.app, request("GET", uri, None)).await).await;
    assert!(h.backend.settle(&challenge.payment_hash));
    let preimage = h.backend.preimage_for(&challenge.payment_hash).unwrap();
    encode_authorization(&challenge.token, &preimage)
}

#[tokio::test]
async fn test_public_route_passes_through() {
    let h = default_harness();
    let response = send(&h.app, request("GET", "/public", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "public");
    assert_eq!(h.backend.invoice_count(), 0);
}

#[tokio::test]
async fn test_protected_route_without_credential_is_challenged() {
    let h = default_harness();
    let response = send(&h.app, request("GET", "/protected/data", None)).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let header = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(header.starts_with("L402 "));
    assert!(header.contains("macaroon=\""));
    assert!(header.contains("invoice=\""));

    let body = body_json(response).await;
    assert_eq!(body["amount"], 100);
    let hash = body["paymentHash"].as_str().unwrap();
    assert_eq!(h.backend.memo_for(hash).as_deref(), Some("test access"));
    assert!(h.store.get(hash).is_some());
}

#[tokio::test]
async fn test_malformed_credential_is_treated_as_missing() {
    let h = default_harness();
    for value in ["L402 abc", "Bearer abc:def", "L402 :", "L402 a:b:c"] {
        let response = send(&h.app, request("GET", "/protected/data", Some(value))).await;
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED, "{value}");
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}

#[tokio::test]
async fn test_paid_credential_is_admitted() {
    let h = default_harness();
    let authorization = pay_for(&h, "/protected/data").await;

    let response = send(&h.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "secret data");

    // tokens are not single-use
    let again = send(&h.app, request("POST", "/protected/data", Some(&authorization))).await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(body_text(again).await, "posted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_credential_validates_concurrently() {
    let h = default_harness();
    let authorization = pay_for(&h, "/protected/data").await;

    let (first, second) = tokio::join!(
        send(&h.app, request("GET", "/protected/data", Some(&authorization))),
        send(&h.app, request("GET", "/protected/data", Some(&authorization))),
    );
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(h.backend.invoice_count(), 1);
}

#[tokio::test]
async fn test_unsettled_invoice_is_rejected() {
    let h = default_harness();
    let challenge = challenged(send(&h.app, request("GET", "/protected/data", None)).await).await;
    let preimage = h.backend.preimage_for(&challenge.payment_hash).unwrap();
    let authorization = encode_authorization(&challenge.token, &preimage);

    let response = send(&h.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_mismatched_preimage_is_rejected_even_if_settled() {
    let h = default_harness();
    let challenge = challenged(send(&h.app, request("GET", "/protected/data", None)).await).await;
    assert!(h.backend.settle(&challenge.payment_hash));
    let authorization = encode_authorization(&challenge.token, &"00".repeat(32));

    let response = send(&h.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_token_from_another_key_is_rejected() {
    let h = default_harness();
    let other = harness(|b| b.with_secret([99u8; 32]).with_route("/protected/*"));
    let authorization = pay_for(&other, "/protected/data").await;

    let response = send(&h.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_path_and_method_caveats() {
    let h = harness(|b| {
        b.with_route("/api/protected/*")
            .with_caveat(Caveat::path("/api/protected/*").unwrap())
            .with_caveat(Caveat::methods(["GET"]).unwrap())
    });
    let authorization = pay_for(&h, "/api/protected/item").await;

    let get = send(&h.app, request("GET", "/api/protected/item", Some(&authorization))).await;
    assert_eq!(get.status(), StatusCode::OK);

    let post = send(&h.app, request("POST", "/api/protected/item", Some(&authorization))).await;
    assert_eq!(post.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_path_caveat_confines_token_to_its_routes() {
    let h = harness(|b| {
        b.with_routes(["/protected/*", "/api/protected/*"])
            .with_caveat(Caveat::path("/protected/*").unwrap())
    });
    let authorization = pay_for(&h, "/protected/data").await;

    let inside = send(&h.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(inside.status(), StatusCode::OK);
    let outside = send(&h.app, request("GET", "/api/protected/item", Some(&authorization))).await;
    assert_eq!(outside.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_custom_caveat_predicate() {
    let mut registry = CaveatRegistry::new();
    registry
        .register("tier", |ctx, value| ctx.header("x-tier") == Some(value))
        .unwrap();
    let h = harness(|b| {
        b.with_route("/protected/*")
            .with_caveat(Caveat::custom("tier", "gold").unwrap())
            .with_registry(registry)
    });
    let authorization = pay_for(&h, "/protected/data").await;

    let mut gold = request("GET", "/protected/data", Some(&authorization));
    gold.headers_mut()
        .insert("x-tier", header::HeaderValue::from_static("gold"));
    assert_eq!(send(&h.app, gold).await.status(), StatusCode::OK);

    let plain = send(&h.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(plain.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_unknown_caveat_policy() {
    let allow = harness(|b| {
        b.with_route("/protected/*")
            .with_caveat(Caveat::custom("region", "eu").unwrap())
    });
    let authorization = pay_for(&allow, "/protected/data").await;
    let response = send(&allow.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let deny = harness(|b| {
        b.with_route("/protected/*")
            .with_caveat(Caveat::custom("region", "eu").unwrap())
            .with_registry(CaveatRegistry::new().with_unknown_policy(UnknownCaveatPolicy::Deny))
    });
    let authorization = pay_for(&deny, "/protected/data").await;
    let response = send(&deny.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_backend_failure_is_a_server_error() {
    let h = default_harness();
    h.backend.set_unavailable(true);
    let response = send(&h.app, request("GET", "/protected/data", None)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));
    let body = body_json(response).await;
    assert_eq!(body["error"], "Payment backend unavailable");
}

#[tokio::test]
async fn test_backend_failure_during_settlement_check() {
    let h = default_harness();
    let authorization = pay_for(&h, "/protected/data").await;
    h.backend.set_unavailable(true);
    let response = send(&h.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_route_challenge_is_reused_until_paid() {
    let h = default_harness();
    let first = challenged(send(&h.app, request("GET", "/protected/data", None)).await).await;
    let second = challenged(send(&h.app, request("GET", "/protected/data", None)).await).await;
    assert_eq!(first.token, second.token);
    assert_eq!(h.backend.invoice_count(), 1);

    assert!(h.backend.settle(&first.payment_hash));
    let third = challenged(send(&h.app, request("GET", "/protected/data", None)).await).await;
    assert_ne!(third.payment_hash, first.payment_hash);
    assert_eq!(h.backend.invoice_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_credential_outlives_its_session() {
    let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
    let h = harness_with_store(Arc::clone(&store), |b| b.with_route("/protected/*"));
    let authorization = pay_for(&h, "/protected/data").await;

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(store.purge_expired(), 2);

    let response = send(&h.app, request("GET", "/protected/data", Some(&authorization))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_challenge_endpoint() {
    let h = default_harness();
    let polled = challenged(
        send(&h.app, request("GET", "/l402/challenge?route=/protected/data", None)).await,
    )
    .await;

    // the guarded route serves the same cached challenge
    let direct = challenged(send(&h.app, request("GET", "/protected/data", None)).await).await;
    assert_eq!(polled.token, direct.token);
    assert_eq!(polled.payment_hash, direct.payment_hash);
}

#[tokio::test]
async fn test_challenge_endpoint_rejects_bad_queries() {
    let h = default_harness();
    let missing = send(&h.app, request("GET", "/l402/challenge", None)).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let empty = send(&h.app, request("GET", "/l402/challenge?route=", None)).await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let unprotected = send(&h.app, request("GET", "/l402/challenge?route=/public", None)).await;
    assert_eq!(unprotected.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.backend.invoice_count(), 0);
}

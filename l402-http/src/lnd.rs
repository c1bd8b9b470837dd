//! A [`PaymentBackend`] backed by an LND node's REST API.
//!
//! - `POST /v1/invoices` creates an invoice for the price, in satoshis.
//! - `GET /v1/invoice/{r_hash}` looks an invoice up by hex payment hash.
//!
//! Requests authenticate with a hex-encoded macaroon in the
//! `Grpc-Metadata-macaroon` header, as LND's REST gateway expects.
//!
//! ## Error Handling
//!
//! [`LndError`] keeps the failing call as context. It folds into
//! [`BackendError::Unavailable`] for transport and status failures, and into
//! [`BackendError::InvalidInvoice`] when LND answers with unusable data.

use std::time::Duration;

use l402::backend::{BackendError, BoxFuture, Invoice, PaymentBackend};
use l402::encoding::Base64Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// Header LND's REST gateway reads the admin or invoice macaroon from.
pub const MACAROON_HEADER: &str = "Grpc-Metadata-macaroon";

/// Errors from the LND REST client.
#[derive(Debug, thiserror::Error)]
pub enum LndError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// The response parsed but does not describe a usable invoice.
    #[error("Invalid response: {context}: {detail}")]
    InvalidResponse {
        /// Human-readable context.
        context: &'static str,
        /// What was wrong with it.
        detail: String,
    },
}

impl From<LndError> for BackendError {
    fn from(err: LndError) -> Self {
        match err {
            LndError::InvalidResponse { .. } => Self::InvalidInvoice(err.to_string()),
            LndError::UrlParse { .. } | LndError::Http { .. } | LndError::HttpStatus { .. } => {
                Self::Unavailable(err.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct AddInvoiceRequest<'a> {
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<&'a str>,
}

#[derive(Deserialize)]
struct AddInvoiceResponse {
    r_hash: String,
    payment_request: String,
}

#[derive(Deserialize)]
struct LookupInvoiceResponse {
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    state: Option<String>,
}

/// LND REST client.
#[derive(Clone)]
pub struct LndBackend {
    base_url: Url,
    add_invoice_url: Url,
    client: Client,
    macaroon: Option<String>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for LndBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LndBackend")
            .field("base_url", &self.base_url)
            .field("macaroon", &self.macaroon.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LndBackend {
    /// Constructs a client for the REST endpoint at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LndError::UrlParse`] if the invoice URL cannot be derived.
    pub fn try_new(base_url: Url) -> Result<Self, LndError> {
        let add_invoice_url = base_url
            .join("v1/invoices")
            .map_err(|source| LndError::UrlParse {
                context: "Failed to construct v1/invoices URL",
                source,
            })?;
        Ok(Self {
            base_url,
            add_invoice_url,
            client: Client::new(),
            macaroon: None,
            timeout: None,
        })
    }

    /// Authenticates every request with a hex-encoded macaroon.
    #[must_use]
    pub fn with_macaroon(mut self, macaroon_hex: impl Into<String>) -> Self {
        self.macaroon = Some(macaroon_hex.into());
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses a preconfigured HTTP client, e.g. one trusting LND's self-signed certificate.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn authorize(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(macaroon) = &self.macaroon {
            req = req.header(MACAROON_HEADER, macaroon);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        req
    }

    /// Sends `POST /v1/invoices`.
    ///
    /// # Errors
    ///
    /// Returns [`LndError`] if the call fails or the answer lacks a 32-byte hash.
    pub async fn add_invoice(&self, amount: u64, memo: Option<&str>) -> Result<Invoice, LndError> {
        const CONTEXT: &str = "POST /v1/invoices";
        let req = self.client.post(self.add_invoice_url.clone()).json(&AddInvoiceRequest {
            value: amount.to_string(),
            memo,
        });
        let response: AddInvoiceResponse = send_json(self.authorize(req), CONTEXT).await?;

        let r_hash = Base64Bytes::from(response.r_hash.as_str())
            .decode()
            .map_err(|e| LndError::InvalidResponse {
                context: CONTEXT,
                detail: format!("r_hash is not base64: {e}"),
            })?;
        if r_hash.len() != 32 {
            return Err(LndError::InvalidResponse {
                context: CONTEXT,
                detail: format!("r_hash is {} bytes, expected 32", r_hash.len()),
            });
        }
        Ok(Invoice {
            payment_hash: hex::encode(r_hash),
            payment_request: response.payment_request,
            amount,
        })
    }

    /// Sends `GET /v1/invoice/{payment_hash}`. Unknown invoices are unsettled.
    ///
    /// # Errors
    ///
    /// Returns [`LndError`] if the call fails.
    pub async fn lookup_settled(&self, payment_hash: &str) -> Result<bool, LndError> {
        const CONTEXT: &str = "GET /v1/invoice";
        let url = self
            .base_url
            .join(&format!("v1/invoice/{payment_hash}"))
            .map_err(|source| LndError::UrlParse {
                context: "Failed to construct v1/invoice URL",
                source,
            })?;
        match send_json::<LookupInvoiceResponse>(self.authorize(self.client.get(url)), CONTEXT)
            .await
        {
            Ok(invoice) => Ok(invoice.settled || invoice.state.as_deref() == Some("SETTLED")),
            Err(LndError::HttpStatus { status, .. }) if status == StatusCode::NOT_FOUND => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Parses a base URL, normalizing it to end in a single `/`.
impl TryFrom<&str> for LndBackend {
    type Error = LndError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| LndError::UrlParse {
            context: "Failed to parse base url",
            source,
        })?;
        Self::try_new(url)
    }
}

async fn send_json<R>(req: reqwest::RequestBuilder, context: &'static str) -> Result<R, LndError>
where
    R: serde::de::DeserializeOwned,
{
    let http_response = req
        .send()
        .await
        .map_err(|source| LndError::Http { context, source })?;
    let status = http_response.status();
    if status != StatusCode::OK {
        let body = http_response.text().await.unwrap_or_default();
        #[cfg(feature = "telemetry")]
        tracing::error!(%status, context, "Request to LND failed");
        return Err(LndError::HttpStatus {
            context,
            status,
            body,
        });
    }
    http_response
        .json::<R>()
        .await
        .map_err(|e| LndError::InvalidResponse {
            context,
            detail: e.to_string(),
        })
}

impl PaymentBackend for LndBackend {
    fn create_invoice<'a>(
        &'a self,
        amount: u64,
        memo: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Invoice, BackendError>> {
        Box::pin(async move { Ok(self.add_invoice(amount, memo).await?) })
    }

    fn verify_payment<'a>(
        &'a self,
        payment_hash: &'a str,
    ) -> BoxFuture<'a, Result<bool, BackendError>> {
        Box::pin(async move { Ok(self.lookup_settled(payment_hash).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HASH_B64: &str = "BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=";

    fn backend(server: &MockServer) -> LndBackend {
        LndBackend::try_from(server.uri().as_str())
            .unwrap()
            .with_macaroon("0201abcd")
    }

    #[tokio::test]
    async fn test_create_invoice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/invoices"))
            .and(header(MACAROON_HEADER, "0201abcd"))
            .and(body_json(json!({ "value": "100", "memo": "coffee" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "r_hash": HASH_B64,
                "payment_request": "lnbcrt1u1ptest",
                "add_index": "1",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let invoice = backend(&server)
            .create_invoice(100, Some("coffee"))
            .await
            .unwrap();
        assert_eq!(invoice.payment_hash, "07".repeat(32));
        assert_eq!(invoice.payment_request, "lnbcrt1u1ptest");
        assert_eq!(invoice.amount, 100);
    }

    #[tokio::test]
    async fn test_short_hash_is_invalid_invoice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/invoices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "r_hash": "AAEC",
                "payment_request": "lnbcrt1",
            })))
            .mount(&server)
            .await;

        let err = backend(&server).create_invoice(1, None).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidInvoice(_)));
    }

    #[tokio::test]
    async fn test_verify_payment_states() {
        let server = MockServer::start().await;
        let settled = "aa".repeat(32);
        let open = "bb".repeat(32);
        Mock::given(method("GET"))
            .and(path(format!("/v1/invoice/{settled}")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "state": "SETTLED" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/invoice/{open}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "state": "OPEN", "settled": false })),
            )
            .mount(&server)
            .await;

        let lnd = backend(&server);
        assert!(lnd.verify_payment(&settled).await.unwrap());
        assert!(!lnd.verify_payment(&open).await.unwrap());
        // wiremock answers 404 for anything unmatched
        assert!(!lnd.verify_payment(&"cc".repeat(32)).await.unwrap());
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/invoices"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = backend(&server).create_invoice(1, None).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(msg) if msg.contains("boom")));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let lnd = LndBackend::try_from("https://localhost:8080/lnd//").unwrap();
        assert_eq!(lnd.base_url().as_str(), "https://localhost:8080/lnd/");
        assert_eq!(
            lnd.add_invoice_url.as_str(),
            "https://localhost:8080/lnd/v1/invoices"
        );
    }

    #[test]
    fn test_debug_redacts_macaroon() {
        let lnd = LndBackend::try_from("https://localhost:8080")
            .unwrap()
            .with_macaroon("0201abcd");
        assert!(!format!("{lnd:?}").contains("0201abcd"));
    }
}

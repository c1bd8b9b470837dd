//! HTTP-specific constants for the L402 protocol.

/// Authentication scheme name used in both directions.
pub const L402_SCHEME: &str = "L402";

/// HTTP header carrying the challenge (server → client).
pub const WWW_AUTHENTICATE_HEADER: &str = "WWW-Authenticate";

/// HTTP header carrying the credential (client → server).
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// CORS header name for exposing custom headers.
pub const ACCESS_CONTROL_EXPOSE_HEADERS: &str = "Access-Control-Expose-Headers";

/// HTTP 402 Payment Required status code.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;

/// Default path of the challenge polling endpoint.
pub const DEFAULT_CHALLENGE_PATH: &str = "/l402/challenge";

/// Query parameter naming the route a polling client wants a challenge for.
pub const ROUTE_QUERY_PARAM: &str = "route";

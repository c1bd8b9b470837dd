//! Tower middleware for enforcing [L402](https://docs.lightning.engineering/the-lightning-network/l402)
//! payments on protected routes.
//!
//! The middleware checks `Authorization: L402 <token>:<preimage>` on requests
//! to protected paths and answers everything else with a `402 Payment Required`
//! challenge. Credential failures never surface their cause to the client;
//! only payment backend failures produce a server error.
//!
//! See [`L402Middleware`] for configuration and [`challenge_router`] for the
//! polling endpoint.

pub mod challenge;
pub mod error;
pub mod layer;
pub mod paygate;
pub mod policy;

pub use challenge::challenge_router;
pub use error::{PaygateError, RejectReason};
pub use layer::{L402Middleware, L402MiddlewareBuilder, L402MiddlewareService};
pub use paygate::{GateState, Paygate, payment_required, request_context};
pub use policy::RoutePolicy;

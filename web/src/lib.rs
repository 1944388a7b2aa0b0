//! HTTP surface for the dispatch engine and surge calculator.
//!
//! Thin axum handlers over the domain services: extract the tenant and
//! idempotency headers, delegate, map domain errors to stable
//! `{code, message}` JSON responses. No business logic lives here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;

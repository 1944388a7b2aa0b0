//! Resilience primitives and background task scaffolding.
//!
//! Provides the pieces wrapped around unreliable collaborators and periodic
//! work:
//!
//! - [`circuit_breaker`] — sliding-window failure-rate breaker guarding the
//!   PSP gateway
//! - [`retry`] — bounded exponential backoff with a retryability predicate
//! - [`scheduler`] — cancel-aware interval tasks for the outbox relay, offer
//!   timeout sweep, and reconciliation sweeps

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit_breaker;
pub mod retry;
pub mod scheduler;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, State};
pub use retry::{retry_with_predicate, RetryPolicy};
pub use scheduler::spawn_interval_task;

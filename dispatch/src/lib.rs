//! Dispatch engine: ride lifecycle, candidate scoring, exclusive offers.
//!
//! The engine owns a ride from creation until it reaches ACCEPTED or a
//! terminal state. Three independent defense layers keep concurrent workers
//! honest:
//!
//! 1. a per-ride distributed lock serializes *offering*,
//! 2. an optimistic version column on the ride row serializes *accepting*,
//! 3. the idempotency key unique index serializes *creation*.
//!
//! Offers are exclusive and time-bounded: one driver at a time holds a 15 s
//! offer, enforced by the [`timeout::OfferTimeoutScheduler`] sweep. Declines
//! and timeouts feed back into the dispatch loop with the tried drivers
//! excluded, bounded at three attempts before NO_DRIVER_FOUND.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod candidates;
pub mod engine;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;
pub mod timeout;

pub use engine::{DispatchConfig, DispatchEngine};
pub use error::DispatchError;
pub use model::{DriverOffer, NewRide, Ride, RideRequest, RideSummary};
pub use store::{DispatchStore, StoreError};

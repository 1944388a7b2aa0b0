//! Core domain types and shared abstractions for the rideflow platform.
//!
//! This crate holds everything the dispatch, payment, and surge subsystems
//! agree on: entity identifiers, lifecycle enums, money, the JSON event
//! payloads carried on the bus, the topic registry, the [`event_bus::EventBus`]
//! trait, and geo math (haversine distance and H3 cell addressing).
//!
//! # Key Principles
//!
//! - **Explicit tenant threading**: every event payload and entry point takes
//!   a tenant id; there is no ambient per-worker tenant context.
//! - **Partition-key discipline**: every event names the entity id it is
//!   keyed by, so per-entity ordering survives horizontal scale.
//! - **JSON envelopes**: payloads are serde-serialized JSON records with
//!   ISO-8601 UTC timestamps.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event_bus;
pub mod events;
pub mod geo;
pub mod idempotency;
pub mod topics;
pub mod types;

pub use event_bus::{BusEvent, EventBus, EventBusError, EventStream};
pub use types::{
    DriverStatus, Money, OfferResponse, OutboxStatus, PaymentId, PaymentStatus, RideId,
    RideStatus, TripId, TripStatus, VehicleTier, DEFAULT_TENANT, GLOBAL_TENANT,
};

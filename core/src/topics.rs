//! Central registry of bus topic names.
//!
//! Topic name doubles as the event type; the partition key is always the
//! owning entity id (ride, trip, payment, cell, or driver id).

/// Driver location updates, keyed by driver id.
pub const DRIVER_LOCATION_UPDATED: &str = "driver.location.updated";

/// New ride requests, keyed by ride id.
pub const RIDE_REQUESTED: &str = "ride.requested";

/// Exclusive offers sent to drivers, keyed by ride id.
pub const DRIVER_OFFER_SENT: &str = "driver.offer.sent";

/// Accept transitions, keyed by ride id.
pub const RIDE_ACCEPTED: &str = "ride.accepted";

/// Decline events, keyed by ride id.
pub const RIDE_DECLINED: &str = "ride.declined";

/// Cancellations, keyed by ride id.
pub const RIDE_CANCELLED: &str = "ride.cancelled";

/// Dispatch exhaustion, keyed by ride id.
pub const RIDE_NO_DRIVER_FOUND: &str = "ride.no_driver_found";

/// Driver arrival, keyed by ride id.
pub const RIDE_DRIVER_ARRIVED: &str = "ride.driver_arrived";

/// Trip start transition, keyed by ride id.
pub const RIDE_IN_PROGRESS: &str = "ride.in_progress";

/// Trip lifecycle, keyed by trip id.
pub const TRIP_STARTED: &str = "trip.started";

/// Trip lifecycle, keyed by trip id.
pub const TRIP_PAUSED: &str = "trip.paused";

/// Trip lifecycle, keyed by trip id; consumed by the payment orchestrator.
pub const TRIP_ENDED: &str = "trip.ended";

/// Payment row created, keyed by payment id.
pub const PAYMENT_INITIATED: &str = "payment.initiated";

/// PSP charge confirmed, keyed by payment id.
pub const PAYMENT_CAPTURED: &str = "payment.captured";

/// PSP charge failed after retries, keyed by payment id.
pub const PAYMENT_FAILED: &str = "payment.failed";

/// Per-cell supply/demand snapshots, keyed by cell id.
pub const SUPPLY_DEMAND_SNAPSHOT: &str = "supply.demand.snapshot";

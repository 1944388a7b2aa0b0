//! JSON event payloads carried on the bus.
//!
//! Field names follow the wire convention (camelCase); enum values use their
//! SCREAMING_SNAKE_CASE form. Every payload carries the tenant id and, where
//! meaningful, the region id, so consumers never rely on ambient context.

use crate::types::{
    DriverStatus, Money, PaymentId, PaymentStatus, RideId, RideStatus, TripId, TripStatus,
    VehicleTier,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Published after a ride row is inserted, before the first dispatch attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequestedEvent {
    /// Ride id (partition key).
    pub ride_id: RideId,
    /// Requesting rider.
    pub rider_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Region the pickup falls in.
    pub region_id: String,
    /// Pickup latitude.
    pub pickup_lat: f64,
    /// Pickup longitude.
    pub pickup_lng: f64,
    /// Destination latitude.
    pub destination_lat: f64,
    /// Destination longitude.
    pub destination_lng: f64,
    /// Required vehicle tier.
    pub tier: VehicleTier,
    /// Payment method label.
    pub payment_method: String,
    /// Client-supplied idempotency key, if any.
    pub idempotency_key: Option<String>,
    /// Request instant.
    pub requested_at: DateTime<Utc>,
}

/// Published when an exclusive offer is opened with a driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverOfferSentEvent {
    /// Ride id (partition key).
    pub ride_id: RideId,
    /// Driver receiving the offer.
    pub driver_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Region id.
    pub region_id: String,
    /// 1-based dispatch attempt number.
    pub attempt_number: i32,
    /// Offer validity window in seconds.
    pub ttl_seconds: i64,
    /// Offer instant.
    pub offered_at: DateTime<Utc>,
}

/// Published on every ride lifecycle transition after dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideStatusChangedEvent {
    /// Ride id (partition key).
    pub ride_id: RideId,
    /// Requesting rider.
    pub rider_id: String,
    /// Driver involved in the transition, when one is.
    pub driver_id: Option<String>,
    /// Owning tenant.
    pub tenant_id: String,
    /// Region id.
    pub region_id: String,
    /// New status.
    pub status: RideStatus,
    /// Optional transition reason (e.g. `NO_DRIVERS_AVAILABLE`).
    pub reason: Option<String>,
    /// Transition instant.
    pub changed_at: DateTime<Utc>,
}

/// Trip lifecycle event from the external trip service.
///
/// The payment orchestrator consumes only `status == Ended` with a non-null
/// fare; everything else is acknowledged and skipped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripEvent {
    /// Trip id (partition key).
    pub trip_id: TripId,
    /// Originating ride, when known.
    pub ride_id: Option<RideId>,
    /// Rider to charge.
    pub rider_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Region id.
    pub region_id: String,
    /// Trip lifecycle status.
    pub status: TripStatus,
    /// Final fare in cents; null until the trip ends.
    pub fare_amount_cents: Option<Money>,
    /// ISO-4217 currency of the fare.
    pub currency: Option<String>,
    /// Event instant.
    pub event_time: DateTime<Utc>,
}

/// Payment lifecycle event written through the transactional outbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    /// Payment id (partition key).
    pub payment_id: PaymentId,
    /// Trip being paid for.
    pub trip_id: TripId,
    /// Rider charged.
    pub rider_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Amount in cents.
    pub amount_cents: Money,
    /// ISO-4217 currency.
    pub currency: String,
    /// PSP reference, present once captured.
    pub psp_reference: Option<String>,
    /// Payment status at emission time.
    pub status: PaymentStatus,
    /// Failure reason when status is FAILED.
    pub failure_reason: Option<String>,
    /// Event instant.
    pub event_time: DateTime<Utc>,
}

/// Per-cell supply/demand snapshot from the location write path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyDemandSnapshotEvent {
    /// H3 cell address (partition key).
    pub geo_cell: String,
    /// Region id.
    pub region_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Drivers active in the cell during the snapshot window.
    pub active_drivers: u32,
    /// Rides awaiting dispatch in the cell.
    pub pending_rides: u32,
    /// Snapshot instant.
    pub computed_at: DateTime<Utc>,
}

/// Driver position update (partition key: driver id).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocationUpdatedEvent {
    /// Driver id (partition key).
    pub driver_id: String,
    /// Region id.
    pub region_id: String,
    /// Latitude.
    pub latitude: f64,
    /// Longitude.
    pub longitude: f64,
    /// Driver status at update time.
    pub status: DriverStatus,
    /// Vehicle tier.
    pub tier: VehicleTier,
    /// Update instant.
    pub timestamp: DateTime<Utc>,
}

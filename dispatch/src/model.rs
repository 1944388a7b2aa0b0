//! Dispatch domain entities and request/response shapes.

use chrono::{DateTime, Utc};
use rideflow_core::types::OfferId;
use rideflow_core::{OfferResponse, RideId, RideStatus, VehicleTier};
use serde::{Deserialize, Serialize};

/// A ride row: the dispatch request plus its lifecycle state.
#[derive(Clone, Debug, PartialEq)]
pub struct Ride {
    /// Ride id.
    pub id: RideId,
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
    /// Lifecycle status.
    pub status: RideStatus,
    /// Client idempotency key; unique per tenant when present.
    pub idempotency_key: Option<String>,
    /// SHA-256 of the canonical request body, stored with the key so a
    /// divergent replay is rejected instead of replayed.
    pub request_hash: Option<String>,
    /// Winning driver; non-null exactly from ACCEPTED onwards.
    pub assigned_driver_id: Option<String>,
    /// Dispatch attempts consumed so far.
    pub attempt_count: i32,
    /// Optimistic-lock version; every mutating update increments it.
    pub version: i64,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last update instant.
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert a new ride at PENDING.
#[derive(Clone, Debug)]
pub struct NewRide {
    /// Requesting rider.
    pub rider_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Region id.
    pub region_id: String,
    /// Pickup latitude.
    pub pickup_lat: f64,
    /// Pickup longitude.
    pub pickup_lng: f64,
    /// Destination latitude.
    pub destination_lat: f64,
    /// Destination longitude.
    pub destination_lng: f64,
    /// Required tier.
    pub tier: VehicleTier,
    /// Payment method label.
    pub payment_method: String,
    /// Idempotency key, if the client sent one.
    pub idempotency_key: Option<String>,
    /// Canonical request hash, stored alongside the key.
    pub request_hash: Option<String>,
}

/// An exclusive, time-bounded invitation to one driver for one ride.
///
/// Append-only audit: rows are never deleted, and `response` /
/// `responded_at` are set exactly once.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverOffer {
    /// Offer id.
    pub id: OfferId,
    /// Parent ride.
    pub ride_id: RideId,
    /// Driver the offer was sent to.
    pub driver_id: String,
    /// 1-based, monotonic per ride.
    pub attempt_number: i32,
    /// When the offer was opened.
    pub offered_at: DateTime<Utc>,
    /// When the driver (or the timeout sweep) responded.
    pub responded_at: Option<DateTime<Utc>>,
    /// Offer validity window.
    pub ttl_seconds: i64,
    /// Terminal response; `None` while the offer is open.
    pub response: Option<OfferResponse>,
}

impl DriverOffer {
    /// True while no response has been recorded.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.response.is_none()
    }

    /// True when the offer is open and its TTL has elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && (now - self.offered_at).num_seconds() >= self.ttl_seconds
    }
}

/// Inbound ride creation request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideRequest {
    /// Requesting rider.
    pub rider_id: String,
    /// Pickup latitude.
    pub pickup_lat: f64,
    /// Pickup longitude.
    pub pickup_lng: f64,
    /// Destination latitude.
    pub destination_lat: f64,
    /// Destination longitude.
    pub destination_lng: f64,
    /// Required tier.
    pub tier: VehicleTier,
    /// Payment method label.
    pub payment_method: String,
    /// Region id; defaults to the deployment region when omitted.
    pub region_id: Option<String>,
}

/// Outbound ride summary returned by every dispatch operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideSummary {
    /// Ride id.
    pub ride_id: RideId,
    /// Requesting rider.
    pub rider_id: String,
    /// Current status.
    pub status: RideStatus,
    /// Required tier.
    pub tier: VehicleTier,
    /// Winning driver, once accepted.
    pub assigned_driver_id: Option<String>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl From<&Ride> for RideSummary {
    fn from(ride: &Ride) -> Self {
        Self {
            ride_id: ride.id,
            rider_id: ride.rider_id.clone(),
            status: ride.status,
            tier: ride.tier,
            assigned_driver_id: ride.assigned_driver_id.clone(),
            created_at: ride.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn offer(offered_at: DateTime<Utc>, response: Option<OfferResponse>) -> DriverOffer {
        DriverOffer {
            id: OfferId::new(),
            ride_id: RideId::new(),
            driver_id: "drv_1".to_string(),
            attempt_number: 1,
            offered_at,
            responded_at: None,
            ttl_seconds: 15,
            response,
        }
    }

    #[test]
    fn offer_expiry_is_ttl_bounded() {
        let now = Utc::now();
        assert!(!offer(now, None).is_expired(now));
        assert!(!offer(now - Duration::seconds(14), None).is_expired(now));
        assert!(offer(now - Duration::seconds(15), None).is_expired(now));
    }

    #[test]
    fn answered_offers_never_expire() {
        let now = Utc::now();
        let stale = offer(now - Duration::seconds(60), Some(OfferResponse::Declined));
        assert!(!stale.is_expired(now));
    }
}

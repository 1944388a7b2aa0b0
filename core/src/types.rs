//! Identifiers, lifecycle enums, and value objects shared across subsystems.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant id used when a request carries no explicit tenant.
pub const DEFAULT_TENANT: &str = "default";

/// Pseudo-tenant whose feature flags act as a platform-wide fallback.
pub const GLOBAL_TENANT: &str = "global";

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing `Uuid`.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner `Uuid`.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a ride (dispatch request).
    RideId
);

uuid_id!(
    /// Unique identifier for a driver offer.
    OfferId
);

uuid_id!(
    /// Unique identifier for a payment.
    PaymentId
);

uuid_id!(
    /// Unique identifier for a trip.
    TripId
);

// ============================================================================
// Money
// ============================================================================

/// A monetary amount in minor units (cents), scale 2.
///
/// Fare and charge amounts are carried as integer cents end-to-end: over the
/// bus, in Postgres (`amount_cents BIGINT`), and into the PSP call. Display
/// renders the major-unit form (`2093` → `"20.93"`).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates an amount from integer cents.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the amount in integer cents.
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// True when the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, (self.0 % 100).abs())
    }
}

// ============================================================================
// Lifecycle enums
// ============================================================================

/// Ride lifecycle states.
///
/// Terminal states are absorbing; `Completed` is reached by the external trip
/// lifecycle, never by the dispatch engine itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    /// Created, not yet offered to any driver.
    Pending,
    /// An offer is open with some driver.
    Dispatching,
    /// A driver won the accept race.
    Accepted,
    /// The assigned driver reported arrival at pickup.
    DriverArrived,
    /// The trip is underway.
    InProgress,
    /// The trip ended (externally driven).
    Completed,
    /// Cancelled by rider or ops.
    Cancelled,
    /// All dispatch attempts exhausted.
    NoDriverFound,
}

impl RideStatus {
    /// True for absorbing states that admit no further transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoDriverFound)
    }

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Dispatching => "DISPATCHING",
            Self::Accepted => "ACCEPTED",
            Self::DriverArrived => "DRIVER_ARRIVED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::NoDriverFound => "NO_DRIVER_FOUND",
        }
    }
}

impl FromStr for RideStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "DISPATCHING" => Ok(Self::Dispatching),
            "ACCEPTED" => Ok(Self::Accepted),
            "DRIVER_ARRIVED" => Ok(Self::DriverArrived),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "NO_DRIVER_FOUND" => Ok(Self::NoDriverFound),
            other => Err(format!("unknown ride status: {other}")),
        }
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Driver availability states kept in the geo/KV metadata map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    /// Available for offers.
    Idle,
    /// Holds an open offer.
    Dispatching,
    /// On an accepted trip.
    OnTrip,
    /// Not accepting work.
    Offline,
}

impl DriverStatus {
    /// Wire / KV representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Dispatching => "DISPATCHING",
            Self::OnTrip => "ON_TRIP",
            Self::Offline => "OFFLINE",
        }
    }
}

impl FromStr for DriverStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(Self::Idle),
            "DISPATCHING" => Ok(Self::Dispatching),
            "ON_TRIP" => Ok(Self::OnTrip),
            "OFFLINE" => Ok(Self::Offline),
            other => Err(format!("unknown driver status: {other}")),
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A driver's terminal response to an offer.
///
/// `None` (no response yet) is modelled as the absence of a value on the
/// offer row, not as a variant here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferResponse {
    /// Driver took the ride.
    Accepted,
    /// Driver explicitly declined.
    Declined,
    /// The 15 s TTL elapsed without a response.
    Timeout,
}

impl OfferResponse {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Declined => "DECLINED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl FromStr for OfferResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCEPTED" => Ok(Self::Accepted),
            "DECLINED" => Ok(Self::Declined),
            "TIMEOUT" => Ok(Self::Timeout),
            other => Err(format!("unknown offer response: {other}")),
        }
    }
}

/// Vehicle tiers, ordered from lowest to highest rank.
///
/// A driver is compatible with a ride when the driver's tier rank is at
/// least the required tier rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleTier {
    /// Base tier.
    Economy,
    /// Mid tier.
    Comfort,
    /// High tier.
    Premium,
    /// Top tier.
    Luxury,
}

impl VehicleTier {
    /// Ordinal rank used for tier compatibility.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Economy => 0,
            Self::Comfort => 1,
            Self::Premium => 2,
            Self::Luxury => 3,
        }
    }

    /// True when a driver of this tier may serve a ride requiring `required`.
    #[must_use]
    pub const fn can_serve(&self, required: Self) -> bool {
        self.rank() >= required.rank()
    }

    /// Wire / KV representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Economy => "ECONOMY",
            Self::Comfort => "COMFORT",
            Self::Premium => "PREMIUM",
            Self::Luxury => "LUXURY",
        }
    }
}

impl FromStr for VehicleTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ECONOMY" => Ok(Self::Economy),
            "COMFORT" => Ok(Self::Comfort),
            "PREMIUM" => Ok(Self::Premium),
            "LUXURY" => Ok(Self::Luxury),
            other => Err(format!("unknown vehicle tier: {other}")),
        }
    }
}

impl fmt::Display for VehicleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Row inserted, charge outcome unknown.
    Pending,
    /// PSP confirmed the charge.
    Captured,
    /// Charge failed; reconciliation may still capture later.
    Failed,
}

impl PaymentStatus {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Captured => "CAPTURED",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CAPTURED" => Ok(Self::Captured),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbox entry states.
///
/// `Pending → Published` is the normal path; `Pending → Failed` happens only
/// after retry exhaustion and requires manual intervention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Awaiting publication by the relay.
    Pending,
    /// Acknowledged by the broker.
    Published,
    /// Retries exhausted.
    Failed,
}

impl OutboxStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Published => "PUBLISHED",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PUBLISHED" => Ok(Self::Published),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// Trip lifecycle states produced by the external trip service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    /// Trip underway.
    Started,
    /// Trip paused.
    Paused,
    /// Trip ended; payment may be initiated.
    Ended,
}

//! Dispatch error taxonomy with stable client-facing codes.

use crate::store::StoreError;
use rideflow_core::{EventBusError, RideId};
use rideflow_kv::KvError;
use thiserror::Error;

/// Errors surfaced by the dispatch engine.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The kill switch is on for this tenant.
    #[error("dispatch is temporarily disabled for maintenance, please try again shortly")]
    ServiceUnavailable,

    /// Unknown ride id.
    #[error("ride {0} not found")]
    RideNotFound(RideId),

    /// Another driver won the optimistic-lock race on accept.
    #[error("ride {0} was just accepted by another driver, the offer is no longer valid")]
    RideAlreadyAccepted(RideId),

    /// The operation is not legal in the ride's current state.
    #[error("{0}")]
    InvalidState(String),

    /// The caller is not the ride's assigned driver.
    #[error("driver {driver_id} is not the assigned driver for ride {ride_id}")]
    UnauthorizedDriver {
        /// Offending driver.
        driver_id: String,
        /// Ride id.
        ride_id: RideId,
    },

    /// The ride is in progress and can no longer be cancelled.
    #[error("cannot cancel a ride already in progress")]
    CannotCancel,

    /// Same idempotency key, different request body.
    #[error("idempotency key was replayed with a different request body")]
    IdempotencyConflict,

    /// Storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// KV/geo failure.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Event bus failure.
    #[error(transparent)]
    Bus(#[from] EventBusError),
}

impl DispatchError {
    /// Stable code carried in error responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::RideNotFound(_) => "RIDE_NOT_FOUND",
            Self::RideAlreadyAccepted(_) => "RIDE_ALREADY_ACCEPTED",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::UnauthorizedDriver { .. } => "UNAUTHORIZED_DRIVER",
            Self::CannotCancel => "CANNOT_CANCEL",
            Self::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            Self::Store(_) | Self::Kv(_) | Self::Bus(_) => "INTERNAL_ERROR",
        }
    }
}

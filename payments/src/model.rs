//! Payment and outbox entities.

use chrono::{DateTime, Utc};
use rideflow_core::events::{PaymentEvent, TripEvent};
use rideflow_core::{Money, OutboxStatus, PaymentId, PaymentStatus, TripId};
use uuid::Uuid;

/// A payment row: at most one per trip, enforced by a unique index.
#[derive(Clone, Debug, PartialEq)]
pub struct Payment {
    /// Payment id.
    pub id: PaymentId,
    /// Trip being charged.
    pub trip_id: TripId,
    /// Rider to charge.
    pub rider_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Amount in cents.
    pub amount: Money,
    /// ISO-4217 currency.
    pub currency: String,
    /// Payment method label.
    pub payment_method: String,
    /// PSP reference; set exactly once, on capture.
    pub psp_reference: Option<String>,
    /// Lifecycle status.
    pub status: PaymentStatus,
    /// Last failure reason, if any.
    pub failure_reason: Option<String>,
    /// Charge attempts that have failed so far (initial + reconciliation).
    pub retry_count: i32,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last update instant.
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Event snapshot of this payment in its current state.
    #[must_use]
    pub fn to_event(&self) -> PaymentEvent {
        PaymentEvent {
            payment_id: self.id,
            trip_id: self.trip_id,
            rider_id: self.rider_id.clone(),
            tenant_id: self.tenant_id.clone(),
            amount_cents: self.amount,
            currency: self.currency.clone(),
            psp_reference: self.psp_reference.clone(),
            status: self.status,
            failure_reason: self.failure_reason.clone(),
            event_time: Utc::now(),
        }
    }

    /// Builds a PENDING payment from a trip-ended event and its fare.
    #[must_use]
    pub fn from_trip(trip: &TripEvent, amount: Money) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            trip_id: trip.trip_id,
            rider_id: trip.rider_id.clone(),
            tenant_id: trip.tenant_id.clone(),
            amount,
            currency: trip.currency.clone().unwrap_or_else(|| "USD".to_string()),
            payment_method: "CARD".to_string(),
            psp_reference: None,
            status: PaymentStatus::Pending,
            failure_reason: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An outbox row awaiting publication.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboxEntry {
    /// Row id.
    pub id: Uuid,
    /// Payment the event belongs to; doubles as the bus partition key.
    pub payment_id: PaymentId,
    /// Owning tenant.
    pub tenant_id: String,
    /// Topic / event type.
    pub event_type: String,
    /// Serialized JSON event.
    pub payload: Vec<u8>,
    /// Relay status.
    pub status: OutboxStatus,
    /// Publish attempts that have failed so far.
    pub retry_count: i32,
    /// Insert instant; the relay drains in this order.
    pub created_at: DateTime<Utc>,
    /// Broker acknowledgment instant.
    pub published_at: Option<DateTime<Utc>>,
}

/// Fields for inserting a PENDING outbox row.
#[derive(Clone, Debug)]
pub struct NewOutboxEntry {
    /// Payment the event belongs to.
    pub payment_id: PaymentId,
    /// Owning tenant.
    pub tenant_id: String,
    /// Topic / event type.
    pub event_type: String,
    /// Serialized JSON event.
    pub payload: Vec<u8>,
}

impl NewOutboxEntry {
    /// Serializes an event into a PENDING outbox row for a payment.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the event cannot be serialized.
    pub fn for_event(
        payment: &Payment,
        event_type: &str,
        event: &PaymentEvent,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payment_id: payment.id,
            tenant_id: payment.tenant_id.clone(),
            event_type: event_type.to_string(),
            payload: serde_json::to_vec(event)?,
        })
    }
}

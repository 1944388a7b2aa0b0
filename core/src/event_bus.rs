//! Event bus abstraction shared by all publishers and consumers.
//!
//! Events are published to a topic with an explicit partition key (the owning
//! entity id), giving at-least-once delivery with per-entity ordering.
//! Consumers must be idempotent on that key.
//!
//! # Implementations
//!
//! - `rideflow-bus` — Redpanda/Kafka-backed, for production
//! - `rideflow-testing` — in-memory capture bus, for tests

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to serialize or deserialize an event payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Network or transport error.
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A single event on the bus: topic, partition key, JSON payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusEvent {
    /// Topic name, which doubles as the event type.
    pub topic: String,
    /// Partition key — the owning entity id.
    pub key: String,
    /// Serialized JSON payload.
    pub payload: Vec<u8>,
}

impl BusEvent {
    /// Builds an event from raw parts.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
        }
    }

    /// Serializes `payload` to JSON and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SerializationFailed`] if the payload cannot
    /// be serialized.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: &T,
    ) -> Result<Self, EventBusError> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| EventBusError::SerializationFailed(e.to_string()))?;
        Ok(Self::new(topic, key, bytes))
    }
}

/// Stream of events yielded by a subscription.
pub type EventStream =
    Pin<Box<dyn futures::Stream<Item = Result<BusEvent, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the
/// bus can be held as `Arc<dyn EventBus>` across subsystems.
pub trait EventBus: Send + Sync {
    /// Publish an event, awaiting broker acknowledgment.
    ///
    /// Delivery is at-least-once; ordering is preserved per partition key.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] when the broker rejects or
    /// does not acknowledge the record.
    fn publish(
        &self,
        event: &BusEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe a consumer group to one or more topics.
    ///
    /// Offsets are committed after each event has been handed downstream, so
    /// a crash mid-processing re-delivers rather than drops.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_constructor_serializes_payload() {
        #[derive(Serialize)]
        struct Payload {
            value: u32,
        }

        let event = BusEvent::json("ride.requested", "ride-1", &Payload { value: 7 }).unwrap();
        assert_eq!(event.topic, "ride.requested");
        assert_eq!(event.key, "ride-1");
        assert_eq!(event.payload, br#"{"value":7}"#.to_vec());
    }
}

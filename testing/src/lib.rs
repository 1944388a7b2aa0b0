//! Test doubles for the rideflow platform.
//!
//! Provides [`InMemoryEventBus`], a synchronous capture bus implementing the
//! [`EventBus`] trait: published events are recorded for assertions and
//! fanned out to live subscribers. Fast, deterministic, no broker required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rideflow_core::{BusEvent, EventBus, EventBusError, EventStream};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// In-memory [`EventBus`] that records every published event.
///
/// # Example
///
/// ```rust
/// use rideflow_core::{BusEvent, EventBus};
/// use rideflow_testing::InMemoryEventBus;
///
/// # async fn example() {
/// let bus = InMemoryEventBus::new();
/// bus.publish(&BusEvent::new("ride.requested", "ride-1", vec![]))
///     .await
///     .unwrap();
///
/// assert_eq!(bus.topic_events("ride.requested").len(), 1);
/// # }
/// ```
pub struct InMemoryEventBus {
    published: Mutex<Vec<BusEvent>>,
    fanout: broadcast::Sender<BusEvent>,
}

impl InMemoryEventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        let (fanout, _) = broadcast::channel(256);
        Self {
            published: Mutex::new(Vec::new()),
            fanout,
        }
    }

    /// All events published so far, in publish order.
    #[must_use]
    pub fn events(&self) -> Vec<BusEvent> {
        self.published.lock().expect("bus log poisoned").clone()
    }

    /// Events published to one topic, in publish order.
    #[must_use]
    pub fn topic_events(&self, topic: &str) -> Vec<BusEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.topic == topic)
            .collect()
    }

    /// Events published for one partition key across all topics, in publish
    /// order. Mirrors what a partition-ordered consumer would observe.
    #[must_use]
    pub fn key_events(&self, key: &str) -> Vec<BusEvent> {
        self.events().into_iter().filter(|e| e.key == key).collect()
    }

    /// Topic names in publish order (duplicates preserved).
    #[must_use]
    pub fn topic_sequence(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.topic).collect()
    }

    /// Drops all recorded events.
    pub fn clear(&self) {
        self.published.lock().expect("bus log poisoned").clear();
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        event: &BusEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            self.published
                .lock()
                .expect("bus log poisoned")
                .push(event.clone());
            // No subscribers is fine; the capture log is the assertion surface.
            let _ = self.fanout.send(event);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        _group: &str,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let mut rx = self.fanout.subscribe();

        Box::pin(async move {
            let stream = async_stream::stream! {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            if topics.iter().any(|t| t == &event.topic) {
                                yield Ok(event);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Err(EventBusError::TransportError(format!(
                                "in-memory subscriber lagged by {skipped} events"
                            )));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}

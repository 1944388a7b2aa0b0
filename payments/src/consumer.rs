//! Trip-ended consumer feeding the payment orchestrator.

use crate::orchestrator::PaymentOrchestrator;
use async_trait::async_trait;
use rideflow_bus::{EventHandler, HandlerError};
use rideflow_core::events::TripEvent;
use rideflow_core::BusEvent;
use std::sync::Arc;

/// Handles `trip.ended` events from the bus.
///
/// Non-ENDED trip events and fare-less trips are acknowledged and skipped;
/// the orchestrator's trip-id idempotency absorbs redeliveries.
pub struct TripEndedHandler {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl TripEndedHandler {
    /// Wraps the orchestrator.
    #[must_use]
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl EventHandler for TripEndedHandler {
    async fn handle(&self, event: &BusEvent) -> Result<(), HandlerError> {
        let trip: TripEvent = serde_json::from_slice(&event.payload)
            .map_err(|e| format!("malformed trip event on {}: {e}", event.topic))?;

        self.orchestrator
            .initiate(&trip)
            .await
            .map_err(|e| format!("payment initiation failed for trip {}: {e}", trip.trip_id))?;
        Ok(())
    }
}

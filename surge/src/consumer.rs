//! Supply/demand snapshot consumer feeding the surge calculator.

use crate::calculator::SurgeService;
use async_trait::async_trait;
use rideflow_bus::{EventHandler, HandlerError};
use rideflow_core::events::SupplyDemandSnapshotEvent;
use rideflow_core::BusEvent;
use std::sync::Arc;

/// Handles `supply.demand.snapshot` events from the bus.
///
/// Snapshots are partitioned by cell id, so per-cell recomputes arrive
/// serialized; a redelivered snapshot only refreshes the same window entry.
pub struct SnapshotHandler {
    service: Arc<SurgeService>,
}

impl SnapshotHandler {
    /// Wraps the surge service.
    #[must_use]
    pub fn new(service: Arc<SurgeService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for SnapshotHandler {
    async fn handle(&self, event: &BusEvent) -> Result<(), HandlerError> {
        let snapshot: SupplyDemandSnapshotEvent = serde_json::from_slice(&event.payload)
            .map_err(|e| format!("malformed snapshot event on {}: {e}", event.topic))?;

        self.service
            .process_snapshot(&snapshot)
            .await
            .map_err(|e| format!("surge recompute failed for cell {}: {e}", snapshot.geo_cell))?;
        Ok(())
    }
}

//! Shared application state for the HTTP handlers.

use rideflow_dispatch::DispatchEngine;
use rideflow_surge::SurgeService;
use std::sync::Arc;

/// Handler state: the two services the HTTP surface fronts.
#[derive(Clone)]
pub struct AppState {
    /// Dispatch engine.
    pub engine: Arc<DispatchEngine>,
    /// Surge calculator.
    pub surge: Arc<SurgeService>,
}

impl AppState {
    /// Bundle the services.
    #[must_use]
    pub fn new(engine: Arc<DispatchEngine>, surge: Arc<SurgeService>) -> Self {
        Self { engine, surge }
    }
}

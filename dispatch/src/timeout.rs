//! Offer timeout sweep.
//!
//! Runs every 5 s: for every ride still DISPATCHING, any open offer whose
//! TTL has elapsed is force-closed as TIMEOUT and the ride re-enters the
//! dispatch loop with the timed-out driver excluded. One sweep instance per
//! region suffices; multiple instances coordinate through the per-ride
//! dispatch lock, so a double sweep is wasted work, not a double offer.

use crate::engine::DispatchEngine;
use crate::store::DispatchStore;
use chrono::Utc;
use rideflow_core::OfferResponse;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Periodic sweep that expires open offers.
pub struct OfferTimeoutScheduler {
    store: Arc<dyn DispatchStore>,
    engine: Arc<DispatchEngine>,
}

impl OfferTimeoutScheduler {
    /// Creates the sweep over the shared store and engine.
    #[must_use]
    pub fn new(store: Arc<dyn DispatchStore>, engine: Arc<DispatchEngine>) -> Self {
        Self { store, engine }
    }

    /// One sweep pass. Errors are logged per ride; one bad ride never stalls
    /// the rest of the sweep.
    pub async fn sweep(&self) {
        let dispatching = match self.store.dispatching_rides().await {
            Ok(rides) => rides,
            Err(e) => {
                warn!(error = %e, "offer timeout sweep could not list dispatching rides");
                return;
            }
        };

        let now = Utc::now();
        for ride in dispatching {
            let offers = match self.store.open_offers(ride.id).await {
                Ok(offers) => offers,
                Err(e) => {
                    warn!(ride_id = %ride.id, error = %e, "could not load open offers");
                    continue;
                }
            };

            for offer in offers.into_iter().filter(|o| o.is_expired(now)) {
                if let Err(e) = self
                    .store
                    .respond_offer(offer.id, OfferResponse::Timeout)
                    .await
                {
                    warn!(ride_id = %ride.id, offer_id = %offer.id, error = %e, "could not expire offer");
                    continue;
                }

                metrics::counter!("dispatch.offer_timeouts").increment(1);
                info!(
                    ride_id = %ride.id,
                    driver_id = %offer.driver_id,
                    ttl_seconds = offer.ttl_seconds,
                    "offer timed out, reassigning"
                );

                let mut tried = HashSet::new();
                tried.insert(offer.driver_id.clone());
                if let Err(e) = self.engine.dispatch_next(ride.id, tried).await {
                    warn!(ride_id = %ride.id, error = %e, "re-dispatch after timeout failed");
                }
            }
        }
    }
}

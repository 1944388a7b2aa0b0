//! In-memory dispatch store for tests and infrastructure-free runs.
//!
//! Reproduces the semantics the engine depends on: version-guarded updates,
//! idempotency-key uniqueness per tenant, and write-once offer responses.

use crate::model::{DriverOffer, NewRide, Ride};
use crate::store::{DispatchStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use rideflow_core::types::OfferId;
use rideflow_core::{OfferResponse, RideId, RideStatus};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    rides: HashMap<RideId, Ride>,
    offers: Vec<DriverOffer>,
    by_key: HashMap<(String, String), RideId>,
}

/// In-memory [`DispatchStore`].
#[derive(Default)]
pub struct InMemoryDispatchStore {
    state: Mutex<State>,
}

impl InMemoryDispatchStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All offers for a ride, for test assertions.
    #[must_use]
    pub fn offers_for(&self, ride_id: RideId) -> Vec<DriverOffer> {
        let state = self.state.lock().expect("dispatch state poisoned");
        state
            .offers
            .iter()
            .filter(|o| o.ride_id == ride_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DispatchStore for InMemoryDispatchStore {
    async fn insert_ride(&self, new: NewRide) -> Result<Ride, StoreError> {
        let mut state = self.state.lock().expect("dispatch state poisoned");

        if let Some(key) = &new.idempotency_key {
            let map_key = (new.tenant_id.clone(), key.clone());
            if state.by_key.contains_key(&map_key) {
                return Err(StoreError::DuplicateIdempotencyKey);
            }
        }

        let now = Utc::now();
        let ride = Ride {
            id: RideId::new(),
            rider_id: new.rider_id,
            tenant_id: new.tenant_id,
            region_id: new.region_id,
            pickup_lat: new.pickup_lat,
            pickup_lng: new.pickup_lng,
            destination_lat: new.destination_lat,
            destination_lng: new.destination_lng,
            tier: new.tier,
            payment_method: new.payment_method,
            status: RideStatus::Pending,
            idempotency_key: new.idempotency_key.clone(),
            request_hash: new.request_hash,
            assigned_driver_id: None,
            attempt_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        if let Some(key) = &new.idempotency_key {
            state
                .by_key
                .insert((ride.tenant_id.clone(), key.clone()), ride.id);
        }
        state.rides.insert(ride.id, ride.clone());
        Ok(ride)
    }

    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<Ride>, StoreError> {
        let state = self.state.lock().expect("dispatch state poisoned");
        Ok(state
            .by_key
            .get(&(tenant_id.to_string(), key.to_string()))
            .and_then(|id| state.rides.get(id))
            .cloned())
    }

    async fn fetch_ride(&self, ride_id: RideId) -> Result<Option<Ride>, StoreError> {
        let state = self.state.lock().expect("dispatch state poisoned");
        Ok(state.rides.get(&ride_id).cloned())
    }

    async fn record_offer(
        &self,
        ride_id: RideId,
        expected_version: i64,
        driver_id: &str,
        attempt_number: i32,
        ttl_seconds: i64,
    ) -> Result<(Ride, DriverOffer), StoreError> {
        let mut state = self.state.lock().expect("dispatch state poisoned");
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or(StoreError::RideNotFound(ride_id))?;
        if ride.version != expected_version {
            return Err(StoreError::VersionConflict(ride_id));
        }

        ride.status = RideStatus::Dispatching;
        ride.attempt_count = attempt_number;
        ride.version += 1;
        ride.updated_at = Utc::now();
        let updated = ride.clone();

        let offer = DriverOffer {
            id: OfferId::new(),
            ride_id,
            driver_id: driver_id.to_string(),
            attempt_number,
            offered_at: Utc::now(),
            responded_at: None,
            ttl_seconds,
            response: None,
        };
        state.offers.push(offer.clone());
        Ok((updated, offer))
    }

    async fn transition(
        &self,
        ride_id: RideId,
        expected_version: i64,
        status: RideStatus,
        assigned_driver_id: Option<&str>,
    ) -> Result<Ride, StoreError> {
        let mut state = self.state.lock().expect("dispatch state poisoned");
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or(StoreError::RideNotFound(ride_id))?;
        if ride.version != expected_version {
            return Err(StoreError::VersionConflict(ride_id));
        }

        ride.status = status;
        ride.assigned_driver_id = assigned_driver_id.map(ToString::to_string);
        ride.version += 1;
        ride.updated_at = Utc::now();
        Ok(ride.clone())
    }

    async fn open_offer(
        &self,
        ride_id: RideId,
        driver_id: &str,
    ) -> Result<Option<DriverOffer>, StoreError> {
        let state = self.state.lock().expect("dispatch state poisoned");
        Ok(state
            .offers
            .iter()
            .filter(|o| o.ride_id == ride_id && o.driver_id == driver_id && o.is_open())
            .max_by_key(|o| o.attempt_number)
            .cloned())
    }

    async fn respond_offer(
        &self,
        offer_id: OfferId,
        response: OfferResponse,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("dispatch state poisoned");
        if let Some(offer) = state.offers.iter_mut().find(|o| o.id == offer_id) {
            if offer.response.is_none() {
                offer.response = Some(response);
                offer.responded_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn offered_driver_ids(&self, ride_id: RideId) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().expect("dispatch state poisoned");
        let mut ids: Vec<String> = state
            .offers
            .iter()
            .filter(|o| o.ride_id == ride_id)
            .map(|o| o.driver_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn dispatching_rides(&self) -> Result<Vec<Ride>, StoreError> {
        let state = self.state.lock().expect("dispatch state poisoned");
        let mut rides: Vec<Ride> = state
            .rides
            .values()
            .filter(|r| r.status == RideStatus::Dispatching)
            .cloned()
            .collect();
        rides.sort_by_key(|r| r.created_at);
        Ok(rides)
    }

    async fn open_offers(&self, ride_id: RideId) -> Result<Vec<DriverOffer>, StoreError> {
        let state = self.state.lock().expect("dispatch state poisoned");
        let mut offers: Vec<DriverOffer> = state
            .offers
            .iter()
            .filter(|o| o.ride_id == ride_id && o.is_open())
            .cloned()
            .collect();
        offers.sort_by_key(|o| std::cmp::Reverse(o.attempt_number));
        Ok(offers)
    }
}

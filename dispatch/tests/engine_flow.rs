//! Dispatch engine flows against in-memory stores and a capture bus.

use async_trait::async_trait;
use rideflow_core::events::{DriverOfferSentEvent, RideStatusChangedEvent};
use rideflow_core::types::OfferId;
use rideflow_core::{topics, DriverStatus, OfferResponse, RideId, RideStatus, VehicleTier};
use rideflow_dispatch::memory::InMemoryDispatchStore;
use rideflow_dispatch::store::StoreError;
use rideflow_dispatch::timeout::OfferTimeoutScheduler;
use rideflow_dispatch::{
    DispatchConfig, DispatchEngine, DispatchError, DispatchStore, DriverOffer, NewRide, Ride,
    RideRequest,
};
use rideflow_kv::geo_index::DriverLocationUpdate;
use rideflow_kv::memory::{
    InMemoryFeatureFlags, InMemoryGeoIndex, InMemoryIdempotencyCache, InMemoryLockManager,
};
use rideflow_kv::{flags, FeatureFlagStore, GeoIndex};
use rideflow_testing::InMemoryEventBus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const REGION: &str = "ap-south-1";
const PICKUP: (f64, f64) = (12.9716, 77.5946);
const DEST: (f64, f64) = (12.9352, 77.6245);

struct Harness {
    store: Arc<InMemoryDispatchStore>,
    geo: Arc<InMemoryGeoIndex>,
    flags: Arc<InMemoryFeatureFlags>,
    bus: Arc<InMemoryEventBus>,
    engine: Arc<DispatchEngine>,
}

fn harness_with(config: DispatchConfig) -> Harness {
    let store = Arc::new(InMemoryDispatchStore::new());
    let geo = Arc::new(InMemoryGeoIndex::new());
    let locks = Arc::new(InMemoryLockManager::new());
    let flags = Arc::new(InMemoryFeatureFlags::new());
    let cache = Arc::new(InMemoryIdempotencyCache::new());
    let bus = Arc::new(InMemoryEventBus::new());

    let engine = Arc::new(DispatchEngine::new(
        store.clone(),
        geo.clone(),
        locks,
        flags.clone(),
        cache,
        bus.clone(),
        config,
    ));

    Harness {
        store,
        geo,
        flags,
        bus,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(DispatchConfig {
        default_region: REGION.to_string(),
        ..DispatchConfig::default()
    })
}

async fn seed_driver(
    geo: &InMemoryGeoIndex,
    driver_id: &str,
    lat: f64,
    lng: f64,
    tier: VehicleTier,
    rating: f64,
    decline_rate: f64,
) {
    geo.upsert(DriverLocationUpdate {
        driver_id: driver_id.to_string(),
        region_id: REGION.to_string(),
        lat,
        lng,
        status: DriverStatus::Idle,
        tier,
        rating,
        decline_rate,
    })
    .await
    .unwrap();
}

fn ride_request() -> RideRequest {
    RideRequest {
        rider_id: "usr_101".to_string(),
        pickup_lat: PICKUP.0,
        pickup_lng: PICKUP.1,
        destination_lat: DEST.0,
        destination_lng: DEST.1,
        tier: VehicleTier::Economy,
        payment_method: "CARD".to_string(),
        region_id: Some(REGION.to_string()),
    }
}

fn offer_events(bus: &InMemoryEventBus) -> Vec<DriverOfferSentEvent> {
    bus.topic_events(topics::DRIVER_OFFER_SENT)
        .iter()
        .map(|e| serde_json::from_slice(&e.payload).unwrap())
        .collect()
}

#[tokio::test]
async fn happy_dispatch_offers_the_nearest_idle_driver() {
    let h = harness();
    seed_driver(&h.geo, "drv_001", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.9, 0.05).await;

    let summary = h
        .engine
        .create_ride("default", ride_request(), Some("ik-1".to_string()))
        .await
        .unwrap();

    assert_eq!(summary.status, RideStatus::Dispatching);
    assert_eq!(summary.assigned_driver_id, None);

    // ride.requested precedes driver.offer.sent on the bus.
    assert_eq!(
        h.bus.topic_sequence(),
        vec![topics::RIDE_REQUESTED, topics::DRIVER_OFFER_SENT]
    );

    let offers = offer_events(&h.bus);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].driver_id, "drv_001");
    assert_eq!(offers[0].attempt_number, 1);
    assert_eq!(offers[0].ttl_seconds, 15);

    // The offered driver is marked DISPATCHING in the metadata map.
    let meta = h.geo.metadata("drv_001").await.unwrap().unwrap();
    assert_eq!(meta.status, Some(DriverStatus::Dispatching));

    let rows = h.store.offers_for(summary.ride_id);
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_open());
}

#[tokio::test]
async fn decline_reassigns_to_the_next_candidate() {
    let h = harness();
    // drv_a ≈ 0.5 km out, drv_b ≈ 2 km out; equal rating and decline rate.
    seed_driver(&h.geo, "drv_a", PICKUP.0 + 0.0045, PICKUP.1, VehicleTier::Economy, 4.5, 0.1).await;
    seed_driver(&h.geo, "drv_b", PICKUP.0 + 0.018, PICKUP.1, VehicleTier::Economy, 4.5, 0.1).await;

    let summary = h
        .engine
        .create_ride("default", ride_request(), None)
        .await
        .unwrap();

    let first = offer_events(&h.bus);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].driver_id, "drv_a", "closer driver is offered first");

    let after_decline = h.engine.decline(summary.ride_id, "drv_a").await.unwrap();
    assert_eq!(after_decline.status, RideStatus::Dispatching);

    let offers = offer_events(&h.bus);
    assert_eq!(offers.len(), 2);
    assert_eq!(offers[1].driver_id, "drv_b");
    assert_eq!(offers[1].attempt_number, 2);

    let rows = h.store.offers_for(summary.ride_id);
    let declined: Vec<&DriverOffer> =
        rows.iter().filter(|o| o.response == Some(OfferResponse::Declined)).collect();
    assert_eq!(declined.len(), 1);
    assert_eq!(declined[0].driver_id, "drv_a");

    // The decliner went back to IDLE.
    let meta = h.geo.metadata("drv_a").await.unwrap().unwrap();
    assert_eq!(meta.status, Some(DriverStatus::Idle));
}

#[tokio::test]
async fn redispatch_never_reoffers_a_tried_driver() {
    let h = harness();
    seed_driver(&h.geo, "drv_a", PICKUP.0 + 0.0045, PICKUP.1, VehicleTier::Economy, 4.5, 0.1).await;
    seed_driver(&h.geo, "drv_b", PICKUP.0 + 0.018, PICKUP.1, VehicleTier::Economy, 4.5, 0.1).await;

    let summary = h.engine.create_ride("default", ride_request(), None).await.unwrap();
    h.engine.decline(summary.ride_id, "drv_a").await.unwrap();
    // drv_a is IDLE again and closest, but must not be offered a second time.
    let final_summary = h.engine.decline(summary.ride_id, "drv_b").await.unwrap();

    let offered: Vec<String> = offer_events(&h.bus).into_iter().map(|o| o.driver_id).collect();
    let unique: HashSet<&String> = offered.iter().collect();
    assert_eq!(offered.len(), unique.len(), "a driver was offered twice: {offered:?}");
    assert_eq!(final_summary.status, RideStatus::NoDriverFound);
}

/// Store wrapper that yields between the read and the guarded write so two
/// accept calls interleave the way two workers would.
struct YieldingStore(Arc<InMemoryDispatchStore>);

#[async_trait]
impl DispatchStore for YieldingStore {
    async fn insert_ride(&self, new: NewRide) -> Result<Ride, StoreError> {
        self.0.insert_ride(new).await
    }
    async fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> Result<Option<Ride>, StoreError> {
        self.0.find_by_idempotency_key(tenant_id, key).await
    }
    async fn fetch_ride(&self, ride_id: RideId) -> Result<Option<Ride>, StoreError> {
        let ride = self.0.fetch_ride(ride_id).await;
        tokio::task::yield_now().await;
        ride
    }
    async fn record_offer(
        &self,
        ride_id: RideId,
        expected_version: i64,
        driver_id: &str,
        attempt_number: i32,
        ttl_seconds: i64,
    ) -> Result<(Ride, DriverOffer), StoreError> {
        self.0
            .record_offer(ride_id, expected_version, driver_id, attempt_number, ttl_seconds)
            .await
    }
    async fn transition(
        &self,
        ride_id: RideId,
        expected_version: i64,
        status: RideStatus,
        assigned_driver_id: Option<&str>,
    ) -> Result<Ride, StoreError> {
        self.0
            .transition(ride_id, expected_version, status, assigned_driver_id)
            .await
    }
    async fn open_offer(
        &self,
        ride_id: RideId,
        driver_id: &str,
    ) -> Result<Option<DriverOffer>, StoreError> {
        self.0.open_offer(ride_id, driver_id).await
    }
    async fn respond_offer(
        &self,
        offer_id: OfferId,
        response: OfferResponse,
    ) -> Result<(), StoreError> {
        self.0.respond_offer(offer_id, response).await
    }
    async fn offered_driver_ids(&self, ride_id: RideId) -> Result<Vec<String>, StoreError> {
        self.0.offered_driver_ids(ride_id).await
    }
    async fn dispatching_rides(&self) -> Result<Vec<Ride>, StoreError> {
        self.0.dispatching_rides().await
    }
    async fn open_offers(&self, ride_id: RideId) -> Result<Vec<DriverOffer>, StoreError> {
        self.0.open_offers(ride_id).await
    }
}

#[tokio::test]
async fn double_accept_race_has_exactly_one_winner() {
    let inner = Arc::new(InMemoryDispatchStore::new());
    let geo = Arc::new(InMemoryGeoIndex::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let engine = Arc::new(DispatchEngine::new(
        Arc::new(YieldingStore(inner.clone())),
        geo.clone(),
        Arc::new(InMemoryLockManager::new()),
        Arc::new(InMemoryFeatureFlags::new()),
        Arc::new(InMemoryIdempotencyCache::new()),
        bus.clone(),
        DispatchConfig {
            default_region: REGION.to_string(),
            ..DispatchConfig::default()
        },
    ));

    seed_driver(&geo, "drv_a", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.5, 0.1).await;
    let summary = engine
        .create_ride("default", ride_request(), None)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        engine.accept(summary.ride_id, "drv_a"),
        engine.accept(summary.ride_id, "drv_b"),
    );

    let outcomes = [a, b];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(DispatchError::RideAlreadyAccepted(_))))
        .count();
    assert_eq!(wins, 1, "exactly one driver must win the accept race");
    assert_eq!(conflicts, 1, "the loser must see RIDE_ALREADY_ACCEPTED");

    let ride = inner.fetch_ride(summary.ride_id).await.unwrap().unwrap();
    assert_eq!(ride.status, RideStatus::Accepted);
    assert!(ride.assigned_driver_id.is_some());
}

#[tokio::test]
async fn kill_switch_rejects_creation_without_side_effects() {
    let h = harness();
    seed_driver(&h.geo, "drv_001", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.9, 0.05).await;
    h.flags
        .set("tenant-t", flags::DISPATCH_KILL_SWITCH, true)
        .await
        .unwrap();

    let result = h
        .engine
        .create_ride("tenant-t", ride_request(), Some("ik-kill".to_string()))
        .await;

    assert!(matches!(result, Err(DispatchError::ServiceUnavailable)));
    assert!(h.bus.events().is_empty(), "no event may be emitted");
    assert!(h
        .store
        .find_by_idempotency_key("tenant-t", "ik-kill")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn same_key_same_body_replays_without_a_second_row() {
    let h = harness();
    seed_driver(&h.geo, "drv_001", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.9, 0.05).await;

    let first = h
        .engine
        .create_ride("default", ride_request(), Some("ik-1".to_string()))
        .await
        .unwrap();
    let second = h
        .engine
        .create_ride("default", ride_request(), Some("ik-1".to_string()))
        .await
        .unwrap();

    assert_eq!(first.ride_id, second.ride_id);
    assert_eq!(h.bus.topic_events(topics::RIDE_REQUESTED).len(), 1);
    assert_eq!(offer_events(&h.bus).len(), 1);
}

#[tokio::test]
async fn same_key_divergent_body_conflicts() {
    let h = harness();
    seed_driver(&h.geo, "drv_001", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.9, 0.05).await;

    h.engine
        .create_ride("default", ride_request(), Some("ik-1".to_string()))
        .await
        .unwrap();

    let mut divergent = ride_request();
    divergent.destination_lat += 1.0;
    let result = h
        .engine
        .create_ride("default", divergent, Some("ik-1".to_string()))
        .await;

    assert!(matches!(result, Err(DispatchError::IdempotencyConflict)));
}

#[tokio::test]
async fn empty_candidate_pool_settles_as_no_driver_found() {
    let h = harness();

    let summary = h
        .engine
        .create_ride("default", ride_request(), None)
        .await
        .unwrap();

    assert_eq!(summary.status, RideStatus::NoDriverFound);
    let events = h.bus.topic_events(topics::RIDE_NO_DRIVER_FOUND);
    assert_eq!(events.len(), 1);
    let payload: RideStatusChangedEvent = serde_json::from_slice(&events[0].payload).unwrap();
    assert_eq!(payload.reason.as_deref(), Some("NO_DRIVERS_AVAILABLE"));
}

#[tokio::test]
async fn tier_filter_rejects_lower_tiers_and_admits_higher() {
    let h = harness();
    seed_driver(&h.geo, "economy", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.9, 0.05).await;
    seed_driver(&h.geo, "premium", PICKUP.0 + 0.01, PICKUP.1, VehicleTier::Premium, 4.9, 0.05).await;

    let mut request = ride_request();
    request.tier = VehicleTier::Comfort;
    let summary = h.engine.create_ride("default", request, None).await.unwrap();

    assert_eq!(summary.status, RideStatus::Dispatching);
    let offers = offer_events(&h.bus);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].driver_id, "premium", "only the higher tier qualifies");
}

#[tokio::test]
async fn timed_out_offer_is_closed_and_reassigned_by_the_sweep() {
    let h = harness_with(DispatchConfig {
        default_region: REGION.to_string(),
        // Zero TTL: offers expire as soon as the sweep observes them.
        offer_ttl: Duration::from_secs(0),
        ..DispatchConfig::default()
    });
    seed_driver(&h.geo, "drv_a", PICKUP.0 + 0.0045, PICKUP.1, VehicleTier::Economy, 4.5, 0.1).await;
    seed_driver(&h.geo, "drv_b", PICKUP.0 + 0.018, PICKUP.1, VehicleTier::Economy, 4.5, 0.1).await;

    let summary = h.engine.create_ride("default", ride_request(), None).await.unwrap();
    let scheduler = OfferTimeoutScheduler::new(h.store.clone(), h.engine.clone());
    scheduler.sweep().await;

    let rows = h.store.offers_for(summary.ride_id);
    assert_eq!(rows.len(), 2);
    let timed_out: Vec<&DriverOffer> =
        rows.iter().filter(|o| o.response == Some(OfferResponse::Timeout)).collect();
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].driver_id, "drv_a");

    let offers = offer_events(&h.bus);
    assert_eq!(offers[1].driver_id, "drv_b");
    assert_eq!(offers[1].attempt_number, 2);
}

#[tokio::test]
async fn attempts_are_bounded_at_three() {
    let h = harness();
    for (i, id) in ["drv_a", "drv_b", "drv_c", "drv_d"].iter().enumerate() {
        seed_driver(
            &h.geo,
            id,
            PICKUP.0 + 0.004 * (i as f64 + 1.0),
            PICKUP.1,
            VehicleTier::Economy,
            4.5,
            0.1,
        )
        .await;
    }

    let summary = h.engine.create_ride("default", ride_request(), None).await.unwrap();
    h.engine.decline(summary.ride_id, "drv_a").await.unwrap();
    h.engine.decline(summary.ride_id, "drv_b").await.unwrap();
    let after_third = h.engine.decline(summary.ride_id, "drv_c").await.unwrap();

    // Three attempts consumed; drv_d never gets an offer.
    assert_eq!(after_third.status, RideStatus::NoDriverFound);
    assert_eq!(offer_events(&h.bus).len(), 3);
}

#[tokio::test]
async fn accepted_ride_walks_the_full_lifecycle() {
    let h = harness();
    seed_driver(&h.geo, "drv_001", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.9, 0.05).await;

    let summary = h.engine.create_ride("default", ride_request(), None).await.unwrap();
    let accepted = h.engine.accept(summary.ride_id, "drv_001").await.unwrap();
    assert_eq!(accepted.status, RideStatus::Accepted);
    assert_eq!(accepted.assigned_driver_id.as_deref(), Some("drv_001"));

    // Exactly one ACCEPTED offer exists for the ride.
    let rows = h.store.offers_for(summary.ride_id);
    let accepted_offers =
        rows.iter().filter(|o| o.response == Some(OfferResponse::Accepted)).count();
    assert_eq!(accepted_offers, 1);

    // A stranger cannot drive the lifecycle.
    let stranger = h.engine.driver_arrived(summary.ride_id, "drv_999").await;
    assert!(matches!(stranger, Err(DispatchError::UnauthorizedDriver { .. })));

    let arrived = h.engine.driver_arrived(summary.ride_id, "drv_001").await.unwrap();
    assert_eq!(arrived.status, RideStatus::DriverArrived);

    // start is only legal from DRIVER_ARRIVED, in order.
    let started = h.engine.start(summary.ride_id, "drv_001").await.unwrap();
    assert_eq!(started.status, RideStatus::InProgress);

    let cancel = h.engine.cancel(summary.ride_id, "usr_101").await;
    assert!(matches!(cancel, Err(DispatchError::CannotCancel)));

    assert_eq!(
        h.bus.topic_sequence().last().map(String::as_str),
        Some(topics::RIDE_IN_PROGRESS)
    );
}

#[tokio::test]
async fn start_requires_arrival_first() {
    let h = harness();
    seed_driver(&h.geo, "drv_001", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.9, 0.05).await;

    let summary = h.engine.create_ride("default", ride_request(), None).await.unwrap();
    h.engine.accept(summary.ride_id, "drv_001").await.unwrap();

    let early = h.engine.start(summary.ride_id, "drv_001").await;
    assert!(matches!(early, Err(DispatchError::InvalidState(_))));
}

#[tokio::test]
async fn cancel_before_acceptance_clears_the_ride() {
    let h = harness();
    seed_driver(&h.geo, "drv_001", PICKUP.0, PICKUP.1, VehicleTier::Economy, 4.9, 0.05).await;

    let summary = h.engine.create_ride("default", ride_request(), None).await.unwrap();
    let cancelled = h.engine.cancel(summary.ride_id, "usr_101").await.unwrap();
    assert_eq!(cancelled.status, RideStatus::Cancelled);
    assert_eq!(cancelled.assigned_driver_id, None);

    // Cancel is idempotent on an already-cancelled ride.
    let again = h.engine.cancel(summary.ride_id, "usr_101").await.unwrap();
    assert_eq!(again.status, RideStatus::Cancelled);

    // A settled ride is never re-dispatched by the sweep.
    let scheduler = OfferTimeoutScheduler::new(h.store.clone(), h.engine.clone());
    scheduler.sweep().await;
    assert_eq!(offer_events(&h.bus).len(), 1);
}

#[tokio::test]
async fn unknown_ride_is_a_clean_not_found() {
    let h = harness();
    let missing = h.engine.get(RideId::new()).await;
    assert!(matches!(missing, Err(DispatchError::RideNotFound(_))));
}

//! Dispatch orchestration: ride creation, the offer loop, and driver-facing
//! lifecycle transitions.
//!
//! The dispatch flow:
//!
//! 1. validate the kill switch and idempotency key, persist the ride at PENDING
//! 2. publish `ride.requested`
//! 3. under the per-ride lock, rank candidates and open an exclusive offer
//! 4. set the 15 s offer sentinel and publish `driver.offer.sent`
//! 5. accept/decline/timeout feed back until ACCEPTED or attempts run out
//!
//! Event emission is at-least-once and never fails a request: a broken bus
//! degrades to logs, not 5xx.

use crate::candidates::CandidateFinder;
use crate::error::DispatchError;
use crate::model::{NewRide, Ride, RideRequest, RideSummary};
use crate::store::{DispatchStore, StoreError};
use chrono::Utc;
use rideflow_core::events::{DriverOfferSentEvent, RideRequestedEvent, RideStatusChangedEvent};
use rideflow_core::{idempotency, topics, BusEvent, DriverStatus, EventBus, OfferResponse, RideId, RideStatus};
use rideflow_kv::idempotency_cache::IDEMPOTENCY_TTL;
use rideflow_kv::{flags, mutex, FeatureFlagStore, GeoIndex, IdempotencyCache, LockManager};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Service namespace used for idempotency cache keys.
const IDEMPOTENCY_SERVICE: &str = "dispatch";

/// Tunables for the dispatch loop.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Region assumed when a request does not name one.
    pub default_region: String,
    /// Dispatch attempts before NO_DRIVER_FOUND.
    pub max_attempts: i32,
    /// Offer validity window.
    pub offer_ttl: Duration,
    /// How long to wait for the per-ride dispatch lock.
    pub lock_wait: Duration,
    /// Dispatch lock lease; bounds the critical section on holder crash.
    pub lock_lease: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_region: "default".to_string(),
            max_attempts: 3,
            offer_ttl: Duration::from_secs(15),
            lock_wait: Duration::from_secs(2),
            lock_lease: Duration::from_secs(5),
        }
    }
}

/// Idempotency cache value: the stored response plus the request hash that
/// produced it.
#[derive(Serialize, Deserialize)]
struct CachedCreateResponse {
    request_hash: String,
    summary: RideSummary,
}

/// The dispatch engine.
pub struct DispatchEngine {
    store: Arc<dyn DispatchStore>,
    finder: CandidateFinder,
    geo: Arc<dyn GeoIndex>,
    locks: Arc<dyn LockManager>,
    flags: Arc<dyn FeatureFlagStore>,
    idempotency: Arc<dyn IdempotencyCache>,
    bus: Arc<dyn EventBus>,
    config: DispatchConfig,
}

impl DispatchEngine {
    /// Wires the engine to its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DispatchStore>,
        geo: Arc<dyn GeoIndex>,
        locks: Arc<dyn LockManager>,
        flags: Arc<dyn FeatureFlagStore>,
        idempotency: Arc<dyn IdempotencyCache>,
        bus: Arc<dyn EventBus>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            finder: CandidateFinder::new(Arc::clone(&geo), Arc::clone(&flags)),
            geo,
            locks,
            flags,
            idempotency,
            bus,
            config,
        }
    }

    /// Create a ride and run the first dispatch attempt.
    ///
    /// Replays of the same idempotency key with the same body return the
    /// stored ride; a divergent body is a conflict.
    ///
    /// # Errors
    ///
    /// `SERVICE_UNAVAILABLE` when the tenant's kill switch is on,
    /// `IDEMPOTENCY_CONFLICT` on divergent replay, plus storage errors.
    pub async fn create_ride(
        &self,
        tenant_id: &str,
        request: RideRequest,
        idempotency_key: Option<String>,
    ) -> Result<RideSummary, DispatchError> {
        if self
            .flags
            .is_enabled(tenant_id, flags::DISPATCH_KILL_SWITCH, false)
            .await
        {
            metrics::counter!("dispatch.kill_switch_rejections").increment(1);
            return Err(DispatchError::ServiceUnavailable);
        }

        let request_hash = idempotency_key
            .as_ref()
            .map(|_| Self::request_hash(tenant_id, &request));

        if let (Some(key), Some(hash)) = (&idempotency_key, &request_hash) {
            if let Some(summary) = self.replay_from_cache(key, hash).await? {
                return Ok(summary);
            }
            if let Some(existing) = self.store.find_by_idempotency_key(tenant_id, key).await? {
                return Self::replay_existing(&existing, hash);
            }
        }

        let region_id = request
            .region_id
            .clone()
            .unwrap_or_else(|| self.config.default_region.clone());

        let ride = match self
            .store
            .insert_ride(NewRide {
                rider_id: request.rider_id.clone(),
                tenant_id: tenant_id.to_string(),
                region_id: region_id.clone(),
                pickup_lat: request.pickup_lat,
                pickup_lng: request.pickup_lng,
                destination_lat: request.destination_lat,
                destination_lng: request.destination_lng,
                tier: request.tier,
                payment_method: request.payment_method.clone(),
                idempotency_key: idempotency_key.clone(),
                request_hash: request_hash.clone(),
            })
            .await
        {
            Ok(ride) => ride,
            Err(StoreError::DuplicateIdempotencyKey) => {
                // Lost a same-key insert race; serve the winner's row.
                let key = idempotency_key.as_deref().unwrap_or_default();
                let existing = self
                    .store
                    .find_by_idempotency_key(tenant_id, key)
                    .await?
                    .ok_or(StoreError::DuplicateIdempotencyKey)?;
                let hash = request_hash.as_deref().unwrap_or_default();
                return Self::replay_existing(&existing, hash);
            }
            Err(e) => return Err(e.into()),
        };

        self.emit(
            topics::RIDE_REQUESTED,
            &ride.id.to_string(),
            &RideRequestedEvent {
                ride_id: ride.id,
                rider_id: ride.rider_id.clone(),
                tenant_id: ride.tenant_id.clone(),
                region_id: ride.region_id.clone(),
                pickup_lat: ride.pickup_lat,
                pickup_lng: ride.pickup_lng,
                destination_lat: ride.destination_lat,
                destination_lng: ride.destination_lng,
                tier: ride.tier,
                payment_method: ride.payment_method.clone(),
                idempotency_key: idempotency_key.clone(),
                requested_at: Utc::now(),
            },
        )
        .await;
        metrics::counter!("dispatch.rides_created").increment(1);

        self.dispatch_next(ride.id, HashSet::new()).await?;

        let fresh = self.require(ride.id).await?;
        let summary = RideSummary::from(&fresh);

        if let (Some(key), Some(hash)) = (&idempotency_key, &request_hash) {
            let cached = CachedCreateResponse {
                request_hash: hash.clone(),
                summary: summary.clone(),
            };
            if let Ok(json) = serde_json::to_string(&cached) {
                if let Err(e) = self
                    .idempotency
                    .put(IDEMPOTENCY_SERVICE, key, &json, IDEMPOTENCY_TTL)
                    .await
                {
                    tracing::warn!(error = %e, "idempotency cache write failed");
                }
            }
        }

        Ok(summary)
    }

    /// Run one dispatch attempt for a ride, excluding `tried` drivers.
    ///
    /// Re-entered from declines and from the offer timeout sweep. If the
    /// per-ride lock cannot be acquired within the wait budget, the attempt
    /// is skipped silently — another worker owns it.
    ///
    /// # Errors
    ///
    /// Returns storage/KV errors; a lost lock race is not an error.
    pub async fn dispatch_next(
        &self,
        ride_id: RideId,
        tried: HashSet<String>,
    ) -> Result<(), DispatchError> {
        let lock_name = mutex::ride_lock_key(&ride_id.to_string());
        let Some(token) = self
            .locks
            .try_acquire(&lock_name, self.config.lock_wait, self.config.lock_lease)
            .await?
        else {
            tracing::warn!(ride_id = %ride_id, "could not acquire dispatch lock, skipping attempt");
            return Ok(());
        };

        let result = self.offer_next_candidate(ride_id, tried).await;

        if let Err(e) = self.locks.release(&lock_name, &token).await {
            tracing::warn!(ride_id = %ride_id, error = %e, "failed to release dispatch lock");
        }
        result
    }

    async fn offer_next_candidate(
        &self,
        ride_id: RideId,
        tried: HashSet<String>,
    ) -> Result<(), DispatchError> {
        // Re-read under the lock; the row may have moved since the caller saw it.
        let fresh = self.require(ride_id).await?;

        if matches!(
            fresh.status,
            RideStatus::Accepted
                | RideStatus::Cancelled
                | RideStatus::Completed
                | RideStatus::NoDriverFound
        ) {
            tracing::info!(ride_id = %ride_id, status = %fresh.status, "ride already settled, skipping dispatch");
            return Ok(());
        }

        if fresh.attempt_count >= self.config.max_attempts {
            self.mark_no_driver_found(&fresh).await?;
            return Ok(());
        }

        // Never re-offer a driver this ride has already seen.
        let mut exclude = tried;
        exclude.extend(self.store.offered_driver_ids(ride_id).await?);

        let candidates = self
            .finder
            .find(
                &fresh.tenant_id,
                &fresh.region_id,
                fresh.pickup_lat,
                fresh.pickup_lng,
                fresh.tier,
                &exclude,
            )
            .await?;

        let Some(best) = candidates.first() else {
            self.mark_no_driver_found(&fresh).await?;
            return Ok(());
        };

        let attempt = fresh.attempt_count + 1;
        let (ride, offer) = match self
            .store
            .record_offer(
                ride_id,
                fresh.version,
                &best.driver_id,
                attempt,
                self.config.offer_ttl.as_secs() as i64,
            )
            .await
        {
            Ok(pair) => pair,
            Err(StoreError::VersionConflict(_)) => {
                tracing::warn!(ride_id = %ride_id, "ride moved under us, skipping offer");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.geo
            .set_status(&best.driver_id, DriverStatus::Dispatching)
            .await?;
        self.locks
            .acquire_sentinel(
                &mutex::offer_sentinel_key(&ride_id.to_string(), &best.driver_id),
                self.config.offer_ttl,
            )
            .await?;

        self.emit(
            topics::DRIVER_OFFER_SENT,
            &ride_id.to_string(),
            &DriverOfferSentEvent {
                ride_id,
                driver_id: best.driver_id.clone(),
                tenant_id: ride.tenant_id.clone(),
                region_id: ride.region_id.clone(),
                attempt_number: offer.attempt_number,
                ttl_seconds: offer.ttl_seconds,
                offered_at: offer.offered_at,
            },
        )
        .await;
        metrics::counter!("dispatch.offers_sent").increment(1);

        tracing::info!(
            ride_id = %ride_id,
            driver_id = %best.driver_id,
            attempt,
            max_attempts = self.config.max_attempts,
            "offer sent"
        );
        Ok(())
    }

    /// Driver accepts an open offer.
    ///
    /// # Errors
    ///
    /// `INVALID_STATE` unless the ride is DISPATCHING;
    /// `RIDE_ALREADY_ACCEPTED` when another driver won the version race.
    pub async fn accept(
        &self,
        ride_id: RideId,
        driver_id: &str,
    ) -> Result<RideSummary, DispatchError> {
        let ride = self.require(ride_id).await?;
        if ride.status != RideStatus::Dispatching {
            return Err(DispatchError::InvalidState(
                "ride is not in DISPATCHING state".to_string(),
            ));
        }

        let updated = match self
            .store
            .transition(ride_id, ride.version, RideStatus::Accepted, Some(driver_id))
            .await
        {
            Ok(ride) => ride,
            Err(StoreError::VersionConflict(_)) => {
                return Err(DispatchError::RideAlreadyAccepted(ride_id));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(offer) = self.store.open_offer(ride_id, driver_id).await? {
            self.store
                .respond_offer(offer.id, OfferResponse::Accepted)
                .await?;
        }
        self.geo.set_status(driver_id, DriverStatus::OnTrip).await?;

        self.publish_status_change(&updated, Some(driver_id), None, topics::RIDE_ACCEPTED)
            .await;
        metrics::counter!("dispatch.offers_accepted").increment(1);
        tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "ride accepted");

        Ok(RideSummary::from(&updated))
    }

    /// Driver declines an open offer; the ride re-dispatches immediately
    /// with the decliner excluded.
    ///
    /// # Errors
    ///
    /// `RIDE_NOT_FOUND` plus storage errors from the re-dispatch.
    pub async fn decline(
        &self,
        ride_id: RideId,
        driver_id: &str,
    ) -> Result<RideSummary, DispatchError> {
        let ride = self.require(ride_id).await?;

        if let Some(offer) = self.store.open_offer(ride_id, driver_id).await? {
            self.store
                .respond_offer(offer.id, OfferResponse::Declined)
                .await?;
        }
        self.geo.set_status(driver_id, DriverStatus::Idle).await?;

        self.publish_status_change(
            &ride,
            Some(driver_id),
            Some("DECLINED"),
            topics::RIDE_DECLINED,
        )
        .await;
        metrics::counter!("dispatch.offers_declined").increment(1);
        tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "ride declined, reassigning");

        let mut tried = HashSet::new();
        tried.insert(driver_id.to_string());
        self.dispatch_next(ride_id, tried).await?;

        let fresh = self.require(ride_id).await?;
        Ok(RideSummary::from(&fresh))
    }

    /// Assigned driver reports arrival at the pickup point.
    ///
    /// # Errors
    ///
    /// `INVALID_STATE` unless ACCEPTED; `UNAUTHORIZED_DRIVER` for anyone but
    /// the assigned driver.
    pub async fn driver_arrived(
        &self,
        ride_id: RideId,
        driver_id: &str,
    ) -> Result<RideSummary, DispatchError> {
        let ride = self.require(ride_id).await?;
        if ride.status != RideStatus::Accepted {
            return Err(DispatchError::InvalidState(format!(
                "cannot mark arrival: ride is {}, expected ACCEPTED",
                ride.status
            )));
        }
        Self::require_assigned(&ride, driver_id)?;

        let updated = self
            .transition_or_invalid(ride_id, ride.version, RideStatus::DriverArrived, driver_id)
            .await?;
        self.publish_status_change(&updated, Some(driver_id), None, topics::RIDE_DRIVER_ARRIVED)
            .await;
        tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "driver arrived");
        Ok(RideSummary::from(&updated))
    }

    /// Assigned driver starts the trip.
    ///
    /// # Errors
    ///
    /// `INVALID_STATE` unless DRIVER_ARRIVED; `UNAUTHORIZED_DRIVER` for
    /// anyone but the assigned driver.
    pub async fn start(
        &self,
        ride_id: RideId,
        driver_id: &str,
    ) -> Result<RideSummary, DispatchError> {
        let ride = self.require(ride_id).await?;
        if ride.status != RideStatus::DriverArrived {
            return Err(DispatchError::InvalidState(format!(
                "cannot start trip: ride is {}, expected DRIVER_ARRIVED",
                ride.status
            )));
        }
        Self::require_assigned(&ride, driver_id)?;

        let updated = self
            .transition_or_invalid(ride_id, ride.version, RideStatus::InProgress, driver_id)
            .await?;
        self.publish_status_change(&updated, Some(driver_id), None, topics::RIDE_IN_PROGRESS)
            .await;
        tracing::info!(ride_id = %ride_id, driver_id = %driver_id, "ride in progress");
        Ok(RideSummary::from(&updated))
    }

    /// Cancel a ride that has not started yet.
    ///
    /// Terminal states are absorbing: a cancelled ride replays its summary,
    /// any other settled ride is an `INVALID_STATE`.
    ///
    /// # Errors
    ///
    /// `CANNOT_CANCEL` when IN_PROGRESS; `INVALID_STATE` when already settled.
    pub async fn cancel(
        &self,
        ride_id: RideId,
        requester_id: &str,
    ) -> Result<RideSummary, DispatchError> {
        let ride = self.require(ride_id).await?;
        match ride.status {
            RideStatus::InProgress => return Err(DispatchError::CannotCancel),
            RideStatus::Cancelled => return Ok(RideSummary::from(&ride)),
            status if status.is_terminal() => {
                return Err(DispatchError::InvalidState(format!(
                    "cannot cancel: ride is already {status}"
                )));
            }
            _ => {}
        }

        let updated = self
            .store
            .transition(ride_id, ride.version, RideStatus::Cancelled, None)
            .await
            .map_err(|e| match e {
                StoreError::VersionConflict(id) => DispatchError::InvalidState(format!(
                    "ride {id} was concurrently modified, retry the cancel"
                )),
                other => other.into(),
            })?;

        self.publish_status_change(&updated, None, Some("USER_CANCELLED"), topics::RIDE_CANCELLED)
            .await;
        tracing::info!(ride_id = %ride_id, requester_id = %requester_id, "ride cancelled");
        Ok(RideSummary::from(&updated))
    }

    /// Read one ride's summary.
    ///
    /// # Errors
    ///
    /// `RIDE_NOT_FOUND` for unknown ids.
    pub async fn get(&self, ride_id: RideId) -> Result<RideSummary, DispatchError> {
        let ride = self.require(ride_id).await?;
        Ok(RideSummary::from(&ride))
    }

    // --- helpers ---

    fn request_hash(tenant_id: &str, request: &RideRequest) -> String {
        // Tenant is part of the canonical body: the same key under two
        // tenants must never alias.
        let canonical = serde_json::to_vec(&(tenant_id, request)).unwrap_or_default();
        idempotency::hash_payload(&canonical)
    }

    async fn replay_from_cache(
        &self,
        key: &str,
        request_hash: &str,
    ) -> Result<Option<RideSummary>, DispatchError> {
        let cached = match self.idempotency.get(IDEMPOTENCY_SERVICE, key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "idempotency cache read failed");
                return Ok(None);
            }
        };
        let Some(json) = cached else { return Ok(None) };
        let Ok(entry) = serde_json::from_str::<CachedCreateResponse>(&json) else {
            return Ok(None);
        };
        if entry.request_hash != request_hash {
            return Err(DispatchError::IdempotencyConflict);
        }
        metrics::counter!("dispatch.idempotent_replays").increment(1);
        tracing::info!(key = %key, "idempotent replay served from cache");
        Ok(Some(entry.summary))
    }

    fn replay_existing(ride: &Ride, request_hash: &str) -> Result<RideSummary, DispatchError> {
        if let Some(stored) = &ride.request_hash {
            if stored != request_hash {
                return Err(DispatchError::IdempotencyConflict);
            }
        }
        metrics::counter!("dispatch.idempotent_replays").increment(1);
        tracing::info!(ride_id = %ride.id, "idempotent replay served from store");
        Ok(RideSummary::from(ride))
    }

    async fn require(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        self.store
            .fetch_ride(ride_id)
            .await?
            .ok_or(DispatchError::RideNotFound(ride_id))
    }

    fn require_assigned(ride: &Ride, driver_id: &str) -> Result<(), DispatchError> {
        if ride.assigned_driver_id.as_deref() != Some(driver_id) {
            return Err(DispatchError::UnauthorizedDriver {
                driver_id: driver_id.to_string(),
                ride_id: ride.id,
            });
        }
        Ok(())
    }

    async fn transition_or_invalid(
        &self,
        ride_id: RideId,
        expected_version: i64,
        status: RideStatus,
        driver_id: &str,
    ) -> Result<Ride, DispatchError> {
        self.store
            .transition(ride_id, expected_version, status, Some(driver_id))
            .await
            .map_err(|e| match e {
                StoreError::VersionConflict(id) => DispatchError::InvalidState(format!(
                    "ride {id} was concurrently modified, retry"
                )),
                other => other.into(),
            })
    }

    async fn mark_no_driver_found(&self, ride: &Ride) -> Result<(), DispatchError> {
        let updated = match self
            .store
            .transition(ride.id, ride.version, RideStatus::NoDriverFound, None)
            .await
        {
            Ok(updated) => updated,
            Err(StoreError::VersionConflict(_)) => {
                tracing::warn!(ride_id = %ride.id, "ride moved before NO_DRIVER_FOUND could be recorded");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.publish_status_change(
            &updated,
            None,
            Some("NO_DRIVERS_AVAILABLE"),
            topics::RIDE_NO_DRIVER_FOUND,
        )
        .await;
        metrics::counter!("dispatch.no_driver_found").increment(1);
        tracing::warn!(ride_id = %ride.id, "no driver found");
        Ok(())
    }

    async fn publish_status_change(
        &self,
        ride: &Ride,
        driver_id: Option<&str>,
        reason: Option<&str>,
        topic: &str,
    ) {
        self.emit(
            topic,
            &ride.id.to_string(),
            &RideStatusChangedEvent {
                ride_id: ride.id,
                rider_id: ride.rider_id.clone(),
                driver_id: driver_id.map(ToString::to_string),
                tenant_id: ride.tenant_id.clone(),
                region_id: ride.region_id.clone(),
                status: ride.status,
                reason: reason.map(ToString::to_string),
                changed_at: Utc::now(),
            },
        )
        .await;
    }

    /// Publish with at-least-once semantics; a bus failure is logged, never
    /// surfaced to the caller.
    async fn emit<T: serde::Serialize>(&self, topic: &str, key: &str, payload: &T) {
        match BusEvent::json(topic, key, payload) {
            Ok(event) => {
                if let Err(e) = self.bus.publish(&event).await {
                    tracing::error!(topic = %topic, key = %key, error = %e, "event publish failed");
                }
            }
            Err(e) => {
                tracing::error!(topic = %topic, key = %key, error = %e, "event serialization failed");
            }
        }
    }
}

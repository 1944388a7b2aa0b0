//! Region-scoped driver geo index with a TTL'd metadata map.
//!
//! Two co-located structures per region:
//!
//! 1. a geospatial set `drivers:geo:{region}` answering radius queries with
//!    (driver id, distance km) pairs in ascending distance order, and
//! 2. a per-driver hash `driver:{id}` holding status, tier, rating,
//!    decline rate, and position, expiring 30 s after the last update.
//!
//! Geo set members are never deleted explicitly; a driver that stops
//! updating simply loses its metadata hash, and readers treat a missing
//! hash as "not available". A region change is a plain upsert into the new
//! region's set.

use crate::error::KvError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::geo::{Coord, RadiusOptions, RadiusOrder, RadiusSearchResult, Unit};
use redis::AsyncCommands;
use rideflow_core::{DriverStatus, VehicleTier};
use std::collections::HashMap;
use std::str::FromStr;

/// Seconds a driver stays visible without a location update.
pub const DRIVER_TTL_SECONDS: i64 = 30;

/// A full location + metadata update for one driver.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverLocationUpdate {
    /// Driver id.
    pub driver_id: String,
    /// Region the driver is operating in.
    pub region_id: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
    /// Availability status.
    pub status: DriverStatus,
    /// Vehicle tier.
    pub tier: VehicleTier,
    /// Driver rating.
    pub rating: f64,
    /// Fraction of offers the driver declines.
    pub decline_rate: f64,
}

/// Driver metadata as read back from the KV store.
///
/// Fields are optional because partial writes and hand-seeded test data are
/// possible; readers apply their own defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DriverMetadata {
    /// Availability status.
    pub status: Option<DriverStatus>,
    /// Vehicle tier.
    pub tier: Option<VehicleTier>,
    /// Driver rating.
    pub rating: Option<f64>,
    /// Decline rate.
    pub decline_rate: Option<f64>,
    /// Region the driver last reported from.
    pub region_id: Option<String>,
    /// Instant of the last update.
    pub last_seen: Option<DateTime<Utc>>,
}

/// Region-scoped nearest-neighbor lookup with per-driver metadata.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    /// Idempotent last-write-wins upsert; resets the metadata TTL.
    async fn upsert(&self, update: DriverLocationUpdate) -> Result<(), KvError>;

    /// Drivers within `radius_km` of the point, ascending by distance,
    /// capped at `limit`. Never returns drivers from another region.
    async fn radius(
        &self,
        region_id: &str,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, KvError>;

    /// Metadata for a driver, or `None` if expired or never written.
    async fn metadata(&self, driver_id: &str) -> Result<Option<DriverMetadata>, KvError>;

    /// Partial status update; leaves the metadata TTL intact.
    async fn set_status(&self, driver_id: &str, status: DriverStatus) -> Result<(), KvError>;
}

fn geo_key(region_id: &str) -> String {
    format!("drivers:geo:{region_id}")
}

fn driver_key(driver_id: &str) -> String {
    format!("driver:{driver_id}")
}

/// Redis-backed [`GeoIndex`].
#[derive(Clone)]
pub struct RedisGeoIndex {
    conn: ConnectionManager,
}

impl RedisGeoIndex {
    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl GeoIndex for RedisGeoIndex {
    async fn upsert(&self, update: DriverLocationUpdate) -> Result<(), KvError> {
        let mut conn = self.conn.clone();

        let _: () = conn
            .geo_add(
                geo_key(&update.region_id),
                (Coord::lon_lat(update.lng, update.lat), &update.driver_id),
            )
            .await?;

        let hash_key = driver_key(&update.driver_id);
        let fields: Vec<(&str, String)> = vec![
            ("status", update.status.as_str().to_string()),
            ("tier", update.tier.as_str().to_string()),
            ("rating", update.rating.to_string()),
            ("decline_rate", update.decline_rate.to_string()),
            ("region_id", update.region_id.clone()),
            ("last_seen", Utc::now().to_rfc3339()),
            ("lat", update.lat.to_string()),
            ("lng", update.lng.to_string()),
        ];

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&hash_key, &fields)
            .ignore()
            .expire(&hash_key, DRIVER_TTL_SECONDS)
            .ignore()
            .query_async(&mut conn)
            .await?;

        tracing::debug!(
            driver_id = %update.driver_id,
            region_id = %update.region_id,
            "driver location upserted"
        );
        Ok(())
    }

    async fn radius(
        &self,
        region_id: &str,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: usize,
    ) -> Result<Vec<(String, f64)>, KvError> {
        let mut conn = self.conn.clone();

        let options = RadiusOptions::default()
            .with_dist()
            .order(RadiusOrder::Asc)
            .limit(limit);

        let results: Vec<RadiusSearchResult> = conn
            .geo_radius(geo_key(region_id), lng, lat, radius_km, Unit::Kilometers, options)
            .await?;

        Ok(results
            .into_iter()
            .map(|r| {
                let dist = r.dist.unwrap_or(0.0);
                (r.name, dist)
            })
            .collect())
    }

    async fn metadata(&self, driver_id: &str) -> Result<Option<DriverMetadata>, KvError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(driver_key(driver_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(parse_metadata(&map)))
    }

    async fn set_status(&self, driver_id: &str, status: DriverStatus) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        // Plain HSET: does not touch the key's TTL.
        let _: () = conn
            .hset(driver_key(driver_id), "status", status.as_str())
            .await?;
        Ok(())
    }
}

fn parse_metadata(map: &HashMap<String, String>) -> DriverMetadata {
    DriverMetadata {
        status: map
            .get("status")
            .and_then(|s| DriverStatus::from_str(s).ok()),
        tier: map.get("tier").and_then(|s| VehicleTier::from_str(s).ok()),
        rating: map.get("rating").and_then(|s| s.parse().ok()),
        decline_rate: map.get("decline_rate").and_then(|s| s.parse().ok()),
        region_id: map.get("region_id").cloned(),
        last_seen: map
            .get("last_seen")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc)),
    }
}

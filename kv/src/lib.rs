//! Redis-backed shared stores for the rideflow platform.
//!
//! Each concern is a trait with two implementations: a Redis store for
//! production and an in-memory store (in [`memory`]) for tests and local
//! runs without infrastructure.
//!
//! - [`geo_index`] — region-scoped nearest-neighbor driver lookup plus a
//!   per-driver metadata map with a 30 s TTL
//! - [`mutex`] — named locks with wait/lease semantics and offer TTL sentinels
//! - [`flags`] — per-tenant boolean feature flags with a global fallback
//! - [`surge_window`] — per-cell sliding window of supply/demand snapshots
//!   and the multiplier cache
//! - [`idempotency_cache`] — hot-path cache of idempotent responses
//!
//! Region isolation is enforced purely by key namespacing: every geo key
//! embeds the region id, so queries never cross regions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod flags;
pub mod geo_index;
pub mod idempotency_cache;
pub mod memory;
pub mod mutex;
pub mod surge_window;

pub use error::KvError;
pub use flags::FeatureFlagStore;
pub use geo_index::{DriverLocationUpdate, DriverMetadata, GeoIndex};
pub use idempotency_cache::IdempotencyCache;
pub use mutex::LockManager;
pub use surge_window::{SurgeWindowStore, WindowEntry};

use redis::aio::ConnectionManager;
use redis::Client;

/// Opens a shared Redis connection manager for the store implementations.
///
/// # Errors
///
/// Returns [`KvError::Backend`] if the client cannot be created or the
/// initial connection fails.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, KvError> {
    let client = Client::open(redis_url)
        .map_err(|e| KvError::Backend(format!("failed to create Redis client: {e}")))?;
    ConnectionManager::new(client)
        .await
        .map_err(|e| KvError::Backend(format!("failed to create Redis connection manager: {e}")))
}

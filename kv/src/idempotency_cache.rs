//! Hot-path cache of idempotent responses.
//!
//! Key pattern `idempotency:{service}:{key}`, 24 h TTL. The relational
//! unique index remains the source of truth for replay detection; this cache
//! only short-circuits the common same-key retry without a database round
//! trip. Values carry the request hash alongside the stored response so a
//! divergent replay is still detected on the hot path.

use crate::error::KvError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rideflow_core::idempotency;
use std::time::Duration;

/// Default TTL for cached idempotent responses.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache of serialized responses keyed by (service, idempotency key).
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Read a cached value.
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, KvError>;

    /// Store a value with the given TTL.
    async fn put(
        &self,
        service: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), KvError>;
}

/// Redis-backed [`IdempotencyCache`].
#[derive(Clone)]
pub struct RedisIdempotencyCache {
    conn: ConnectionManager,
}

impl RedisIdempotencyCache {
    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(&self, service: &str, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(idempotency::cache_key(service, key)).await?;
        Ok(value)
    }

    async fn put(
        &self,
        service: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(idempotency::cache_key(service, key), value, ttl.as_secs())
            .await?;
        Ok(())
    }
}

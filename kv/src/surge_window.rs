//! Per-cell sliding window of supply/demand snapshots and the multiplier cache.
//!
//! The window is a sorted set `surge:window:{cell}` scored by event epoch-ms
//! whose members are `"{drivers}:{rides}"` strings. Each recompute appends
//! the newest snapshot, trims entries older than the window, and reads the
//! survivors back in ascending time order. The current multiplier lives in a
//! plain string key `surge:cell:{cell}` whose TTL matches the snapshot
//! cadence.

use crate::error::KvError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// One surviving snapshot in a cell's sliding window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowEntry {
    /// Event time in epoch milliseconds (sorted-set score).
    pub timestamp_ms: i64,
    /// Active drivers at that instant.
    pub drivers: u32,
    /// Pending rides at that instant.
    pub rides: u32,
}

/// Sliding-window snapshot store plus multiplier cache.
#[async_trait]
pub trait SurgeWindowStore: Send + Sync {
    /// Append a snapshot at `now_ms`, drop entries older than `window`, and
    /// return the remaining entries in ascending time order.
    async fn record_snapshot(
        &self,
        cell_id: &str,
        drivers: u32,
        rides: u32,
        now_ms: i64,
        window: Duration,
    ) -> Result<Vec<WindowEntry>, KvError>;

    /// Cache the current multiplier for `ttl`.
    async fn cache_multiplier(
        &self,
        cell_id: &str,
        multiplier: f64,
        ttl: Duration,
    ) -> Result<(), KvError>;

    /// Read the cached multiplier, if present and unexpired.
    async fn cached_multiplier(&self, cell_id: &str) -> Result<Option<f64>, KvError>;
}

fn window_key(cell_id: &str) -> String {
    format!("surge:window:{cell_id}")
}

fn cache_key(cell_id: &str) -> String {
    format!("surge:cell:{cell_id}")
}

/// Parses a `"{drivers}:{rides}"` member; malformed members are skipped.
fn parse_member(member: &str, score: i64) -> Option<WindowEntry> {
    let (drivers, rides) = member.split_once(':')?;
    Some(WindowEntry {
        timestamp_ms: score,
        drivers: drivers.parse().ok()?,
        rides: rides.parse().ok()?,
    })
}

/// Redis-backed [`SurgeWindowStore`].
#[derive(Clone)]
pub struct RedisSurgeWindow {
    conn: ConnectionManager,
}

impl RedisSurgeWindow {
    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SurgeWindowStore for RedisSurgeWindow {
    async fn record_snapshot(
        &self,
        cell_id: &str,
        drivers: u32,
        rides: u32,
        now_ms: i64,
        window: Duration,
    ) -> Result<Vec<WindowEntry>, KvError> {
        let mut conn = self.conn.clone();
        let key = window_key(cell_id);
        let member = format!("{drivers}:{rides}");
        let cutoff_ms = now_ms - window.as_millis() as i64;

        let _: () = redis::pipe()
            .atomic()
            .zadd(&key, &member, now_ms)
            .ignore()
            // Keep the set alive a little past the window so a quiet cell
            // cleans itself up.
            .expire(&key, window.as_secs() as i64 + 60)
            .ignore()
            .zrembyscore(&key, 0, cutoff_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;

        let raw: Vec<(String, i64)> = conn.zrange_withscores(&key, 0, -1).await?;
        Ok(raw
            .iter()
            .filter_map(|(member, score)| parse_member(member, *score))
            .collect())
    }

    async fn cache_multiplier(
        &self,
        cell_id: &str,
        multiplier: f64,
        ttl: Duration,
    ) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(cache_key(cell_id), multiplier.to_string(), ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn cached_multiplier(&self, cell_id: &str) -> Result<Option<f64>, KvError> {
        let mut conn = self.conn.clone();
        let cached: Option<String> = conn.get(cache_key(cell_id)).await?;
        Ok(cached.and_then(|v| v.parse().ok()))
    }
}

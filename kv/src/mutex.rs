//! Named distributed locks with wait/lease semantics.
//!
//! Two distinct use sites:
//!
//! 1. **Ride dispatch lock** `lock:ride:{ride_id}` — acquired with a bounded
//!    wait and a lease that auto-expires on holder crash. No watchdog
//!    renewal: a crashed holder must release by expiry.
//! 2. **Offer TTL sentinel** `offer:ttl:{ride}:{driver}` — acquired for
//!    exactly the offer TTL and never explicitly released; its presence
//!    signals that the offer is still open.
//!
//! Locks are single-writer `SET NX PX` keys. Release is compare-and-delete
//! on the holder token so an expired-and-reacquired lock is never deleted by
//! the previous holder.

use crate::error::KvError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lock key for a ride's dispatch attempts.
#[must_use]
pub fn ride_lock_key(ride_id: &str) -> String {
    format!("lock:ride:{ride_id}")
}

/// Sentinel key marking an open offer.
#[must_use]
pub fn offer_sentinel_key(ride_id: &str, driver_id: &str) -> String {
    format!("offer:ttl:{ride_id}:{driver_id}")
}

/// Named-lock manager with wait/lease semantics.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to acquire `name`, polling for up to `wait`. Returns the holder
    /// token on success, `None` when another holder kept the lock through
    /// the whole wait budget. The lock self-releases after `lease`.
    async fn try_acquire(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<String>, KvError>;

    /// Release a held lock. A mismatched token is a no-op (the lease expired
    /// and someone else holds the lock now).
    async fn release(&self, name: &str, token: &str) -> Result<(), KvError>;

    /// Set a sentinel that auto-expires after `ttl` and is never released.
    /// Overwriting an existing sentinel is allowed (re-offer paths).
    async fn acquire_sentinel(&self, name: &str, ttl: Duration) -> Result<(), KvError>;

    /// Whether a lock or sentinel currently exists.
    async fn is_locked(&self, name: &str) -> Result<bool, KvError>;
}

/// How often a blocked `try_acquire` re-polls the key.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Redis-backed [`LockManager`].
#[derive(Clone)]
pub struct RedisLockManager {
    conn: ConnectionManager,
}

impl RedisLockManager {
    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn try_acquire(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            let acquired: bool = redis::cmd("SET")
                .arg(name)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(lease.as_millis() as u64)
                .query_async(&mut conn)
                .await
                .map(|v: Option<String>| v.is_some())?;

            if acquired {
                tracing::debug!(lock = %name, "lock acquired");
                return Ok(Some(token));
            }
            if Instant::now() >= deadline {
                tracing::debug!(lock = %name, "lock wait budget exhausted");
                return Ok(None);
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL.min(wait)).await;
        }
    }

    async fn release(&self, name: &str, token: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        // Compare-and-delete: only the current holder's token may delete.
        let script = redis::Script::new(
            r"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
            ",
        );
        let deleted: i64 = script.key(name).arg(token).invoke_async(&mut conn).await?;
        if deleted == 0 {
            tracing::debug!(lock = %name, "release skipped, lease already expired");
        }
        Ok(())
    }

    async fn acquire_sentinel(&self, name: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(name, "1", ttl.as_secs()).await?;
        Ok(())
    }

    async fn is_locked(&self, name: &str) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(name).await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_patterns_match_the_platform_convention() {
        assert_eq!(ride_lock_key("r-1"), "lock:ride:r-1");
        assert_eq!(
            offer_sentinel_key("r-1", "drv_9"),
            "offer:ttl:r-1:drv_9"
        );
    }
}

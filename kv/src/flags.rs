//! Per-tenant boolean feature flags with a global fallback.
//!
//! Key pattern: `feature-flags:{tenant}` hash, field = flag name, value =
//! `"true"` / `"false"`. Lookup order: tenant hash → `global` tenant hash →
//! caller-supplied default. Reads are best-effort: a store error resolves to
//! the default rather than failing the caller, so a Redis blip never takes
//! the dispatch path down with it.
//!
//! The flag set is closed; adding a flag is a code change.

use crate::error::KvError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rideflow_core::GLOBAL_TENANT;

/// Surge calculator returns 1.0 unconditionally when false.
pub const SURGE_PRICING_ENABLED: &str = "surge_pricing_enabled";

/// Payment orchestrator skips the async PSP charge when false.
pub const AUTO_PAYMENT_CHARGE: &str = "auto_payment_charge";

/// Dispatch scoring uses the A/B weight variant when true.
pub const NEW_SCORING_ALGO: &str = "new_scoring_algo";

/// Dispatch rejects all new ride creations when true.
pub const DISPATCH_KILL_SWITCH: &str = "dispatch_kill_switch";

/// Reserved; not consumed by the core.
pub const REAL_TIME_TRACKING: &str = "real_time_tracking";

/// Per-tenant feature flag store.
#[async_trait]
pub trait FeatureFlagStore: Send + Sync {
    /// Resolve a flag: tenant value → global value → `default`.
    ///
    /// Best-effort: backend errors resolve to `default`.
    async fn is_enabled(&self, tenant_id: &str, flag: &str, default: bool) -> bool;

    /// Set a flag for a tenant.
    async fn set(&self, tenant_id: &str, flag: &str, value: bool) -> Result<(), KvError>;

    /// Write default values for any flags the tenant does not have yet.
    /// Existing values are never overwritten.
    async fn init_defaults(&self, tenant_id: &str) -> Result<(), KvError>;
}

/// TTL refreshed on the `feature-flags:{tenant}` hash by `init_defaults`.
/// Flags are long-lived; one year outlasts any restart cadence.
pub const FLAG_KEY_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

/// Default values written by [`FeatureFlagStore::init_defaults`].
pub const FLAG_DEFAULTS: [(&str, bool); 5] = [
    (SURGE_PRICING_ENABLED, true),
    (AUTO_PAYMENT_CHARGE, true),
    (NEW_SCORING_ALGO, false),
    (DISPATCH_KILL_SWITCH, false),
    (REAL_TIME_TRACKING, true),
];

fn flag_key(tenant_id: &str) -> String {
    format!("feature-flags:{tenant_id}")
}

/// Redis-backed [`FeatureFlagStore`].
#[derive(Clone)]
pub struct RedisFeatureFlags {
    conn: ConnectionManager,
}

impl RedisFeatureFlags {
    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn read(&self, tenant_id: &str, flag: &str) -> Result<Option<bool>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(flag_key(tenant_id), flag).await?;
        Ok(value.map(|v| v == "true"))
    }
}

#[async_trait]
impl FeatureFlagStore for RedisFeatureFlags {
    async fn is_enabled(&self, tenant_id: &str, flag: &str, default: bool) -> bool {
        match self.read(tenant_id, flag).await {
            Ok(Some(value)) => return value,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(tenant = %tenant_id, flag = %flag, error = %e, "flag read failed, using default");
                return default;
            }
        }
        match self.read(GLOBAL_TENANT, flag).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!(tenant = %tenant_id, flag = %flag, default, "flag not set, using default");
                default
            }
            Err(e) => {
                tracing::warn!(tenant = %tenant_id, flag = %flag, error = %e, "global flag read failed, using default");
                default
            }
        }
    }

    async fn set(&self, tenant_id: &str, flag: &str, value: bool) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(flag_key(tenant_id), flag, if value { "true" } else { "false" })
            .await?;
        tracing::info!(tenant = %tenant_id, flag = %flag, value, "feature flag set");
        Ok(())
    }

    async fn init_defaults(&self, tenant_id: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let key = flag_key(tenant_id);
        let mut pipe = redis::pipe();
        for (flag, value) in FLAG_DEFAULTS {
            pipe.hset_nx(&key, flag, if value { "true" } else { "false" })
                .ignore();
        }
        // Flags persist long-term; the yearly TTL only reclaims hashes of
        // tenants that stop booting services against this deployment.
        pipe.expire(&key, FLAG_KEY_TTL_SECONDS).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        tracing::info!(tenant = %tenant_id, "feature flag defaults initialised");
        Ok(())
    }
}

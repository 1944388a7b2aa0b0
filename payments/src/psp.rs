//! Payment Service Provider gateway.
//!
//! The PSP is the platform's one genuinely unreliable dependency; callers
//! never talk to it directly but through [`crate::charger::PspCharger`],
//! which wraps it in a circuit breaker and bounded retry.

use async_trait::async_trait;
use rideflow_core::Money;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// PSP call failures.
#[derive(Error, Debug, Clone)]
pub enum PspError {
    /// The gateway did not answer in time. Retryable.
    #[error("PSP timeout: {0}")]
    Timeout(String),

    /// The gateway is down or shedding load. Retryable.
    #[error("PSP unavailable: {0}")]
    Unavailable(String),

    /// The charge itself was rejected (bad card, insufficient funds).
    /// Not retryable: the same request will fail again.
    #[error("charge rejected: {0}")]
    Rejected(String),
}

impl PspError {
    /// True for failures worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// A successful charge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PspCharge {
    /// Provider-side reference for the captured charge.
    pub reference: String,
}

/// External payment provider.
#[async_trait]
pub trait PspGateway: Send + Sync {
    /// Charge a rider.
    ///
    /// # Errors
    ///
    /// Returns [`PspError`]; only transient variants are retried upstream.
    async fn charge(
        &self,
        rider_id: &str,
        amount: Money,
        currency: &str,
        payment_method: &str,
    ) -> Result<PspCharge, PspError>;
}

/// Stub gateway for development and tests.
///
/// Succeeds with a `PSP-…` reference; flip [`StubPspGateway::set_failing`]
/// to simulate an outage (every call times out until restored).
#[derive(Debug, Default)]
pub struct StubPspGateway {
    failing: AtomicBool,
    calls: AtomicU64,
}

impl StubPspGateway {
    /// A healthy stub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate (or end) a PSP outage.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Total charge calls observed.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PspGateway for StubPspGateway {
    async fn charge(
        &self,
        rider_id: &str,
        amount: Money,
        currency: &str,
        payment_method: &str,
    ) -> Result<PspCharge, PspError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            rider_id = %rider_id,
            amount = %amount,
            currency = %currency,
            method = %payment_method,
            "PSP charge"
        );

        if self.failing.load(Ordering::SeqCst) {
            return Err(PspError::Timeout("payment gateway timeout".to_string()));
        }

        let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        Ok(PspCharge {
            reference: format!("PSP-{suffix}"),
        })
    }
}

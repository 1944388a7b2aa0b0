//! The guarded PSP charge path shared by the orchestrator and reconciler.
//!
//! Retry runs inside the breaker, so one `charge` call — up to three PSP
//! attempts with backoff — counts as a single breaker outcome. Only
//! transient PSP errors retry; rejections propagate immediately.

use crate::model::Payment;
use crate::psp::{PspCharge, PspError, PspGateway};
use rideflow_runtime::circuit_breaker::CircuitBreakerError;
use rideflow_runtime::{retry_with_predicate, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use std::sync::Arc;
use thiserror::Error;

/// Failures out of the guarded charge path.
#[derive(Error, Debug)]
pub enum ChargeError {
    /// The breaker is open; the PSP was not called.
    #[error("PSP circuit breaker is open")]
    CircuitOpen,

    /// The PSP failed after the retry budget.
    #[error(transparent)]
    Psp(#[from] PspError),
}

/// Circuit-breaker + retry wrapper around the PSP gateway.
pub struct PspCharger {
    gateway: Arc<dyn PspGateway>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl PspCharger {
    /// Wraps a gateway with the given breaker and retry policies.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PspGateway>,
        breaker_config: CircuitBreakerConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            breaker: CircuitBreaker::new(breaker_config),
            retry,
        }
    }

    /// Charge the payment's rider.
    ///
    /// # Errors
    ///
    /// [`ChargeError::CircuitOpen`] when load is being shed;
    /// [`ChargeError::Psp`] when the PSP failed past the retry budget.
    pub async fn charge(&self, payment: &Payment) -> Result<PspCharge, ChargeError> {
        let result = self
            .breaker
            .call(|| {
                retry_with_predicate(
                    &self.retry,
                    || {
                        self.gateway.charge(
                            &payment.rider_id,
                            payment.amount,
                            &payment.currency,
                            &payment.payment_method,
                        )
                    },
                    PspError::is_transient,
                )
            })
            .await;

        match result {
            Ok(charge) => Ok(charge),
            Err(CircuitBreakerError::Open) => Err(ChargeError::CircuitOpen),
            Err(CircuitBreakerError::Inner(e)) => Err(ChargeError::Psp(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psp::StubPspGateway;
    use rideflow_core::events::TripEvent;
    use rideflow_core::{Money, TripId, TripStatus};
    use std::time::Duration;

    fn payment() -> Payment {
        let trip = TripEvent {
            trip_id: TripId::new(),
            ride_id: None,
            rider_id: "usr_1".to_string(),
            tenant_id: "default".to_string(),
            region_id: "ap-south-1".to_string(),
            status: TripStatus::Ended,
            fare_amount_cents: Some(Money::from_cents(2093)),
            currency: Some("USD".to_string()),
            event_time: chrono::Utc::now(),
        };
        Payment::from_trip(&trip, Money::from_cents(2093))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn retries_inside_one_breaker_call() {
        let gateway = Arc::new(StubPspGateway::new());
        gateway.set_failing(true);
        let charger = PspCharger::new(gateway.clone(), CircuitBreakerConfig::default(), fast_retry());

        let err = charger.charge(&payment()).await.unwrap_err();
        assert!(matches!(err, ChargeError::Psp(_)));
        // 3 PSP attempts, 1 breaker failure.
        assert_eq!(gateway.calls(), 3);
        assert_eq!(charger.breaker.metrics().total_failures, 1);
    }

    #[tokio::test]
    async fn open_breaker_sheds_load_without_touching_the_psp() {
        let gateway = Arc::new(StubPspGateway::new());
        gateway.set_failing(true);
        let config = CircuitBreakerConfig {
            window_size: 2,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_secs(60),
            half_open_probes: 3,
        };
        let charger = PspCharger::new(gateway.clone(), config, fast_retry());

        let p = payment();
        let _ = charger.charge(&p).await;
        let _ = charger.charge(&p).await;
        let calls_before = gateway.calls();

        let err = charger.charge(&p).await.unwrap_err();
        assert!(matches!(err, ChargeError::CircuitOpen));
        assert_eq!(gateway.calls(), calls_before, "open breaker must not call the PSP");
    }
}

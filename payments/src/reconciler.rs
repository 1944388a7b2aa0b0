//! Reconciliation sweeps for payments the happy path left behind.
//!
//! Two scheduled passes, both routed through the real PSP charger (breaker
//! included):
//!
//! - **FAILED sweep (5 min)** — the PSP may have recovered. Rows past the
//!   retry budget are skipped for ops. Success flips the row to CAPTURED
//!   with a `payment.captured` outbox entry; a fresh failure only bumps the
//!   retry count and reason.
//! - **Stale PENDING sweep (10 min)** — the process died between the
//!   transactional insert and the async charge. Anything PENDING older than
//!   the threshold is charged; failure demotes it to FAILED with a
//!   `payment.failed` outbox entry, putting it on the first sweep's radar.

use crate::charger::PspCharger;
use crate::model::{NewOutboxEntry, Payment};
use crate::store::PaymentStore;
use chrono::{Duration as ChronoDuration, Utc};
use rideflow_core::{topics, PaymentStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Reconciliation attempts before a FAILED row is left for ops.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Age at which a PENDING row counts as stale.
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(600);

/// Periodic payment repair sweeps.
pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    charger: Arc<PspCharger>,
    max_retries: i32,
    stale_threshold: Duration,
}

impl Reconciler {
    /// Creates a reconciler with default budgets.
    #[must_use]
    pub fn new(store: Arc<dyn PaymentStore>, charger: Arc<PspCharger>) -> Self {
        Self {
            store,
            charger,
            max_retries: DEFAULT_MAX_RETRIES,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
        }
    }

    /// Override the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the stale-PENDING age threshold.
    #[must_use]
    pub const fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Retry FAILED payments that still have budget.
    pub async fn reconcile_failed(&self) {
        let failed = match self.store.payments_by_status(PaymentStatus::Failed).await {
            Ok(failed) => failed,
            Err(e) => {
                error!(error = %e, "reconciler could not list FAILED payments");
                return;
            }
        };
        if failed.is_empty() {
            return;
        }
        info!(count = failed.len(), "reconciliation: retrying FAILED payments");

        for payment in failed {
            if payment.retry_count >= self.max_retries {
                warn!(
                    payment_id = %payment.id,
                    retry_count = payment.retry_count,
                    "reconciliation: retry budget exhausted, skipping"
                );
                metrics::counter!("payments.reconciliation_exhausted").increment(1);
                continue;
            }

            info!(
                payment_id = %payment.id,
                trip_id = %payment.trip_id,
                attempt = payment.retry_count + 1,
                "reconciliation: retrying payment"
            );

            match self.charger.charge(&payment).await {
                Ok(charge) => self.capture(&payment, &charge.reference).await,
                Err(e) => {
                    let reason = format!(
                        "reconciliation attempt {}: {e}",
                        payment.retry_count + 1
                    );
                    // No new outbox row: consumers already saw the failure.
                    if let Err(store_err) =
                        self.store.mark_failed(payment.id, &reason, None).await
                    {
                        error!(payment_id = %payment.id, error = %store_err, "could not record reconciliation failure");
                    } else {
                        warn!(payment_id = %payment.id, reason = %reason, "reconciliation retry failed");
                    }
                }
            }
        }
    }

    /// Charge PENDING payments older than the stale threshold.
    pub async fn reconcile_stale_pending(&self) {
        let threshold = Utc::now()
            - ChronoDuration::from_std(self.stale_threshold)
                .unwrap_or_else(|_| ChronoDuration::seconds(600));
        let stale = match self.store.stale_pending(threshold).await {
            Ok(stale) => stale,
            Err(e) => {
                error!(error = %e, "reconciler could not list stale PENDING payments");
                return;
            }
        };
        if stale.is_empty() {
            return;
        }
        info!(
            count = stale.len(),
            threshold_secs = self.stale_threshold.as_secs(),
            "reconciliation: charging stale PENDING payments"
        );

        for payment in stale {
            match self.charger.charge(&payment).await {
                Ok(charge) => self.capture(&payment, &charge.reference).await,
                Err(e) => {
                    let reason = format!("stale reconciliation failed: {e}");
                    let mut event = payment.to_event();
                    event.status = PaymentStatus::Failed;
                    event.failure_reason = Some(reason.clone());

                    let outbox =
                        NewOutboxEntry::for_event(&payment, topics::PAYMENT_FAILED, &event).ok();
                    if let Err(store_err) =
                        self.store.mark_failed(payment.id, &reason, outbox).await
                    {
                        error!(payment_id = %payment.id, error = %store_err, "could not record stale charge failure");
                    } else {
                        error!(payment_id = %payment.id, reason = %reason, "stale payment could not be charged");
                    }
                }
            }
        }
    }

    async fn capture(&self, payment: &Payment, psp_reference: &str) {
        let mut event = payment.to_event();
        event.status = PaymentStatus::Captured;
        event.psp_reference = Some(psp_reference.to_string());

        let outbox = match NewOutboxEntry::for_event(payment, topics::PAYMENT_CAPTURED, &event) {
            Ok(outbox) => outbox,
            Err(e) => {
                error!(payment_id = %payment.id, error = %e, "reconciliation outbox serialization failed");
                return;
            }
        };

        match self
            .store
            .mark_captured(payment.id, psp_reference, outbox)
            .await
        {
            Ok(_) => {
                metrics::counter!("payments.reconciled").increment(1);
                info!(
                    payment_id = %payment.id,
                    psp_reference = %psp_reference,
                    "payment captured via reconciliation"
                );
            }
            Err(e) => {
                error!(payment_id = %payment.id, error = %e, "could not record reconciled capture");
            }
        }
    }
}

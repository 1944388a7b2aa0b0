//! Payment orchestration: trip-ended intake, atomic payment+outbox write,
//! async PSP charge with fallback.
//!
//! `initiate` never blocks on the PSP. It commits the payment row and the
//! `payment.initiated` outbox row in one transaction, then hands the charge
//! to a background task. Every payment event reaches the bus through the
//! outbox — never directly — so ordering per payment id survives crashes.

use crate::charger::PspCharger;
use crate::model::{NewOutboxEntry, Payment};
use crate::psp::PspCharge;
use crate::store::{PaymentStore, PaymentStoreError};
use rideflow_core::events::TripEvent;
use rideflow_core::{topics, PaymentStatus, TripStatus};
use rideflow_kv::{flags, FeatureFlagStore};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by `initiate`. Charge failures never appear here — they
/// are background outcomes recorded on the payment row.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Storage failure.
    #[error(transparent)]
    Store(#[from] PaymentStoreError),

    /// An event payload could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialization(String),
}

/// The payment orchestrator.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    store: Arc<dyn PaymentStore>,
    charger: Arc<PspCharger>,
    flags: Arc<dyn FeatureFlagStore>,
}

impl PaymentOrchestrator {
    /// Wires the orchestrator to its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        charger: Arc<PspCharger>,
        flags: Arc<dyn FeatureFlagStore>,
    ) -> Self {
        Self {
            store,
            charger,
            flags,
        }
    }

    /// Handle a trip-ended event: insert the payment and its outbox row
    /// atomically, then schedule the async PSP charge.
    ///
    /// Idempotent on trip id: replays and duplicate deliveries are no-ops.
    ///
    /// # Errors
    ///
    /// Storage and serialization failures only; PSP outcomes are recorded in
    /// the background.
    pub async fn initiate(&self, trip: &TripEvent) -> Result<(), PaymentError> {
        if trip.status != TripStatus::Ended {
            return Ok(());
        }
        let Some(fare) = trip.fare_amount_cents else {
            tracing::warn!(trip_id = %trip.trip_id, "trip ended with no fare, skipping payment");
            return Ok(());
        };

        if self.store.find_by_trip(trip.trip_id).await?.is_some() {
            tracing::info!(trip_id = %trip.trip_id, "payment already exists, idempotent no-op");
            return Ok(());
        }

        let payment = Payment::from_trip(trip, fare);
        let initiated = payment.to_event();
        let outbox = NewOutboxEntry::for_event(&payment, topics::PAYMENT_INITIATED, &initiated)
            .map_err(|e| PaymentError::Serialization(e.to_string()))?;

        match self.store.insert_payment_with_outbox(&payment, outbox).await {
            Ok(()) => {}
            Err(PaymentStoreError::DuplicateTrip) => {
                // Lost the insert race to a duplicate delivery; same outcome.
                tracing::info!(trip_id = %trip.trip_id, "payment already exists, idempotent no-op");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        metrics::counter!("payments.initiated").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            trip_id = %trip.trip_id,
            amount = %payment.amount,
            "payment created, async PSP charge pending"
        );

        if !self
            .flags
            .is_enabled(&payment.tenant_id, flags::AUTO_PAYMENT_CHARGE, true)
            .await
        {
            tracing::info!(
                payment_id = %payment.id,
                tenant_id = %payment.tenant_id,
                "auto charge disabled by feature flag, payment queued for manual review"
            );
            return Ok(());
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.charge_and_record(payment).await;
        });
        Ok(())
    }

    /// Run the guarded PSP charge for a payment and record the outcome.
    async fn charge_and_record(&self, payment: Payment) {
        match self.charger.charge(&payment).await {
            Ok(charge) => self.record_capture(&payment, &charge).await,
            Err(e) => self.record_failure(&payment, &e.to_string()).await,
        }
    }

    async fn record_capture(&self, payment: &Payment, charge: &PspCharge) {
        let mut event = payment.to_event();
        event.status = PaymentStatus::Captured;
        event.psp_reference = Some(charge.reference.clone());

        let outbox = match NewOutboxEntry::for_event(payment, topics::PAYMENT_CAPTURED, &event) {
            Ok(outbox) => outbox,
            Err(e) => {
                tracing::error!(payment_id = %payment.id, error = %e, "capture outbox serialization failed");
                return;
            }
        };

        match self
            .store
            .mark_captured(payment.id, &charge.reference, outbox)
            .await
        {
            Ok(_) => {
                metrics::counter!("payments.captured").increment(1);
                tracing::info!(
                    payment_id = %payment.id,
                    trip_id = %payment.trip_id,
                    psp_reference = %charge.reference,
                    "payment captured"
                );
            }
            Err(e) => {
                tracing::error!(payment_id = %payment.id, error = %e, "failed to record capture");
            }
        }
    }

    async fn record_failure(&self, payment: &Payment, reason: &str) {
        let mut event = payment.to_event();
        event.status = PaymentStatus::Failed;
        event.failure_reason = Some(reason.to_string());

        let outbox = match NewOutboxEntry::for_event(payment, topics::PAYMENT_FAILED, &event) {
            Ok(outbox) => Some(outbox),
            Err(e) => {
                tracing::error!(payment_id = %payment.id, error = %e, "failure outbox serialization failed");
                None
            }
        };

        match self.store.mark_failed(payment.id, reason, outbox).await {
            Ok(_) => {
                metrics::counter!("payments.failed").increment(1);
                tracing::error!(
                    payment_id = %payment.id,
                    trip_id = %payment.trip_id,
                    reason = %reason,
                    "PSP charge failed after retries"
                );
            }
            Err(e) => {
                tracing::error!(payment_id = %payment.id, error = %e, "failed to record charge failure");
            }
        }
    }

}

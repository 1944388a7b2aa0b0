//! In-memory payment store for tests and infrastructure-free runs.
//!
//! Mirrors the Postgres store's semantics: trip-id uniqueness, atomic
//! payment+outbox writes, FIFO outbox draining, and retry-count bookkeeping.

use crate::model::{NewOutboxEntry, OutboxEntry, Payment};
use crate::store::{PaymentStore, PaymentStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rideflow_core::{OutboxStatus, PaymentId, PaymentStatus, TripId};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    payments: HashMap<PaymentId, Payment>,
    by_trip: HashMap<TripId, PaymentId>,
    outbox: Vec<OutboxEntry>,
}

/// In-memory [`PaymentStore`].
#[derive(Default)]
pub struct InMemoryPaymentStore {
    state: Mutex<State>,
}

impl InMemoryPaymentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every outbox row in insert order, for test assertions.
    #[must_use]
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.state.lock().expect("payment state poisoned").outbox.clone()
    }

    /// Backdate a payment's creation time, for stale-PENDING tests.
    pub fn backdate_payment(&self, payment_id: PaymentId, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().expect("payment state poisoned");
        if let Some(payment) = state.payments.get_mut(&payment_id) {
            payment.created_at = created_at;
        }
    }
}

fn push_outbox(state: &mut State, outbox: NewOutboxEntry) {
    state.outbox.push(OutboxEntry {
        id: Uuid::new_v4(),
        payment_id: outbox.payment_id,
        tenant_id: outbox.tenant_id,
        event_type: outbox.event_type,
        payload: outbox.payload,
        status: OutboxStatus::Pending,
        retry_count: 0,
        created_at: Utc::now(),
        published_at: None,
    });
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert_payment_with_outbox(
        &self,
        payment: &Payment,
        outbox: NewOutboxEntry,
    ) -> Result<(), PaymentStoreError> {
        let mut state = self.state.lock().expect("payment state poisoned");
        if state.by_trip.contains_key(&payment.trip_id) {
            return Err(PaymentStoreError::DuplicateTrip);
        }
        state.by_trip.insert(payment.trip_id, payment.id);
        state.payments.insert(payment.id, payment.clone());
        push_outbox(&mut state, outbox);
        Ok(())
    }

    async fn find_by_trip(&self, trip_id: TripId) -> Result<Option<Payment>, PaymentStoreError> {
        let state = self.state.lock().expect("payment state poisoned");
        Ok(state
            .by_trip
            .get(&trip_id)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn fetch(&self, payment_id: PaymentId) -> Result<Option<Payment>, PaymentStoreError> {
        let state = self.state.lock().expect("payment state poisoned");
        Ok(state.payments.get(&payment_id).cloned())
    }

    async fn mark_captured(
        &self,
        payment_id: PaymentId,
        psp_reference: &str,
        outbox: NewOutboxEntry,
    ) -> Result<Payment, PaymentStoreError> {
        let mut state = self.state.lock().expect("payment state poisoned");
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(PaymentStoreError::PaymentNotFound(payment_id))?;
        payment.status = PaymentStatus::Captured;
        payment.psp_reference = Some(psp_reference.to_string());
        payment.updated_at = Utc::now();
        let updated = payment.clone();
        push_outbox(&mut state, outbox);
        Ok(updated)
    }

    async fn mark_failed(
        &self,
        payment_id: PaymentId,
        reason: &str,
        outbox: Option<NewOutboxEntry>,
    ) -> Result<Payment, PaymentStoreError> {
        let mut state = self.state.lock().expect("payment state poisoned");
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(PaymentStoreError::PaymentNotFound(payment_id))?;
        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason.to_string());
        payment.retry_count += 1;
        payment.updated_at = Utc::now();
        let updated = payment.clone();
        if let Some(outbox) = outbox {
            push_outbox(&mut state, outbox);
        }
        Ok(updated)
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, PaymentStoreError> {
        let state = self.state.lock().expect("payment state poisoned");
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_outbox_published(&self, entry_id: Uuid) -> Result<(), PaymentStoreError> {
        let mut state = self.state.lock().expect("payment state poisoned");
        if let Some(entry) = state.outbox.iter_mut().find(|e| e.id == entry_id) {
            entry.status = OutboxStatus::Published;
            entry.published_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_outbox_failure(
        &self,
        entry_id: Uuid,
        max_retries: i32,
    ) -> Result<OutboxStatus, PaymentStoreError> {
        let mut state = self.state.lock().expect("payment state poisoned");
        let entry = state
            .outbox
            .iter_mut()
            .find(|e| e.id == entry_id)
            .ok_or_else(|| {
                PaymentStoreError::Storage(format!("outbox entry {entry_id} missing"))
            })?;
        entry.retry_count += 1;
        if entry.retry_count >= max_retries {
            entry.status = OutboxStatus::Failed;
        }
        Ok(entry.status)
    }

    async fn payments_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<Payment>, PaymentStoreError> {
        let state = self.state.lock().expect("payment state poisoned");
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Payment>, PaymentStoreError> {
        let state = self.state.lock().expect("payment state poisoned");
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending && p.created_at < older_than)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}

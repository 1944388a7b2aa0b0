//! Persistence contract for payments and the outbox.
//!
//! The methods that matter for correctness are transactional bundles: a
//! payment mutation and its outbox row commit or roll back together, which
//! is the whole point of the outbox pattern.

use crate::model::{NewOutboxEntry, OutboxEntry, Payment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rideflow_core::{OutboxStatus, PaymentId, PaymentStatus, TripId};
use thiserror::Error;
use uuid::Uuid;

/// Errors from the payment store.
#[derive(Error, Debug)]
pub enum PaymentStoreError {
    /// A payment already exists for this trip (unique index).
    #[error("payment already exists for trip")]
    DuplicateTrip,

    /// Unknown payment id.
    #[error("payment {0} not found")]
    PaymentNotFound(PaymentId),

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Payment + outbox persistence.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert the payment row and its PENDING outbox row in one transaction.
    ///
    /// A concurrent insert for the same trip loses with
    /// [`PaymentStoreError::DuplicateTrip`]; the unique index, not a lookup,
    /// is the arbiter.
    async fn insert_payment_with_outbox(
        &self,
        payment: &Payment,
        outbox: NewOutboxEntry,
    ) -> Result<(), PaymentStoreError>;

    /// Look up a payment by trip id.
    async fn find_by_trip(&self, trip_id: TripId) -> Result<Option<Payment>, PaymentStoreError>;

    /// Read one payment.
    async fn fetch(&self, payment_id: PaymentId) -> Result<Option<Payment>, PaymentStoreError>;

    /// Transition to CAPTURED with the PSP reference and insert the capture
    /// event's outbox row — one transaction.
    async fn mark_captured(
        &self,
        payment_id: PaymentId,
        psp_reference: &str,
        outbox: NewOutboxEntry,
    ) -> Result<Payment, PaymentStoreError>;

    /// Transition to FAILED, record the reason, bump `retry_count`, and
    /// optionally insert a failure event's outbox row — one transaction.
    async fn mark_failed(
        &self,
        payment_id: PaymentId,
        reason: &str,
        outbox: Option<NewOutboxEntry>,
    ) -> Result<Payment, PaymentStoreError>;

    /// Oldest PENDING outbox rows, ascending by creation time.
    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, PaymentStoreError>;

    /// Mark an outbox row PUBLISHED and stamp `published_at`.
    async fn mark_outbox_published(&self, entry_id: Uuid) -> Result<(), PaymentStoreError>;

    /// Bump an outbox row's retry count; at `max_retries` the row goes
    /// FAILED (terminal, ops intervention). Returns the resulting status.
    async fn record_outbox_failure(
        &self,
        entry_id: Uuid,
        max_retries: i32,
    ) -> Result<OutboxStatus, PaymentStoreError>;

    /// All payments in a given status.
    async fn payments_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<Payment>, PaymentStoreError>;

    /// PENDING payments created before `older_than` — the orchestrator
    /// crashed between commit and charge scheduling.
    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Payment>, PaymentStoreError>;
}

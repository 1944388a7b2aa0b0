//! Postgres-backed payment store.
//!
//! The outbox-coupled writes (`insert_payment_with_outbox`, `mark_captured`,
//! `mark_failed`) each span one transaction; trip-id uniqueness is enforced
//! by the unique index and surfaces as error code 23505.

use crate::model::{NewOutboxEntry, OutboxEntry, Payment};
use crate::store::{PaymentStore, PaymentStoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rideflow_core::{Money, OutboxStatus, PaymentId, PaymentStatus, TripId};
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

/// Postgres error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed [`PaymentStore`].
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Wraps an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    trip_id: Uuid,
    rider_id: String,
    tenant_id: String,
    amount_cents: i64,
    currency: String,
    payment_method: String,
    psp_reference: Option<String>,
    status: String,
    failure_reason: Option<String>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = PaymentStoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PaymentId::from_uuid(row.id),
            trip_id: TripId::from_uuid(row.trip_id),
            rider_id: row.rider_id,
            tenant_id: row.tenant_id,
            amount: Money::from_cents(row.amount_cents),
            currency: row.currency,
            payment_method: row.payment_method,
            psp_reference: row.psp_reference,
            status: PaymentStatus::from_str(&row.status).map_err(PaymentStoreError::Storage)?,
            failure_reason: row.failure_reason,
            retry_count: row.retry_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    payment_id: Uuid,
    tenant_id: String,
    event_type: String,
    payload: Vec<u8>,
    status: String,
    retry_count: i32,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = PaymentStoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            payment_id: PaymentId::from_uuid(row.payment_id),
            tenant_id: row.tenant_id,
            event_type: row.event_type,
            payload: row.payload,
            status: OutboxStatus::from_str(&row.status).map_err(PaymentStoreError::Storage)?,
            retry_count: row.retry_count,
            created_at: row.created_at,
            published_at: row.published_at,
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, trip_id, rider_id, tenant_id, amount_cents, currency, \
     payment_method, psp_reference, status, failure_reason, retry_count, created_at, updated_at";

const OUTBOX_COLUMNS: &str =
    "id, payment_id, tenant_id, event_type, payload, status, retry_count, created_at, published_at";

fn storage_err(e: sqlx::Error) -> PaymentStoreError {
    PaymentStoreError::Storage(e.to_string())
}

async fn insert_outbox_tx(
    tx: &mut Transaction<'_, Postgres>,
    outbox: &NewOutboxEntry,
) -> Result<(), PaymentStoreError> {
    sqlx::query(
        "INSERT INTO payment_outbox (id, payment_id, tenant_id, event_type, payload, status, \
         retry_count, created_at, published_at) VALUES ($1, $2, $3, $4, $5, $6, $7, now(), NULL)",
    )
    .bind(Uuid::new_v4())
    .bind(outbox.payment_id.as_uuid())
    .bind(&outbox.tenant_id)
    .bind(&outbox.event_type)
    .bind(&outbox.payload)
    .bind(OutboxStatus::Pending.as_str())
    .bind(0_i32)
    .execute(&mut **tx)
    .await
    .map_err(storage_err)?;
    Ok(())
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn insert_payment_with_outbox(
        &self,
        payment: &Payment,
        outbox: NewOutboxEntry,
    ) -> Result<(), PaymentStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let result = sqlx::query(
            "INSERT INTO payments (id, trip_id, rider_id, tenant_id, amount_cents, currency, \
             payment_method, psp_reference, status, failure_reason, retry_count, created_at, \
             updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.trip_id.as_uuid())
        .bind(&payment.rider_id)
        .bind(&payment.tenant_id)
        .bind(payment.amount.cents())
        .bind(&payment.currency)
        .bind(&payment.payment_method)
        .bind(&payment.psp_reference)
        .bind(payment.status.as_str())
        .bind(&payment.failure_reason)
        .bind(payment.retry_count)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            if let Some(db_err) = e.as_database_error() {
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                    return Err(PaymentStoreError::DuplicateTrip);
                }
            }
            return Err(storage_err(e));
        }

        insert_outbox_tx(&mut tx, &outbox).await?;
        tx.commit().await.map_err(storage_err)
    }

    async fn find_by_trip(&self, trip_id: TripId) -> Result<Option<Payment>, PaymentStoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE trip_id = $1"
        ))
        .bind(trip_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(Payment::try_from).transpose()
    }

    async fn fetch(&self, payment_id: PaymentId) -> Result<Option<Payment>, PaymentStoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(payment_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(Payment::try_from).transpose()
    }

    async fn mark_captured(
        &self,
        payment_id: PaymentId,
        psp_reference: &str,
        outbox: NewOutboxEntry,
    ) -> Result<Payment, PaymentStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "UPDATE payments SET status = $2, psp_reference = $3, updated_at = now() \
             WHERE id = $1 RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id.as_uuid())
        .bind(PaymentStatus::Captured.as_str())
        .bind(psp_reference)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else {
            return Err(PaymentStoreError::PaymentNotFound(payment_id));
        };

        insert_outbox_tx(&mut tx, &outbox).await?;
        tx.commit().await.map_err(storage_err)?;
        Payment::try_from(row)
    }

    async fn mark_failed(
        &self,
        payment_id: PaymentId,
        reason: &str,
        outbox: Option<NewOutboxEntry>,
    ) -> Result<Payment, PaymentStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "UPDATE payments SET status = $2, failure_reason = $3, \
             retry_count = retry_count + 1, updated_at = now() \
             WHERE id = $1 RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(payment_id.as_uuid())
        .bind(PaymentStatus::Failed.as_str())
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else {
            return Err(PaymentStoreError::PaymentNotFound(payment_id));
        };

        if let Some(outbox) = &outbox {
            insert_outbox_tx(&mut tx, outbox).await?;
        }
        tx.commit().await.map_err(storage_err)?;
        Payment::try_from(row)
    }

    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxEntry>, PaymentStoreError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM payment_outbox \
             WHERE status = $1 ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(OutboxStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.into_iter().map(OutboxEntry::try_from).collect()
    }

    async fn mark_outbox_published(&self, entry_id: Uuid) -> Result<(), PaymentStoreError> {
        sqlx::query(
            "UPDATE payment_outbox SET status = $2, published_at = now() WHERE id = $1",
        )
        .bind(entry_id)
        .bind(OutboxStatus::Published.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn record_outbox_failure(
        &self,
        entry_id: Uuid,
        max_retries: i32,
    ) -> Result<OutboxStatus, PaymentStoreError> {
        let status: Option<String> = sqlx::query_scalar(
            "UPDATE payment_outbox SET retry_count = retry_count + 1, \
             status = CASE WHEN retry_count + 1 >= $2 THEN 'FAILED' ELSE status END \
             WHERE id = $1 RETURNING status",
        )
        .bind(entry_id)
        .bind(max_retries)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let status = status
            .ok_or_else(|| PaymentStoreError::Storage(format!("outbox entry {entry_id} missing")))?;
        OutboxStatus::from_str(&status).map_err(PaymentStoreError::Storage)
    }

    async fn payments_by_status(
        &self,
        status: PaymentStatus,
    ) -> Result<Vec<Payment>, PaymentStoreError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn stale_pending(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Payment>, PaymentStoreError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status = $1 AND created_at < $2 ORDER BY created_at ASC"
        ))
        .bind(PaymentStatus::Pending.as_str())
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.into_iter().map(Payment::try_from).collect()
    }
}

//! Transactional outbox relay.
//!
//! Polls `payment_outbox` every 500 ms and publishes PENDING rows to the bus
//! in creation order, keyed by payment id. An entry is marked PUBLISHED only
//! after broker acknowledgment; a failed publish stays PENDING and retries
//! next cycle, up to five attempts, then FAILED for manual intervention.
//! Rows are never dropped.
//!
//! Once a payment's entry fails within a cycle, its later entries are left
//! PENDING untouched: publishing them ahead of the stuck one would break the
//! per-payment event order.

use crate::store::PaymentStore;
use rideflow_core::{BusEvent, EventBus, OutboxStatus, PaymentId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Rows drained per poll cycle.
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// Publish attempts before an entry goes FAILED.
pub const DEFAULT_MAX_RETRIES: i32 = 5;

/// Outbox polling publisher.
pub struct OutboxRelay {
    store: Arc<dyn PaymentStore>,
    bus: Arc<dyn EventBus>,
    batch_size: i64,
    max_retries: i32,
}

impl OutboxRelay {
    /// Creates a relay with the default batch size and retry budget.
    #[must_use]
    pub fn new(store: Arc<dyn PaymentStore>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            store,
            bus,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the per-cycle batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Drain one batch. Returns the number of entries published.
    pub async fn poll_once(&self) -> usize {
        let pending = match self.store.pending_outbox(self.batch_size).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "outbox poll failed");
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }
        debug!(count = pending.len(), "outbox relay processing pending entries");

        let mut published = 0;
        let mut stalled: HashSet<PaymentId> = HashSet::new();

        for entry in pending {
            if stalled.contains(&entry.payment_id) {
                continue; // keep per-payment order intact
            }

            let event = BusEvent::new(
                entry.event_type.clone(),
                entry.payment_id.to_string(),
                entry.payload.clone(),
            );

            match self.bus.publish(&event).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_outbox_published(entry.id).await {
                        error!(entry_id = %entry.id, error = %e, "could not mark outbox entry published");
                        stalled.insert(entry.payment_id);
                        continue;
                    }
                    published += 1;
                    metrics::counter!("payments.outbox_published").increment(1);
                    info!(
                        event_type = %entry.event_type,
                        payment_id = %entry.payment_id,
                        "outbox entry published"
                    );
                }
                Err(e) => {
                    stalled.insert(entry.payment_id);
                    match self
                        .store
                        .record_outbox_failure(entry.id, self.max_retries)
                        .await
                    {
                        Ok(OutboxStatus::Failed) => {
                            metrics::counter!("payments.outbox_exhausted").increment(1);
                            error!(
                                entry_id = %entry.id,
                                payment_id = %entry.payment_id,
                                error = %e,
                                "outbox entry permanently failed after retries"
                            );
                        }
                        Ok(_) => {
                            warn!(
                                entry_id = %entry.id,
                                payment_id = %entry.payment_id,
                                error = %e,
                                "outbox publish failed, will retry next cycle"
                            );
                        }
                        Err(store_err) => {
                            error!(entry_id = %entry.id, error = %store_err, "could not record outbox failure");
                        }
                    }
                }
            }
        }

        published
    }
}

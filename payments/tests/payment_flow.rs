//! Payment orchestration flows against the in-memory store and capture bus.

use rideflow_core::events::{PaymentEvent, TripEvent};
use rideflow_core::{
    topics, BusEvent, EventBus, EventBusError, EventStream, Money, OutboxStatus, PaymentStatus,
    TripId, TripStatus,
};
use rideflow_kv::memory::InMemoryFeatureFlags;
use rideflow_kv::{flags, FeatureFlagStore};
use rideflow_payments::memory::InMemoryPaymentStore;
use rideflow_payments::psp::StubPspGateway;
use rideflow_payments::{
    OutboxRelay, Payment, PaymentOrchestrator, PaymentStore, PspCharger, Reconciler,
};
use rideflow_runtime::{CircuitBreakerConfig, RetryPolicy};
use rideflow_testing::InMemoryEventBus;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<InMemoryPaymentStore>,
    psp: Arc<StubPspGateway>,
    flags: Arc<InMemoryFeatureFlags>,
    orchestrator: Arc<PaymentOrchestrator>,
    reconciler: Reconciler,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(10),
        multiplier: 2.0,
    }
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryPaymentStore::new());
    let psp = Arc::new(StubPspGateway::new());
    let flags = Arc::new(InMemoryFeatureFlags::new());
    let charger = Arc::new(PspCharger::new(
        psp.clone(),
        CircuitBreakerConfig::default(),
        fast_retry(),
    ));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        store.clone(),
        charger.clone(),
        flags.clone(),
    ));
    let reconciler = Reconciler::new(store.clone(), charger);
    Harness {
        store,
        psp,
        flags,
        orchestrator,
        reconciler,
    }
}

fn trip_ended(fare_cents: i64) -> TripEvent {
    TripEvent {
        trip_id: TripId::new(),
        ride_id: None,
        rider_id: "usr_101".to_string(),
        tenant_id: "default".to_string(),
        region_id: "ap-south-1".to_string(),
        status: TripStatus::Ended,
        fare_amount_cents: Some(Money::from_cents(fare_cents)),
        currency: Some("USD".to_string()),
        event_time: chrono::Utc::now(),
    }
}

async fn wait_for_status(
    store: &InMemoryPaymentStore,
    trip_id: TripId,
    status: PaymentStatus,
) -> Payment {
    for _ in 0..200 {
        if let Some(payment) = store.find_by_trip(trip_id).await.unwrap() {
            if payment.status == status {
                return payment;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("payment for trip {trip_id} never reached {status}");
}

fn outbox_types(store: &InMemoryPaymentStore) -> Vec<String> {
    store
        .outbox_entries()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

#[tokio::test]
async fn initiate_writes_payment_and_outbox_atomically() {
    let h = harness();
    h.flags
        .set("default", flags::AUTO_PAYMENT_CHARGE, false)
        .await
        .unwrap();

    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();

    let payment = h.store.find_by_trip(trip.trip_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, Money::from_cents(2093));
    assert_eq!(payment.retry_count, 0);

    let entries = h.store.outbox_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event_type, topics::PAYMENT_INITIATED);
    assert_eq!(entries[0].status, OutboxStatus::Pending);

    let event: PaymentEvent = serde_json::from_slice(&entries[0].payload).unwrap();
    assert_eq!(event.status, PaymentStatus::Pending);
    assert_eq!(event.amount_cents, Money::from_cents(2093));
    assert_eq!(event.payment_id, payment.id);

    // Flag off: the charge never fires and the row awaits manual review.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.psp.calls(), 0);
    let still = h.store.find_by_trip(trip.trip_id).await.unwrap().unwrap();
    assert_eq!(still.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn initiate_is_idempotent_on_trip_id() {
    let h = harness();
    h.flags
        .set("default", flags::AUTO_PAYMENT_CHARGE, false)
        .await
        .unwrap();

    let trip = trip_ended(1500);
    for _ in 0..3 {
        h.orchestrator.initiate(&trip).await.unwrap();
    }

    assert_eq!(h.store.outbox_entries().len(), 1, "exactly one row per trip");
}

#[tokio::test]
async fn successful_charge_captures_and_appends_outbox() {
    let h = harness();
    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();

    let payment = wait_for_status(&h.store, trip.trip_id, PaymentStatus::Captured).await;
    assert!(payment.psp_reference.as_deref().unwrap().starts_with("PSP-"));
    assert_eq!(
        outbox_types(&h.store),
        vec![topics::PAYMENT_INITIATED, topics::PAYMENT_CAPTURED]
    );
}

#[tokio::test]
async fn psp_outage_runs_the_fallback_path() {
    let h = harness();
    h.psp.set_failing(true);

    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();

    let payment = wait_for_status(&h.store, trip.trip_id, PaymentStatus::Failed).await;
    assert_eq!(payment.retry_count, 1);
    assert!(payment.failure_reason.is_some());
    assert_eq!(payment.psp_reference, None);
    assert_eq!(
        outbox_types(&h.store),
        vec![topics::PAYMENT_INITIATED, topics::PAYMENT_FAILED]
    );
    // Transient errors burn the full in-call retry budget.
    assert_eq!(h.psp.calls(), 3);
}

#[tokio::test]
async fn non_ended_and_fareless_trips_are_skipped() {
    let h = harness();

    let mut started = trip_ended(1000);
    started.status = TripStatus::Started;
    h.orchestrator.initiate(&started).await.unwrap();
    assert!(h.store.find_by_trip(started.trip_id).await.unwrap().is_none());

    let mut no_fare = trip_ended(0);
    no_fare.fare_amount_cents = None;
    h.orchestrator.initiate(&no_fare).await.unwrap();
    assert!(h.store.find_by_trip(no_fare.trip_id).await.unwrap().is_none());
}

#[tokio::test]
async fn relay_publishes_in_order_and_marks_published() {
    let h = harness();
    let bus = Arc::new(InMemoryEventBus::new());
    let relay = OutboxRelay::new(h.store.clone(), bus.clone());

    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();
    let payment = wait_for_status(&h.store, trip.trip_id, PaymentStatus::Captured).await;

    let published = relay.poll_once().await;
    assert_eq!(published, 2);

    // Per-payment order on the bus: INITIATED before CAPTURED.
    let key = payment.id.to_string();
    let observed: Vec<String> = bus.key_events(&key).into_iter().map(|e| e.topic).collect();
    assert_eq!(observed, vec![topics::PAYMENT_INITIATED, topics::PAYMENT_CAPTURED]);

    for entry in h.store.outbox_entries() {
        assert_eq!(entry.status, OutboxStatus::Published);
        assert!(entry.published_at.is_some());
        assert!(entry.retry_count <= 5);
    }

    // Nothing left for the next cycle.
    assert_eq!(relay.poll_once().await, 0);
}

/// Bus that fails the first `failures` publishes, then heals.
struct FlakyBus {
    inner: Arc<InMemoryEventBus>,
    remaining_failures: AtomicU32,
}

impl EventBus for FlakyBus {
    fn publish(
        &self,
        event: &BusEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            if self
                .remaining_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EventBusError::PublishFailed {
                    topic: event.topic,
                    reason: "broker unavailable".to_string(),
                });
            }
            self.inner.publish(&event).await
        })
    }

    fn subscribe(
        &self,
        group: &str,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        self.inner.subscribe(group, topics)
    }
}

#[tokio::test]
async fn relay_leaves_failed_publishes_pending_and_preserves_order() {
    let h = harness();
    let inner = Arc::new(InMemoryEventBus::new());
    let bus = Arc::new(FlakyBus {
        inner: inner.clone(),
        remaining_failures: AtomicU32::new(1),
    });
    let relay = OutboxRelay::new(h.store.clone(), bus);

    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();
    let payment = wait_for_status(&h.store, trip.trip_id, PaymentStatus::Captured).await;

    // First cycle: INITIATED fails, so CAPTURED must not jump the queue.
    assert_eq!(relay.poll_once().await, 0);
    assert!(inner.key_events(&payment.id.to_string()).is_empty());

    // Second cycle: the broker is back, both go out in creation order.
    assert_eq!(relay.poll_once().await, 2);
    let observed: Vec<String> = inner
        .key_events(&payment.id.to_string())
        .into_iter()
        .map(|e| e.topic)
        .collect();
    assert_eq!(observed, vec![topics::PAYMENT_INITIATED, topics::PAYMENT_CAPTURED]);
}

#[tokio::test]
async fn relay_marks_entries_failed_after_retry_exhaustion() {
    let h = harness();
    h.flags
        .set("default", flags::AUTO_PAYMENT_CHARGE, false)
        .await
        .unwrap();
    let inner = Arc::new(InMemoryEventBus::new());
    let bus = Arc::new(FlakyBus {
        inner,
        remaining_failures: AtomicU32::new(u32::MAX),
    });
    let relay = OutboxRelay::new(h.store.clone(), bus).with_max_retries(2);

    let trip = trip_ended(500);
    h.orchestrator.initiate(&trip).await.unwrap();

    assert_eq!(relay.poll_once().await, 0);
    assert_eq!(relay.poll_once().await, 0);

    let entries = h.store.outbox_entries();
    assert_eq!(entries.len(), 1, "the row is never dropped");
    assert_eq!(entries[0].status, OutboxStatus::Failed);
    assert_eq!(entries[0].retry_count, 2);

    // Terminal FAILED rows leave the polling set.
    assert_eq!(relay.poll_once().await, 0);
    assert_eq!(h.store.outbox_entries()[0].retry_count, 2);
}

#[tokio::test]
async fn reconciler_captures_failed_payment_after_psp_recovers() {
    let h = harness();
    let bus = Arc::new(InMemoryEventBus::new());
    let relay = OutboxRelay::new(h.store.clone(), bus.clone());

    // PSP outage: the payment fails and both events get published.
    h.psp.set_failing(true);
    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();
    let failed = wait_for_status(&h.store, trip.trip_id, PaymentStatus::Failed).await;
    relay.poll_once().await;

    // PSP recovers; the five-minute sweep re-charges the row.
    h.psp.set_failing(false);
    h.reconciler.reconcile_failed().await;

    let captured = h.store.find_by_trip(trip.trip_id).await.unwrap().unwrap();
    assert_eq!(captured.status, PaymentStatus::Captured);
    assert!(captured.psp_reference.is_some());

    relay.poll_once().await;
    let observed: Vec<String> = bus
        .key_events(&failed.id.to_string())
        .into_iter()
        .map(|e| e.topic)
        .collect();
    assert_eq!(
        observed,
        vec![
            topics::PAYMENT_INITIATED,
            topics::PAYMENT_FAILED,
            topics::PAYMENT_CAPTURED
        ],
        "capture must be observed after the earlier failure on the same key"
    );
}

#[tokio::test]
async fn reconciler_skips_payments_past_the_retry_budget() {
    let h = harness();
    h.psp.set_failing(true);
    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();
    let payment = wait_for_status(&h.store, trip.trip_id, PaymentStatus::Failed).await;

    // Burn the reconciliation budget while the PSP stays down.
    for _ in 0..4 {
        h.reconciler.reconcile_failed().await;
    }
    let exhausted = h.store.fetch(payment.id).await.unwrap().unwrap();
    assert_eq!(exhausted.retry_count, 5);

    // Even a healthy PSP is not consulted once the budget is gone.
    h.psp.set_failing(false);
    let calls_before = h.psp.calls();
    h.reconciler.reconcile_failed().await;
    assert_eq!(h.psp.calls(), calls_before);
    let still = h.store.fetch(payment.id).await.unwrap().unwrap();
    assert_eq!(still.status, PaymentStatus::Failed);
}

#[tokio::test]
async fn stale_pending_sweep_charges_orphaned_rows() {
    let h = harness();
    h.flags
        .set("default", flags::AUTO_PAYMENT_CHARGE, false)
        .await
        .unwrap();

    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();
    let payment = h.store.find_by_trip(trip.trip_id).await.unwrap().unwrap();

    // Fresh PENDING rows are not touched.
    h.reconciler.reconcile_stale_pending().await;
    assert_eq!(
        h.store.fetch(payment.id).await.unwrap().unwrap().status,
        PaymentStatus::Pending
    );

    // Eleven minutes later the sweep picks it up and charges it.
    h.store
        .backdate_payment(payment.id, chrono::Utc::now() - chrono::Duration::minutes(11));
    h.reconciler.reconcile_stale_pending().await;

    let captured = h.store.fetch(payment.id).await.unwrap().unwrap();
    assert_eq!(captured.status, PaymentStatus::Captured);
    assert_eq!(
        outbox_types(&h.store),
        vec![topics::PAYMENT_INITIATED, topics::PAYMENT_CAPTURED]
    );
}

#[tokio::test]
async fn stale_pending_sweep_demotes_uncollectable_rows_to_failed() {
    let h = harness();
    h.flags
        .set("default", flags::AUTO_PAYMENT_CHARGE, false)
        .await
        .unwrap();

    let trip = trip_ended(2093);
    h.orchestrator.initiate(&trip).await.unwrap();
    let payment = h.store.find_by_trip(trip.trip_id).await.unwrap().unwrap();
    h.store
        .backdate_payment(payment.id, chrono::Utc::now() - chrono::Duration::minutes(11));

    h.psp.set_failing(true);
    h.reconciler.reconcile_stale_pending().await;

    let failed = h.store.fetch(payment.id).await.unwrap().unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert_eq!(
        outbox_types(&h.store),
        vec![topics::PAYMENT_INITIATED, topics::PAYMENT_FAILED]
    );
}

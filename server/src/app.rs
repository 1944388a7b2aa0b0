//! Application assembly and lifecycle.
//!
//! Builds every component from configuration, spawns the consumers and the
//! periodic sweeps, runs the HTTP server, and coordinates graceful shutdown:
//! the server stops accepting connections, the shutdown signal fans out to
//! all background tasks, and each gets a bounded window to finish its
//! in-flight work so open transactions commit or roll back cleanly.

use crate::config::Config;
use rideflow_bus::{EventConsumer, RedpandaEventBus};
use rideflow_core::{topics, EventBus, GLOBAL_TENANT};
use rideflow_dispatch::postgres::PostgresDispatchStore;
use rideflow_dispatch::timeout::OfferTimeoutScheduler;
use rideflow_dispatch::{DispatchConfig, DispatchEngine, DispatchStore};
use rideflow_kv::flags::RedisFeatureFlags;
use rideflow_kv::geo_index::RedisGeoIndex;
use rideflow_kv::idempotency_cache::RedisIdempotencyCache;
use rideflow_kv::mutex::RedisLockManager;
use rideflow_kv::surge_window::RedisSurgeWindow;
use rideflow_kv::FeatureFlagStore;
use rideflow_payments::consumer::TripEndedHandler;
use rideflow_payments::postgres::PostgresPaymentStore;
use rideflow_payments::psp::StubPspGateway;
use rideflow_payments::{OutboxRelay, PaymentOrchestrator, PspCharger, Reconciler};
use rideflow_runtime::{spawn_interval_task, CircuitBreakerConfig, RetryPolicy};
use rideflow_surge::consumer::SnapshotHandler;
use rideflow_surge::postgres::PostgresSurgeCellStore;
use rideflow_surge::SurgeService;
use rideflow_web::{build_router, AppState};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A fully wired application, ready to run.
pub struct Application {
    listener: tokio::net::TcpListener,
    router: axum::Router,
    consumers: Vec<EventConsumer>,
    sweeps: Vec<SweepTask>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

/// Boxed tick future produced by a sweep closure.
type SweepFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// A named periodic sweep waiting to be spawned.
struct SweepTask {
    name: &'static str,
    every: Duration,
    run: Box<dyn FnMut() -> SweepFuture + Send>,
}

impl Application {
    /// Build every component from configuration and bind the HTTP listener.
    ///
    /// # Errors
    ///
    /// Fails when Postgres, Redis, or the bus is unreachable, when
    /// migrations fail, or when the listen address cannot be bound.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        // --- storage ---
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;
        sqlx::migrate!("../migrations").run(&pool).await?;
        info!("database migrations applied");

        let redis = rideflow_kv::connect(&config.redis.url).await?;
        let geo = Arc::new(RedisGeoIndex::new(redis.clone()));
        let locks = Arc::new(RedisLockManager::new(redis.clone()));
        let flags: Arc<dyn FeatureFlagStore> = Arc::new(RedisFeatureFlags::new(redis.clone()));
        let surge_window = Arc::new(RedisSurgeWindow::new(redis.clone()));
        let idempotency = Arc::new(RedisIdempotencyCache::new(redis));

        // Seed missing flag defaults for the default and global tenants.
        flags.init_defaults(rideflow_core::DEFAULT_TENANT).await?;
        flags.init_defaults(GLOBAL_TENANT).await?;

        let bus: Arc<dyn EventBus> = Arc::new(RedpandaEventBus::new(&config.kafka.brokers)?);

        // --- dispatch ---
        let dispatch_store: Arc<dyn DispatchStore> =
            Arc::new(PostgresDispatchStore::new(pool.clone()));
        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&dispatch_store),
            geo,
            locks,
            Arc::clone(&flags),
            idempotency,
            Arc::clone(&bus),
            DispatchConfig {
                default_region: config.region_id.clone(),
                max_attempts: config.scheduling.max_dispatch_attempts,
                ..DispatchConfig::default()
            },
        ));
        let timeout_scheduler = Arc::new(OfferTimeoutScheduler::new(
            Arc::clone(&dispatch_store),
            Arc::clone(&engine),
        ));

        // --- payments ---
        let payment_store = Arc::new(PostgresPaymentStore::new(pool.clone()));
        let charger = Arc::new(PspCharger::new(
            Arc::new(StubPspGateway::new()),
            CircuitBreakerConfig::default(),
            RetryPolicy::default(),
        ));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            payment_store.clone(),
            Arc::clone(&charger),
            Arc::clone(&flags),
        ));
        let relay = Arc::new(
            OutboxRelay::new(payment_store.clone(), Arc::clone(&bus))
                .with_max_retries(config.scheduling.max_outbox_retries),
        );
        let reconciler = Arc::new(
            Reconciler::new(payment_store, charger)
                .with_max_retries(config.scheduling.max_reconcile_retries)
                .with_stale_threshold(Duration::from_secs(
                    config.scheduling.stale_pending_threshold_secs,
                )),
        );

        // --- surge ---
        let surge = Arc::new(SurgeService::new(
            surge_window,
            Arc::new(PostgresSurgeCellStore::new(pool)),
            Arc::clone(&flags),
        ));

        // --- consumers ---
        let (shutdown_tx, _) = broadcast::channel(1);
        let consumers = vec![
            EventConsumer::new(
                "trip-ended",
                config.kafka.payment_consumer_group.as_str(),
                vec![topics::TRIP_ENDED.to_string()],
                Arc::clone(&bus),
                Arc::new(TripEndedHandler::new(Arc::clone(&orchestrator))),
                shutdown_tx.subscribe(),
            ),
            EventConsumer::new(
                "supply-demand-snapshot",
                config.kafka.surge_consumer_group.as_str(),
                vec![topics::SUPPLY_DEMAND_SNAPSHOT.to_string()],
                Arc::clone(&bus),
                Arc::new(SnapshotHandler::new(Arc::clone(&surge))),
                shutdown_tx.subscribe(),
            ),
        ];

        // --- periodic sweeps ---
        let sweeps: Vec<SweepTask> = vec![
            SweepTask {
                name: "outbox-relay",
                every: Duration::from_millis(config.scheduling.outbox_poll_interval_ms),
                run: Box::new(move || {
                    let relay = Arc::clone(&relay);
                    Box::pin(async move {
                        relay.poll_once().await;
                    })
                }),
            },
            SweepTask {
                name: "offer-timeout",
                every: Duration::from_millis(config.scheduling.offer_timeout_sweep_ms),
                run: Box::new(move || {
                    let scheduler = Arc::clone(&timeout_scheduler);
                    Box::pin(async move {
                        scheduler.sweep().await;
                    })
                }),
            },
            SweepTask {
                name: "reconcile-failed",
                every: Duration::from_secs(config.scheduling.reconciler_failed_interval_secs),
                run: {
                    let reconciler = Arc::clone(&reconciler);
                    Box::new(move || {
                        let reconciler = Arc::clone(&reconciler);
                        Box::pin(async move {
                            reconciler.reconcile_failed().await;
                        })
                    })
                },
            },
            SweepTask {
                name: "reconcile-stale-pending",
                every: Duration::from_secs(config.scheduling.reconciler_stale_interval_secs),
                run: Box::new(move || {
                    let reconciler = Arc::clone(&reconciler);
                    Box::pin(async move {
                        reconciler.reconcile_stale_pending().await;
                    })
                }),
            },
        ];

        // --- http ---
        let router = build_router(AppState::new(engine, surge));
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(address = %addr, "listener bound");

        Ok(Self {
            listener,
            router,
            consumers,
            sweeps,
            shutdown_tx,
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout),
        })
    }

    /// Run until SIGINT/SIGTERM, then shut everything down gracefully.
    ///
    /// # Errors
    ///
    /// Propagates fatal HTTP server errors.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(consumer_count = self.consumers.len(), "starting event consumers");
        let mut handles: Vec<(&'static str, JoinHandle<()>)> = self
            .consumers
            .into_iter()
            .map(|c| ("consumer", c.spawn()))
            .collect();

        info!(sweep_count = self.sweeps.len(), "starting periodic sweeps");
        for sweep in self.sweeps {
            let handle = spawn_interval_task(
                sweep.name,
                sweep.every,
                self.shutdown_tx.subscribe(),
                sweep.run,
            );
            handles.push((sweep.name, handle));
        }

        info!("HTTP server listening for requests");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped, initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());

        for (name, handle) in handles {
            match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => info!(task = name, "background task stopped gracefully"),
                Ok(Err(e)) => warn!(task = name, error = %e, "background task failed"),
                Err(_) => warn!(task = name, "background task shutdown timed out"),
            }
        }

        info!("graceful shutdown complete");
        Ok(())
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C signal"),
        () = terminate => info!("received SIGTERM signal"),
    }
}

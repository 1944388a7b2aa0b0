//! Generic event bus consumer with automatic reconnection.
//!
//! Wraps the subscribe-process-reconnect loop every consumer needs: retry on
//! subscription failure, per-event error isolation, and graceful shutdown via
//! a broadcast channel. Applications implement [`EventHandler`] and hand it
//! to an [`EventConsumer`].

use async_trait::async_trait;
use futures::StreamExt;
use rideflow_core::{BusEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Error type returned by event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler for processing events from the bus.
///
/// Handlers deserialize the payload themselves, process it, and return the
/// outcome. Errors are logged by the consumer; processing continues with the
/// next event, so handlers must be idempotent on the partition key rather
/// than rely on exactly-once delivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event.
    ///
    /// # Errors
    ///
    /// Returns an error when the event cannot be processed; the consumer
    /// logs it and moves on.
    async fn handle(&self, event: &BusEvent) -> Result<(), HandlerError>;
}

/// Generic event bus consumer.
///
/// # Lifecycle
///
/// 1. Built via [`EventConsumer::new`]
/// 2. Spawned as a background task via [`EventConsumer::spawn`]
/// 3. Runs until the shutdown signal fires
pub struct EventConsumer {
    name: String,
    group: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a consumer.
    ///
    /// `name` is for logs; `group` is the bus consumer group, so multiple
    /// instances of the same service share partitions.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            topics,
            event_bus,
            handler,
            shutdown,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Override the reconnect delay (default 5 s).
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, "event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "event consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.event_bus.subscribe(&self.group, &topics) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, topics = ?self.topics, "subscribed to event bus");

                            if self.process_stream(&mut stream).await.is_break() {
                                break;
                            }

                            warn!(
                                consumer = %self.name,
                                "event stream ended, reconnecting in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "failed to subscribe, retrying in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "event consumer stopped");
    }

    /// Returns `Break` when the shutdown signal arrived mid-stream.
    async fn process_stream(
        &mut self,
        stream: &mut rideflow_core::EventStream,
    ) -> std::ops::ControlFlow<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "shutdown during stream processing");
                    return std::ops::ControlFlow::Break(());
                }
                event_result = stream.next() => {
                    match event_result {
                        Some(Ok(event)) => self.dispatch(&event).await,
                        Some(Err(e)) => {
                            error!(consumer = %self.name, error = %e, "error receiving event");
                        }
                        None => {
                            warn!(consumer = %self.name, "event stream ended");
                            return std::ops::ControlFlow::Continue(());
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: &BusEvent) {
        if let Err(e) = self.handler.handle(event).await {
            // Processing continues; the partition key makes replays safe.
            error!(
                consumer = %self.name,
                topic = %event.topic,
                key = %event.key,
                error = %e,
                "failed to handle event"
            );
        }
    }
}

//! Circuit breaker for shedding load off a failing external dependency.
//!
//! The breaker tracks the outcome of the last N calls in a sliding window.
//! Once the window is full and the failure rate reaches the threshold, the
//! circuit opens and calls fail fast for a cool-down period. After the
//! cool-down a bounded number of probe calls are let through; if they all
//! succeed the circuit closes, and a single probe failure reopens it.
//!
//! # States
//!
//! - **Closed**: calls pass through; outcomes are recorded in the window.
//! - **Open**: calls are rejected immediately until the open duration elapses.
//! - **HalfOpen**: up to `half_open_probes` calls are admitted to test recovery.
//!
//! # Example
//!
//! ```rust
//! use rideflow_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::builder()
//!         .window_size(10)
//!         .failure_rate_threshold(0.5)
//!         .open_duration(Duration::from_secs(10))
//!         .half_open_probes(3)
//!         .build(),
//! );
//!
//! match breaker.call(|| async { Ok::<_, String>(42) }).await {
//!     Ok(v) => println!("charged: {v}"),
//!     Err(e) => println!("rejected or failed: {e}"),
//! }
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of most-recent calls considered when evaluating the failure rate.
    pub window_size: usize,
    /// Failure rate in `[0.0, 1.0]` at which the circuit opens (window must be full).
    pub failure_rate_threshold: f64,
    /// How long the circuit stays open before admitting probes.
    pub open_duration: Duration,
    /// Number of consecutive probe successes required to close from half-open.
    pub half_open_probes: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_secs(10),
            half_open_probes: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    window_size: Option<usize>,
    failure_rate_threshold: Option<f64>,
    open_duration: Option<Duration>,
    half_open_probes: Option<usize>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the sliding window size.
    #[must_use]
    pub const fn window_size(mut self, size: usize) -> Self {
        self.window_size = Some(size);
        self
    }

    /// Set the failure rate threshold.
    #[must_use]
    pub const fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.failure_rate_threshold = Some(threshold);
        self
    }

    /// Set how long the circuit stays open before probing.
    #[must_use]
    pub const fn open_duration(mut self, duration: Duration) -> Self {
        self.open_duration = Some(duration);
        self
    }

    /// Set the half-open probe budget.
    #[must_use]
    pub const fn half_open_probes(mut self, probes: usize) -> Self {
        self.half_open_probes = Some(probes);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            window_size: self.window_size.unwrap_or(defaults.window_size),
            failure_rate_threshold: self
                .failure_rate_threshold
                .unwrap_or(defaults.failure_rate_threshold),
            open_duration: self.open_duration.unwrap_or(defaults.open_duration),
            half_open_probes: self.half_open_probes.unwrap_or(defaults.half_open_probes),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Normal operation.
    Closed,
    /// Failing fast.
    Open,
    /// Testing recovery with a bounded probe budget.
    HalfOpen,
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the call was not attempted.
    #[error("Circuit breaker is open")]
    Open,
    /// The wrapped operation failed.
    #[error("Operation failed: {0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerState {
    state: State,
    /// Outcomes of the most recent calls while closed; `true` = success.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probes_admitted: usize,
    probe_successes: usize,
}

/// Sliding-window failure-rate circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<BreakerState>>,
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(BreakerState {
                state: State::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probes_admitted: 0,
                probe_successes: 0,
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the current state of the circuit breaker.
    pub async fn state(&self) -> State {
        self.state.read().await.state
    }

    /// Call an operation through the circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError::Open`] if the circuit rejects the call,
    /// or [`CircuitBreakerError::Inner`] if the operation itself fails.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if !self.admit().await {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("circuit breaker is OPEN, rejecting call");
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(result) => {
                self.on_success().await;
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Ok(result)
            }
            Err(err) => {
                self.on_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    async fn admit(&self) -> bool {
        let mut state = self.state.write().await;
        match state.state {
            State::Closed => true,
            State::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    tracing::info!("circuit breaker transitioning OPEN -> HALF_OPEN");
                    state.state = State::HalfOpen;
                    state.probes_admitted = 1;
                    state.probe_successes = 0;
                    true
                } else {
                    false
                }
            }
            State::HalfOpen => {
                if state.probes_admitted < self.config.half_open_probes {
                    state.probes_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        match state.state {
            State::Closed => {
                Self::record_outcome(&mut state, self.config.window_size, true);
                self.evaluate_window(&mut state);
            }
            State::HalfOpen => {
                state.probe_successes += 1;
                if state.probe_successes >= self.config.half_open_probes {
                    tracing::info!(
                        probes = state.probe_successes,
                        "circuit breaker transitioning HALF_OPEN -> CLOSED"
                    );
                    state.state = State::Closed;
                    state.window.clear();
                    state.opened_at = None;
                }
            }
            State::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        match state.state {
            State::Closed => {
                Self::record_outcome(&mut state, self.config.window_size, false);
                self.evaluate_window(&mut state);
            }
            State::HalfOpen => {
                tracing::warn!("circuit breaker transitioning HALF_OPEN -> OPEN (probe failed)");
                state.state = State::Open;
                state.opened_at = Some(Instant::now());
            }
            State::Open => {}
        }
    }

    fn record_outcome(state: &mut BreakerState, window_size: usize, success: bool) {
        state.window.push_back(success);
        while state.window.len() > window_size {
            state.window.pop_front();
        }
    }

    /// Opens the circuit when the window is full and the failure rate has
    /// reached the threshold.
    fn evaluate_window(&self, state: &mut BreakerState) {
        if state.window.len() < self.config.window_size {
            return;
        }
        let failures = state.window.iter().filter(|ok| !**ok).count();
        #[allow(clippy::cast_precision_loss)]
        let rate = failures as f64 / state.window.len() as f64;
        if rate >= self.config.failure_rate_threshold {
            tracing::warn!(
                failure_rate = rate,
                threshold = self.config.failure_rate_threshold,
                "circuit breaker transitioning CLOSED -> OPEN"
            );
            state.state = State::Open;
            state.opened_at = Some(Instant::now());
            state.window.clear();
        }
    }

    /// Get cumulative call counters.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Reset the breaker to closed. Intended for tests and ops tooling.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        tracing::info!("circuit breaker manually reset to CLOSED");
        state.state = State::Closed;
        state.window.clear();
        state.opened_at = None;
        state.probes_admitted = 0;
        state.probe_successes = 0;
    }
}

/// Cumulative counters for breaker monitoring.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Calls attempted (including rejections).
    pub total_calls: u64,
    /// Calls that completed successfully.
    pub total_successes: u64,
    /// Calls that completed with an error.
    pub total_failures: u64,
    /// Calls rejected while open.
    pub total_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .window_size(4)
            .failure_rate_threshold(0.5)
            .open_duration(Duration::from_millis(100))
            .half_open_probes(2)
            .build()
    }

    #[tokio::test]
    async fn stays_closed_on_success() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..10 {
            let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
            assert!(result.is_ok());
        }
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn opens_when_failure_rate_reaches_threshold() {
        let breaker = CircuitBreaker::new(fast_config());
        // Window of 4: two failures and two successes hit the 0.5 threshold.
        let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(fast_config());
        let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        let _ = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn rejects_while_open() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;
        }
        assert_eq!(breaker.state().await, State::Open);

        let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
    }

    #[tokio::test]
    async fn closes_after_probe_successes() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Two probe successes close the circuit.
        for _ in 0..2 {
            let result = breaker.call(|| async { Ok::<_, String>(42) }).await;
            assert!(result.is_ok());
        }
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn reopens_on_probe_failure() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        let _ = breaker.call(|| async { Err::<i32, _>("still down") }).await;
        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn counters_track_outcomes() {
        let breaker = CircuitBreaker::new(fast_config());
        let _ = breaker.call(|| async { Ok::<_, String>(1) }).await;
        let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_calls, 2);
        assert_eq!(metrics.total_successes, 1);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.total_rejections, 0);
    }

    #[tokio::test]
    async fn reset_closes_the_circuit() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;
        }
        assert_eq!(breaker.state().await, State::Open);

        breaker.reset().await;
        assert_eq!(breaker.state().await, State::Closed);
    }
}

//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker guards a single named call path to a flaky downstream
//! dependency. Failures are counted; once a threshold of consecutive failures
//! is reached the circuit "opens" and calls fail fast without touching the
//! dependency, giving it time to recover.
//!
//! ## States
//!
//! - **Closed**: normal operation, calls pass through
//! - **Open**: circuit is tripped, calls are rejected immediately
//! - **Half-Open**: a bounded number of probe calls test recovery
//!
//! ## Example
//!
//! ```rust,ignore
//! use crossbar_resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("billing-api")
//!         .failure_threshold(3)
//!         .reset_timeout(Duration::from_secs(30)),
//! );
//!
//! match circuit.execute(|| async { billing.charge(&order).await }).await {
//!     Ok(receipt) => process(receipt),
//!     Err(CircuitBreakerError::Open) => queue_for_later(order),
//!     Err(e) => report(e),
//! }
//! ```

use crate::timeout::with_timeout;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally.
    Closed,
    /// Circuit is open, calls are rejected without invoking the operation.
    Open,
    /// Circuit is half-open, a limited number of probes test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the circuit breaker (for logging/health reporting).
    pub name: String,
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Number of successful probes needed to close the circuit from half-open.
    /// Also bounds how many probes may be in flight at once.
    pub success_threshold: u32,
    /// Time to wait before transitioning from open to half-open.
    pub reset_timeout: Duration,
    /// Per-call deadline; an operation that does not settle within this
    /// window counts as a failure.
    pub operation_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(10),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the success threshold for recovery.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the reset timeout.
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the per-operation timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

/// Circuit breaker error.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the operation was never invoked.
    Open,
    /// Circuit is half-open and all probe slots are taken.
    ProbeLimitReached,
    /// Operation did not settle within the operation timeout.
    Timeout(Duration),
    /// Operation was executed and failed.
    Execution(E),
}

impl<E> CircuitBreakerError<E> {
    /// True when the error is synthetic (the operation never ran).
    pub fn is_fast_fail(&self) -> bool {
        matches!(self, Self::Open | Self::ProbeLimitReached)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Circuit breaker is open"),
            Self::ProbeLimitReached => write!(f, "Half-open probe limit reached"),
            Self::Timeout(d) => write!(f, "Operation timed out after {:?}", d),
            Self::Execution(e) => write!(f, "Execution failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CircuitBreakerError<E> {}

/// Internal circuit breaker state.
struct CircuitBreakerState {
    state: CircuitState,
    changed_at: Instant,
    last_error: Option<String>,
}

/// Circuit breaker for isolating a failing downstream dependency.
///
/// State mutations are serialized through the inner lock; admitted operations
/// themselves run concurrently. The scheduled open→half-open transition is
/// held as an abortable task so a manual `reset()` cannot be followed by a
/// stale transition firing.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<CircuitBreakerState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    probes_in_flight: AtomicU32,
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
    reset_task: Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<CircuitBreaker>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            reset_timeout = ?config.reset_timeout,
            "Circuit breaker initialized"
        );

        Arc::new_cyclic(|weak| Self {
            config,
            inner: RwLock::new(CircuitBreakerState {
                state: CircuitState::Closed,
                changed_at: Instant::now(),
                last_error: None,
            }),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            probes_in_flight: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            reset_task: Mutex::new(None),
            weak_self: weak.clone(),
        })
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        self.inner.read().state
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the last recorded failure message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    /// Execute an operation with circuit breaker protection.
    ///
    /// The operation is raced against `operation_timeout`; a call that does
    /// not settle in time counts as a failure. While half-open, at most
    /// `success_threshold` probes are admitted concurrently.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.maybe_transition_to_half_open();

        let probing = match self.inner.read().state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                debug!(name = %self.config.name, "Circuit breaker rejected call (open)");
                return Err(CircuitBreakerError::Open);
            }
            CircuitState::HalfOpen => {
                if !self.try_acquire_probe() {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(name = %self.config.name, "Circuit breaker rejected probe (saturated)");
                    return Err(CircuitBreakerError::ProbeLimitReached);
                }
                true
            }
        };

        let result = with_timeout(self.config.operation_timeout, f).await;

        if probing {
            self.release_probe();
        }

        match result {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(e.to_string());
                Err(CircuitBreakerError::Execution(e))
            }
            Err(elapsed) => {
                self.record_failure(format!("operation timed out after {:?}", elapsed));
                Err(CircuitBreakerError::Timeout(elapsed))
            }
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let state = self.inner.read().state;
        match state {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.close();
                }
            }
            CircuitState::Open => {
                debug!(name = %self.config.name, "Success recorded while circuit open");
            }
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self, error: impl Into<String>) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.write().last_error = Some(error.into());

        let state = self.inner.read().state;
        match state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing reopens the circuit.
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    /// Manually reset the circuit breaker to closed, cancelling any scheduled
    /// open→half-open transition and clearing all counters.
    pub fn reset(&self) {
        self.cancel_reset_task();
        self.close();
        self.inner.write().last_error = None;
        self.failure_count.store(0, Ordering::SeqCst);
    }

    /// Manually force the circuit open.
    pub fn force_open(&self) {
        self.open();
    }

    fn open(&self) {
        {
            let mut inner = self.inner.write();
            if inner.state == CircuitState::Open {
                return;
            }
            warn!(
                name = %self.config.name,
                failures = self.failure_count.load(Ordering::SeqCst),
                "Circuit breaker OPENED"
            );
            inner.state = CircuitState::Open;
            inner.changed_at = Instant::now();
        }
        self.success_count.store(0, Ordering::SeqCst);
        self.probes_in_flight.store(0, Ordering::SeqCst);
        self.schedule_half_open();
    }

    fn close(&self) {
        {
            let mut inner = self.inner.write();
            if inner.state == CircuitState::Closed {
                return;
            }
            info!(name = %self.config.name, "Circuit breaker CLOSED");
            inner.state = CircuitState::Closed;
            inner.changed_at = Instant::now();
        }
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.probes_in_flight.store(0, Ordering::SeqCst);
    }

    fn transition_to_half_open(&self) {
        let mut inner = self.inner.write();
        if inner.state != CircuitState::Open {
            return;
        }
        debug!(name = %self.config.name, "Circuit breaker transitioning to HALF-OPEN");
        inner.state = CircuitState::HalfOpen;
        inner.changed_at = Instant::now();
        self.success_count.store(0, Ordering::SeqCst);
        self.probes_in_flight.store(0, Ordering::SeqCst);
    }

    /// Lazy open→half-open edge for callers arriving after the reset timeout
    /// elapsed. Covers environments where the scheduled task could not run.
    fn maybe_transition_to_half_open(&self) {
        let due = {
            let inner = self.inner.read();
            inner.state == CircuitState::Open
                && inner.changed_at.elapsed() >= self.config.reset_timeout
        };
        if due {
            self.transition_to_half_open();
        }
    }

    /// Schedule the automatic open→half-open transition. Outside a tokio
    /// runtime the lazy elapsed-time check still guarantees the edge.
    fn schedule_half_open(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = self.weak_self.clone();
        let delay = self.config.reset_timeout;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(breaker) = weak.upgrade() {
                breaker.transition_to_half_open();
            }
        });
        if let Some(previous) = self.reset_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn cancel_reset_task(&self) {
        if let Some(task) = self.reset_task.lock().take() {
            task.abort();
        }
    }

    fn try_acquire_probe(&self) -> bool {
        let limit = self.config.success_threshold.max(1);
        self.probes_in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_probe(&self) {
        let _ = self
            .probes_in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    // Metrics

    /// Get the current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Get the current success count (meaningful in half-open state).
    pub fn success_count(&self) -> u32 {
        self.success_count.load(Ordering::SeqCst)
    }

    /// Get total calls seen.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get total rejected calls (fast-fails).
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Get a point-in-time health snapshot.
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: self.state(),
            failure_count: self.failure_count(),
            success_count: self.success_count(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            last_error: self.last_error(),
        }
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        if let Some(task) = self.reset_task.lock().take() {
            task.abort();
        }
    }
}

/// Circuit breaker health snapshot.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Circuit breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Current consecutive failure count.
    pub failure_count: u32,
    /// Current half-open success count.
    pub success_count: u32,
    /// Total calls.
    pub total_requests: u64,
    /// Total successful calls.
    pub total_successes: u64,
    /// Total failed calls.
    pub total_failures: u64,
    /// Total fast-failed calls.
    pub total_rejections: u64,
    /// Last recorded failure message.
    pub last_error: Option<String>,
}

impl CircuitBreakerStats {
    /// Success rate over all calls (1.0 when no calls were made).
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.total_successes as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("test")
            .failure_threshold(3)
            .success_threshold(2)
            .reset_timeout(Duration::from_millis(1000))
            .operation_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn opens_exactly_at_failure_threshold() {
        let cb = CircuitBreaker::new(test_config());

        for i in 1..=3u32 {
            let _: Result<(), _> = cb.execute(|| async { Err::<(), _>("boom") }).await;
            if i < 3 {
                assert_eq!(cb.state(), CircuitState::Closed, "not open before Nth failure");
            }
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.last_error(), Some("boom".to_string()));
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_invoking_operation() {
        let cb = CircuitBreaker::new(test_config().failure_threshold(1));
        let _: Result<(), _> = cb.execute(|| async { Err::<(), _>("boom") }).await;

        let invoked = AtomicU32::new(0);
        let result: Result<(), CircuitBreakerError<&str>> = cb
            .execute(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.total_rejections(), 1);
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let cb = CircuitBreaker::new(test_config());

        cb.record_failure("e1");
        cb.record_failure("e2");
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_fails_until_reset_timeout_then_admits_probe() {
        let cb = CircuitBreaker::new(test_config());

        // Three failing calls trip the circuit.
        for _ in 0..3 {
            let _: Result<(), _> = cb.execute(|| async { Err::<(), _>("down") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Mid-cooldown: rejected, operation never constructed.
        tokio::time::advance(Duration::from_millis(500)).await;
        let result: Result<(), CircuitBreakerError<&str>> =
            cb.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));

        // Past the cooldown: admitted as a half-open probe.
        tokio::time::advance(Duration::from_millis(600)).await;
        let result: Result<(), CircuitBreakerError<&str>> =
            cb.execute(|| async { Ok(()) }).await;
        assert!(result.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn closes_after_success_threshold_in_half_open() {
        let cb = CircuitBreaker::new(test_config().failure_threshold(1));
        let _: Result<(), _> = cb.execute(|| async { Err::<(), _>("down") }).await;

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        for _ in 0..2 {
            let result: Result<(), CircuitBreakerError<&str>> =
                cb.execute(|| async { Ok(()) }).await;
            assert!(result.is_ok());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.success_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_in_half_open_reopens() {
        let cb = CircuitBreaker::new(test_config().failure_threshold(1));
        let _: Result<(), _> = cb.execute(|| async { Err::<(), _>("down") }).await;

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let _: Result<(), _> = cb.execute(|| async { Err::<(), _>("still down") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let cb = CircuitBreaker::new(test_config().failure_threshold(1));

        let result: Result<(), CircuitBreakerError<&str>> = cb
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Timeout(_))));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_scheduled_half_open_transition() {
        let cb = CircuitBreaker::new(test_config().failure_threshold(1));
        let _: Result<(), _> = cb.execute(|| async { Err::<(), _>("down") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.last_error(), None);

        // The aborted timer must not flip a reset breaker to half-open.
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probes_capped_at_success_threshold() {
        let cb = CircuitBreaker::new(test_config().failure_threshold(1).success_threshold(2));
        let _: Result<(), _> = cb.execute(|| async { Err::<(), _>("down") }).await;
        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Two hung probes occupy both slots.
        let slow = |cb: Arc<CircuitBreaker>| {
            tokio::spawn(async move {
                let _: Result<(), CircuitBreakerError<&str>> = cb
                    .execute(|| async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(())
                    })
                    .await;
            })
        };
        let h1 = slow(cb.clone());
        let h2 = slow(cb.clone());
        tokio::task::yield_now().await;

        let result: Result<(), CircuitBreakerError<&str>> =
            cb.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::ProbeLimitReached)));

        let _ = h1.await;
        let _ = h2.await;
    }
}

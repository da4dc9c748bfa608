//! Pluggable error-handling strategies.
//!
//! When a delivery fails the bus consults an ordered chain of strategies.
//! Each applicable strategy is invoked in registration order until one
//! returns `true` (handled); if none claims the failure, the pending-message
//! retry queue remains the fallback.

use crate::error::BusError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Context handed to strategies alongside the failure.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Correlation ID of the failing message.
    pub correlation_id: Uuid,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Retries attempted so far.
    pub retry_count: u32,
    /// Retry budget of the failing message.
    pub max_retries: u32,
    /// Caller metadata from the original publish.
    pub metadata: HashMap<String, String>,
}

impl From<&crate::message::PendingMessage> for ErrorContext {
    fn from(msg: &crate::message::PendingMessage) -> Self {
        Self {
            correlation_id: msg.correlation_id,
            payload: msg.payload.clone(),
            retry_count: msg.retry_count,
            max_retries: msg.max_retries,
            metadata: msg.metadata.clone(),
        }
    }
}

/// A single error-handling strategy.
#[async_trait]
pub trait ErrorStrategy: Send + Sync {
    /// Strategy name for logging.
    fn name(&self) -> &str;

    /// Whether this strategy applies to the given event type.
    fn applies_to(&self, _event_type: &str) -> bool {
        true
    }

    /// Handle a delivery failure. Returning `true` claims the failure and
    /// stops the chain.
    async fn handle_error(&self, error: &BusError, event_type: &str, ctx: &ErrorContext) -> bool;
}

/// Ordered chain of strategies with short-circuit semantics.
#[derive(Default)]
pub struct ErrorStrategyChain {
    strategies: RwLock<Vec<Arc<dyn ErrorStrategy>>>,
}

impl ErrorStrategyChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy. Order of registration is order of consultation.
    pub fn register(&self, strategy: Arc<dyn ErrorStrategy>) {
        debug!(strategy = strategy.name(), "Registering error strategy");
        self.strategies.write().push(strategy);
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.strategies.read().len()
    }

    /// True when no strategy is registered.
    pub fn is_empty(&self) -> bool {
        self.strategies.read().is_empty()
    }

    /// Run the chain for a failure. Returns whether any strategy claimed it.
    pub async fn handle(&self, error: &BusError, event_type: &str, ctx: &ErrorContext) -> bool {
        let strategies: Vec<_> = self.strategies.read().iter().cloned().collect();
        for strategy in strategies {
            if !strategy.applies_to(event_type) {
                continue;
            }
            if strategy.handle_error(error, event_type, ctx).await {
                debug!(
                    strategy = strategy.name(),
                    event_type, "Failure handled by strategy"
                );
                return true;
            }
        }
        false
    }
}

/// Exponential backoff with jitter: `initial * factor^attempt`, scaled by a
/// random factor in [0.75, 1.25] and clamped to `max`.
pub fn backoff_delay(initial: Duration, factor: f64, attempt: u32, max: Duration) -> Duration {
    let base = initial.as_millis() as f64 * factor.powi(attempt as i32);
    let jittered = base * (0.75 + rand_factor() * 0.5);
    Duration::from_millis(jittered as u64).min(max)
}

/// Random factor in [0.0, 1.0) derived from the clock's sub-second noise.
fn rand_factor() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Per-message retry accounting with exponential backoff.
///
/// Keeps a per-`(event_type, correlation_id)` attempt counter; while the
/// cap has headroom the strategy claims the failure (a retry is the right
/// handling), once exhausted it declines so later strategies can escalate.
pub struct RetryStrategy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    attempts: DashMap<String, u32>,
}

impl RetryStrategy {
    /// Create a retry strategy with the given per-key cap.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            attempts: DashMap::new(),
        }
    }

    /// Set the initial backoff delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the backoff ceiling.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Attempts recorded for a message key.
    pub fn attempts(&self, event_type: &str, correlation_id: Uuid) -> u32 {
        self.attempts
            .get(&Self::key(event_type, correlation_id))
            .map(|a| *a)
            .unwrap_or(0)
    }

    fn key(event_type: &str, correlation_id: Uuid) -> String {
        format!("{}:{}", event_type, correlation_id)
    }
}

#[async_trait]
impl ErrorStrategy for RetryStrategy {
    fn name(&self) -> &str {
        "retry"
    }

    async fn handle_error(&self, error: &BusError, event_type: &str, ctx: &ErrorContext) -> bool {
        let key = Self::key(event_type, ctx.correlation_id);

        if ctx.retry_count >= ctx.max_retries {
            self.attempts.remove(&key);
            warn!(
                event_type,
                correlation_id = %ctx.correlation_id,
                retry_count = ctx.retry_count,
                "Message retry budget spent, escalating"
            );
            return false;
        }

        let attempt = {
            let mut entry = self.attempts.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if attempt > self.max_attempts {
            self.attempts.remove(&key);
            warn!(
                event_type,
                correlation_id = %ctx.correlation_id,
                attempts = attempt - 1,
                "Retry budget exhausted, escalating"
            );
            return false;
        }

        let delay = backoff_delay(
            self.initial_delay,
            self.backoff_factor,
            attempt,
            self.max_delay,
        );
        debug!(
            event_type,
            correlation_id = %ctx.correlation_id,
            attempt,
            delay = ?delay,
            error = %error,
            "Scheduling retry"
        );
        true
    }
}

/// Failure severity for operator notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine failure, retry machinery will cope.
    Low,
    /// Worth watching.
    Medium,
    /// Operator attention required.
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Sink for high-severity failure notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Push a notification to the operator channel.
    async fn notify(&self, severity: Severity, event_type: &str, error: &BusError);
}

/// Classifies failures by event type and notifies an operator channel on
/// high severity. Never claims a failure as handled, so it composes with
/// any other strategy without suppressing it.
pub struct NotificationStrategy {
    notifier: Arc<dyn Notifier>,
    high_prefixes: Vec<String>,
    medium_prefixes: Vec<String>,
}

impl NotificationStrategy {
    /// Create a notification strategy; every event classifies Low until
    /// prefixes are configured.
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            high_prefixes: Vec::new(),
            medium_prefixes: Vec::new(),
        }
    }

    /// Event-type prefixes classified as high severity.
    pub fn high_severity(mut self, prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.high_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Event-type prefixes classified as medium severity.
    pub fn medium_severity(
        mut self,
        prefixes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.medium_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Classify an event type.
    pub fn classify(&self, event_type: &str) -> Severity {
        if self.high_prefixes.iter().any(|p| event_type.starts_with(p)) {
            Severity::High
        } else if self.medium_prefixes.iter().any(|p| event_type.starts_with(p)) {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[async_trait]
impl ErrorStrategy for NotificationStrategy {
    fn name(&self) -> &str {
        "notification"
    }

    async fn handle_error(&self, error: &BusError, event_type: &str, ctx: &ErrorContext) -> bool {
        let severity = self.classify(event_type);
        if severity == Severity::High {
            warn!(
                event_type,
                correlation_id = %ctx.correlation_id,
                error = %error,
                "High-severity delivery failure, notifying operators"
            );
            self.notifier.notify(severity, event_type, error).await;
        } else {
            debug!(event_type, severity = %severity, "Delivery failure observed");
        }
        false
    }
}

//! Pending message envelope and publish options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Options controlling a single `publish` call.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Attempt delivery now; on failure the event is enqueued for retry.
    /// When false the event is enqueued without an immediate attempt.
    pub immediate: bool,

    /// Per-message retry budget; falls back to the bus default when unset.
    pub max_retries: Option<u32>,

    /// Caller metadata carried across retries and into dead-letter entries.
    pub metadata: HashMap<String, String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            immediate: true,
            max_retries: None,
            metadata: HashMap::new(),
        }
    }
}

impl PublishOptions {
    /// Enqueue without attempting immediate delivery.
    pub fn deferred() -> Self {
        Self {
            immediate: false,
            ..Default::default()
        }
    }

    /// Set the retry budget for this message.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Attach a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An event waiting in the retry queue.
///
/// Created when an immediate publish fails (or was deferred); destroyed on
/// successful redelivery or when its retry budget is exhausted and it is
/// handed to the dead-letter path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    /// Event type, e.g. `"booking.created"`.
    pub event_type: String,

    /// Event payload.
    pub payload: serde_json::Value,

    /// Correlation ID for tracing the message across retries and handlers.
    pub correlation_id: Uuid,

    /// When the message entered the queue.
    pub created_at: DateTime<Utc>,

    /// Retries attempted so far.
    pub retry_count: u32,

    /// Retry budget.
    pub max_retries: u32,

    /// Earliest time the next retry may run.
    pub next_retry_at: DateTime<Utc>,

    /// Caller metadata.
    pub metadata: HashMap<String, String>,
}

impl PendingMessage {
    /// Create a pending message due after `initial_delay`.
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
        initial_delay: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_type: event_type.into(),
            payload,
            correlation_id: Uuid::new_v4(),
            created_at: now,
            retry_count: 0,
            max_retries,
            next_retry_at: now
                + chrono::Duration::from_std(initial_delay).unwrap_or_else(|_| chrono::Duration::zero()),
            metadata: HashMap::new(),
        }
    }

    /// Attach caller metadata.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// True when the message is eligible for a retry attempt.
    pub fn is_due(&self) -> bool {
        Utc::now() >= self.next_retry_at
    }

    /// True when the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Record a failed attempt and push the due time out by `delay`.
    pub fn record_failed_attempt(&mut self, delay: Duration) {
        self.retry_count += 1;
        self.next_retry_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_starts_with_zero_retries() {
        let msg = PendingMessage::new(
            "location.created",
            serde_json::json!({"id": 7}),
            5,
            Duration::from_millis(100),
        );

        assert_eq!(msg.retry_count, 0);
        assert_eq!(msg.max_retries, 5);
        assert!(!msg.retries_exhausted());
        assert!(msg.next_retry_at > msg.created_at);
    }

    #[test]
    fn message_becomes_due_after_delay() {
        let msg = PendingMessage::new("e", serde_json::json!({}), 3, Duration::ZERO);
        assert!(msg.is_due());

        let future = PendingMessage::new("e", serde_json::json!({}), 3, Duration::from_secs(60));
        assert!(!future.is_due());
    }

    #[test]
    fn failed_attempts_exhaust_the_budget() {
        let mut msg = PendingMessage::new("e", serde_json::json!({}), 2, Duration::ZERO);

        msg.record_failed_attempt(Duration::from_millis(10));
        assert_eq!(msg.retry_count, 1);
        assert!(!msg.retries_exhausted());

        msg.record_failed_attempt(Duration::from_millis(10));
        assert_eq!(msg.retry_count, 2);
        assert!(msg.retries_exhausted());
    }

    #[test]
    fn publish_options_builder() {
        let opts = PublishOptions::default()
            .max_retries(7)
            .metadata("source", "api");

        assert!(opts.immediate);
        assert_eq!(opts.max_retries, Some(7));
        assert_eq!(opts.metadata.get("source"), Some(&"api".to_string()));

        let deferred = PublishOptions::deferred();
        assert!(!deferred.immediate);
    }

    #[test]
    fn pending_message_round_trips_through_serde() {
        let msg = PendingMessage::new("kit.assigned", serde_json::json!({"kit": 3}), 4, Duration::ZERO);
        let json = serde_json::to_string(&msg).unwrap();
        let back: PendingMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(back.event_type, "kit.assigned");
        assert_eq!(back.correlation_id, msg.correlation_id);
        assert_eq!(back.max_retries, 4);
    }
}

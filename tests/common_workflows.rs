//! Integration tests for common Crossbar workflows.
//!
//! These tests exercise the core paths end to end: breaker-protected
//! delivery, background retries into the dead-letter store, and fan-out to
//! live subscribers.

use async_trait::async_trait;
use crossbar::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

// =============================================================================
// Test transport
// =============================================================================

/// Transport whose availability can be flipped mid-test.
struct SwitchableTransport {
    name: String,
    failing: AtomicBool,
    sends: AtomicU32,
}

impl SwitchableTransport {
    fn new(name: &str, failing: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing: AtomicBool::new(failing),
            sends: AtomicU32::new(0),
        })
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SwitchableTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _: &str, _: &serde_json::Value) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(TransportError::Send("downstream offline".into()))
        } else {
            Ok(())
        }
    }
}

fn fast_bus(transport: Arc<SwitchableTransport>) -> RetryableEventBus {
    let bus = RetryableEventBus::new(
        BusConfig::default()
            .initial_delay(Duration::ZERO)
            .processing_interval(Duration::from_millis(10))
            .retry_interval(Duration::from_millis(10))
            .breaker(CircuitBreakerConfig::default().failure_threshold(100)),
    );
    bus.register_transport(transport);
    bus
}

// =============================================================================
// Retry-to-dead-letter workflow
// =============================================================================

#[tokio::test]
async fn failing_publish_retries_then_dead_letters() {
    let transport = SwitchableTransport::new("local", true);
    let bus = fast_bus(transport.clone());

    let dead_letters = Arc::new(DeadLetterStore::new());
    bus.strategies().register(Arc::new(RetryStrategy::new(100)));
    bus.strategies().register(Arc::new(DeadLetterQueueStrategy::new(
        dead_letters.clone(),
        ["location.created"],
    )));

    let delivered = bus
        .publish(
            "location.created",
            serde_json::json!({"name": "North Warehouse"}),
            PublishOptions::default().max_retries(3),
        )
        .await
        .unwrap();
    assert!(!delivered);
    assert_eq!(bus.queue_depth(), 1);

    bus.start().unwrap();
    // 3 retries at zero backoff settle well inside this window.
    tokio::time::sleep(Duration::from_millis(300)).await;
    bus.shutdown().unwrap();

    assert_eq!(bus.queue_depth(), 0);
    let entries = dead_letters.events("location.created");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].retry_count, 3);
    assert_eq!(entries[0].payload["name"], "North Warehouse");
    // Immediate attempt + 3 retries.
    assert_eq!(transport.sends(), 4);
}

#[tokio::test]
async fn recovered_downstream_drains_the_queue() {
    let transport = SwitchableTransport::new("local", true);
    let bus = fast_bus(transport.clone());

    bus.publish("booking.created", serde_json::json!({"id": 1}), PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(bus.queue_depth(), 1);

    transport.set_failing(false);
    bus.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    bus.shutdown().unwrap();

    assert_eq!(bus.queue_depth(), 0);
}

// =============================================================================
// Breaker trip and recovery through the bus
// =============================================================================

#[tokio::test]
async fn channel_breaker_opens_and_recovers() {
    let transport = SwitchableTransport::new("local", true);
    let bus = RetryableEventBus::new(
        BusConfig::default().initial_delay(Duration::ZERO).breaker(
            CircuitBreakerConfig::default()
                .failure_threshold(2)
                .success_threshold(1)
                .reset_timeout(Duration::from_millis(50)),
        ),
    );
    bus.register_transport(transport.clone());

    for _ in 0..3 {
        bus.publish("e", serde_json::json!({}), PublishOptions::default())
            .await
            .unwrap();
    }
    // Two real failures tripped the breaker; the third was fast-failed.
    assert_eq!(transport.sends(), 2);
    assert_eq!(bus.status().channels[0].state, CircuitState::Open);

    // After the cooldown a probe is admitted and the breaker closes.
    transport.set_failing(false);
    tokio::time::sleep(Duration::from_millis(80)).await;
    let delivered = bus
        .publish("e", serde_json::json!({}), PublishOptions::default())
        .await
        .unwrap();
    assert!(delivered);
    assert_eq!(bus.status().channels[0].state, CircuitState::Closed);
}

// =============================================================================
// Fan-out workflows
// =============================================================================

#[tokio::test]
async fn bus_delivers_to_matching_live_subscribers() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let bus = RetryableEventBus::new(BusConfig::default());
    bus.register_transport(Arc::new(FanoutTransport::new(registry.clone())));

    let (wildcard, mut wildcard_rx) = LocalChannel::new();
    registry.add_connection("w", wildcard, "user-w", None);
    registry.subscribe("w", ["*"]).unwrap();

    let (scoped, mut scoped_rx) = LocalChannel::new();
    registry.add_connection("s", scoped, "user-s", None);
    registry.subscribe("s", ["kit.assigned"]).unwrap();

    let delivered = bus
        .publish("booking.created", serde_json::json!({"id": 2}), PublishOptions::default())
        .await
        .unwrap();
    assert!(delivered);

    let frame: serde_json::Value =
        serde_json::from_str(&wildcard_rx.try_recv().unwrap()).unwrap();
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["data"]["type"], "booking.created");
    assert!(scoped_rx.try_recv().is_err());
}

#[tokio::test]
async fn targeted_fanout_respects_user_and_org_scopes() {
    let registry = Arc::new(SubscriptionRegistry::new());

    let (a, mut rx_a) = LocalChannel::new();
    registry.add_connection("a", a, "alice", Some("org-1".into()));
    let (b, mut rx_b) = LocalChannel::new();
    registry.add_connection("b", b, "bob", Some("org-1".into()));
    let (c, mut rx_c) = LocalChannel::new();
    registry.add_connection("c", c, "carol", Some("org-2".into()));
    for id in ["a", "b", "c"] {
        registry.subscribe(id, ["shift.updated"]).unwrap();
    }

    // User-targeted publish reaches only that user's connection.
    assert_eq!(
        registry.publish("shift.updated", &serde_json::json!({}), Some("alice"), None),
        1
    );
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_err());
    assert!(rx_c.try_recv().is_err());

    // Org-targeted publish reaches every member of that org.
    assert_eq!(
        registry.publish("shift.updated", &serde_json::json!({}), None, Some("org-1")),
        2
    );
    assert!(rx_a.try_recv().is_ok());
    assert!(rx_b.try_recv().is_ok());
    assert!(rx_c.try_recv().is_err());
}

// =============================================================================
// Notification escalation
// =============================================================================

struct RecordingNotifier {
    high_notifications: AtomicU32,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, severity: Severity, _: &str, _: &BusError) {
        if severity == Severity::High {
            self.high_notifications.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn high_severity_failures_notify_without_suppressing_dead_letters() {
    let transport = SwitchableTransport::new("local", true);
    let bus = fast_bus(transport);

    let notifier = Arc::new(RecordingNotifier {
        high_notifications: AtomicU32::new(0),
    });
    let dead_letters = Arc::new(DeadLetterStore::new());
    bus.strategies().register(Arc::new(
        NotificationStrategy::new(notifier.clone()).high_severity(["payment."]),
    ));
    bus.strategies().register(Arc::new(RetryStrategy::new(100)));
    bus.strategies()
        .register(Arc::new(DeadLetterQueueStrategy::new(dead_letters.clone(), ["*"])));

    bus.publish(
        "payment.capture_failed",
        serde_json::json!({"order": 11}),
        PublishOptions::default().max_retries(1),
    )
    .await
    .unwrap();

    bus.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    bus.shutdown().unwrap();

    // Notified on the initial failure and the exhausting retry, and the
    // message still reached the dead-letter store.
    assert_eq!(notifier.high_notifications.load(Ordering::SeqCst), 2);
    assert_eq!(dead_letters.events("payment.capture_failed").len(), 1);
}

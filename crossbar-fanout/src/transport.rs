//! Bus transport that delivers into the subscription registry.

use crate::registry::SubscriptionRegistry;
use async_trait::async_trait;
use crossbar_bus::{Transport, TransportError};
use std::sync::Arc;
use tracing::debug;

/// Adapts a [`SubscriptionRegistry`] to the bus [`Transport`] contract, so
/// the bus's local channel fans events out to live subscribers.
///
/// Fan-out is at-most-once per subscriber: delivering to zero connections is
/// still a successful send.
pub struct FanoutTransport {
    name: String,
    registry: Arc<SubscriptionRegistry>,
}

impl FanoutTransport {
    /// Wrap a registry as the channel named `"fanout"`.
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self::with_name("fanout", registry)
    }

    /// Wrap a registry under a custom channel name.
    pub fn with_name(name: impl Into<String>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            name: name.into(),
            registry,
        }
    }
}

#[async_trait]
impl Transport for FanoutTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError> {
        let delivered = self.registry.publish(event_type, payload, None, None);
        debug!(event_type, delivered, "Event fanned out to subscribers");
        Ok(())
    }
}

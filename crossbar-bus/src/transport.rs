//! Transport abstraction and the in-process local transport.

use crate::error::TransportError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// A named delivery path the bus can route events over.
///
/// Implementations cover in-process dispatch, HTTP channels, broker clients,
/// and so on; the bus wraps every `send` in a per-channel circuit breaker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Channel name used for routing and breaker identity.
    fn name(&self) -> &str;

    /// Deliver one event. Failures are reported, never panicked.
    async fn send(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError>;
}

/// Handler invoked by [`LocalTransport`] for a matching event type.
pub type LocalHandler = Arc<
    dyn Fn(String, serde_json::Value) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send>>
        + Send
        + Sync,
>;

/// In-process transport dispatching events to registered async handlers.
///
/// Handlers are keyed by event type; `"*"` handlers receive every event.
/// An event with no handler is delivered successfully to nobody.
pub struct LocalTransport {
    name: String,
    handlers: DashMap<String, Vec<LocalHandler>>,
}

impl LocalTransport {
    /// Create a local transport named `"local"`.
    pub fn new() -> Self {
        Self::with_name("local")
    }

    /// Create a local transport with a custom channel name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: DashMap::new(),
        }
    }

    /// Register a handler for an event type (`"*"` for all).
    pub fn on<F, Fut>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(String, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let wrapped: LocalHandler = Arc::new(move |event_type, payload| {
            Box::pin(handler(event_type, payload))
        });
        self.handlers.entry(event_type.into()).or_default().push(wrapped);
    }

    /// Number of handlers registered for an event type.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map(|h| h.len()).unwrap_or(0)
    }

    fn handlers_for(&self, event_type: &str) -> Vec<LocalHandler> {
        let mut handlers = Vec::new();
        if let Some(exact) = self.handlers.get(event_type) {
            handlers.extend(exact.iter().cloned());
        }
        if let Some(wildcard) = self.handlers.get("*") {
            handlers.extend(wildcard.iter().cloned());
        }
        handlers
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError> {
        let handlers = self.handlers_for(event_type);
        if handlers.is_empty() {
            warn!(event_type, "No handlers registered for event");
            return Ok(());
        }

        debug!(event_type, handlers = handlers.len(), "Dispatching event locally");
        for handler in handlers {
            handler(event_type.to_string(), payload.clone()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn dispatches_to_matching_handler() {
        let transport = LocalTransport::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        transport.on("booking.created", move |_, _| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        transport
            .send("booking.created", &serde_json::json!({"id": 1}))
            .await
            .unwrap();
        transport
            .send("booking.cancelled", &serde_json::json!({"id": 1}))
            .await
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wildcard_handler_sees_every_event() {
        let transport = LocalTransport::new();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        transport.on("*", move |_, _| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        transport.send("a", &serde_json::json!({})).await.unwrap();
        transport.send("b", &serde_json::json!({})).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn handler_failure_propagates() {
        let transport = LocalTransport::new();
        transport.on("fragile", |_, _| async {
            Err(TransportError::Send("downstream offline".into()))
        });

        let result = transport.send("fragile", &serde_json::json!({})).await;
        assert!(matches!(result, Err(TransportError::Send(_))));
    }

    #[tokio::test]
    async fn missing_handler_is_not_an_error() {
        let transport = LocalTransport::new();
        assert!(transport.send("nobody.cares", &serde_json::json!({})).await.is_ok());
        assert_eq!(transport.handler_count("nobody.cares"), 0);
    }
}

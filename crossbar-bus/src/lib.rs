//! # Crossbar Bus
//!
//! Retrying event bus for the Crossbar event distribution core.
//!
//! ## Features
//!
//! - **Breaker-protected delivery** - every channel guarded by a circuit breaker
//! - **Eventual delivery** - failed publishes queue and retry with exponential
//!   backoff and jitter
//! - **Dead-lettering** - exhausted messages are parked for inspection/replay
//! - **Strategy chain** - pluggable, ordered error handling (retry,
//!   dead-letter, notification)
//! - **Multi-channel routing** - route an event type over several transports
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crossbar_bus::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> BusResult<()> {
//!     let bus = RetryableEventBus::new(BusConfig::default());
//!
//!     let transport = Arc::new(LocalTransport::new());
//!     transport.on("booking.created", |_, payload| async move {
//!         println!("booking created: {payload}");
//!         Ok(())
//!     });
//!     bus.register_transport(transport);
//!
//!     let store = Arc::new(DeadLetterStore::new());
//!     bus.strategies().register(Arc::new(RetryStrategy::new(5)));
//!     bus.strategies()
//!         .register(Arc::new(DeadLetterQueueStrategy::new(store, ["*"])));
//!
//!     bus.start()?;
//!     bus.publish("booking.created", serde_json::json!({"id": 42}), PublishOptions::default())
//!         .await?;
//!     Ok(())
//! }
//! ```

mod bus;
mod dead_letter;
mod error;
mod message;
mod strategy;
mod transport;

pub use bus::*;
pub use dead_letter::*;
pub use error::*;
pub use message::*;
pub use strategy::*;
pub use transport::*;

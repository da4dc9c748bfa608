//! # Crossbar Fanout
//!
//! Live-subscriber fan-out for the Crossbar event distribution core.
//!
//! The [`SubscriptionRegistry`] tracks connected clients, their event-type
//! filters, and user/organization targeting indexes, and pushes serialized
//! event frames to every matching open connection. Channels are opaque
//! capabilities so the registry works over any transport and tests run
//! without sockets.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crossbar_fanout::{LocalChannel, SubscriptionRegistry};
//!
//! let registry = SubscriptionRegistry::new();
//! let (channel, mut frames) = LocalChannel::new();
//!
//! registry.add_connection("conn-1", channel, "user-1", Some("org-1".into()));
//! registry.subscribe("conn-1", ["booking.created", "*"])?;
//!
//! registry.publish("booking.created", &serde_json::json!({"id": 42}), None, None);
//! ```

mod connection;
mod error;
mod message;
mod registry;
mod transport;

pub use connection::*;
pub use error::*;
pub use message::*;
pub use registry::*;
pub use transport::*;

//! # Crossbar Resilience
//!
//! Failure-isolation primitives for the Crossbar event distribution core.
//!
//! - **Circuit Breaker**: fail fast against a tripped downstream dependency
//! - **Breaker Registry**: share named breakers across call sites
//! - **Timeout**: per-call deadlines with cancellable timers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crossbar_resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};
//! use std::time::Duration;
//!
//! let registry = CircuitBreakerRegistry::new();
//! let circuit = registry.get_or_create(
//!     "inventory-api",
//!     CircuitBreakerConfig::default()
//!         .failure_threshold(5)
//!         .reset_timeout(Duration::from_secs(30)),
//! );
//!
//! let result = circuit.execute(|| async { inventory.fetch().await }).await;
//! ```

mod circuit_breaker;
mod registry;
mod timeout;

pub use circuit_breaker::*;
pub use registry::*;
pub use timeout::*;

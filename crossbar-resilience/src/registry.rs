//! Named circuit breaker registry.
//!
//! Call sites that guard the same downstream dependency share one breaker by
//! name. The registry also supports bulk health reporting and administrative
//! reset.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of named circuit breakers.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
        }
    }

    /// Get the breaker registered under `name`, creating it with `config` if
    /// absent. Idempotent: the first registration wins; later calls return
    /// the existing breaker and their config is ignored.
    pub fn get_or_create(
        &self,
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let name = name.into();
        self.breakers
            .entry(name.clone())
            .or_insert_with(|| {
                let config = CircuitBreakerConfig {
                    name: name.clone(),
                    ..config
                };
                CircuitBreaker::new(config)
            })
            .clone()
    }

    /// Look up a breaker by name.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// All registered breakers.
    pub fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|b| b.clone()).collect()
    }

    /// Reset every registered breaker to closed.
    pub fn reset_all(&self) {
        info!(count = self.breakers.len(), "Resetting all circuit breakers");
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    /// Health snapshot of every registered breaker.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.iter().map(|b| b.stats()).collect()
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// True when no breaker has been registered.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

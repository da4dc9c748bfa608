// Crossbar - resilient event distribution core.
//
// This facade re-exports the member crates: circuit breaking
// (crossbar-resilience), the retrying event bus (crossbar-bus), and
// live-subscriber fan-out (crossbar-fanout).

// Re-export member crates under stable module names
pub use crossbar_bus as bus;
pub use crossbar_fanout as fanout;
pub use crossbar_resilience as resilience;

// Prelude for common imports
pub mod prelude {
    pub use crossbar_bus::{
        BusConfig, BusError, BusResult, BusStatus, DeadLetterEntry, DeadLetterQueueStrategy,
        DeadLetterStore, ErrorContext, ErrorStrategy, ErrorStrategyChain, LocalTransport,
        NotificationStrategy, Notifier, PendingMessage, PublishOptions, RetryStrategy,
        RetryableEventBus, Severity, Transport, TransportError,
    };
    pub use crossbar_fanout::{
        EventChannel, EventFrame, FanoutTransport, LocalChannel, SubscriptionRegistry,
    };
    pub use crossbar_resilience::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
        CircuitBreakerStats, CircuitState,
    };
}

//! Error types for bus operations.

use thiserror::Error;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors surfaced by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The send primitive itself failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Payload could not be serialized for the wire.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The underlying channel is gone.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Bus-level errors.
///
/// Expected failure modes (a downstream being down, a circuit being open)
/// are reported through `publish` returning `Ok(false)` and through the
/// strategy chain; `BusError` values returned from `publish` indicate misuse.
#[derive(Debug, Error)]
pub enum BusError {
    /// No transport has been registered with the bus.
    #[error("no transports registered")]
    NoTransports,

    /// An event was routed to a channel name with no registered transport.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// Delivery over a channel failed.
    #[error("delivery failed on channel {channel}: {reason}")]
    Delivery {
        /// Channel the attempt went through.
        channel: String,
        /// Failure description from the transport.
        reason: String,
    },

    /// Delivery attempt did not settle within the operation timeout.
    #[error("delivery timed out on channel {0}")]
    Timeout(String),

    /// The channel's circuit breaker rejected the attempt.
    #[error("circuit open for channel {0}")]
    CircuitOpen(String),

    /// Background processing already started.
    #[error("bus already running")]
    AlreadyRunning,

    /// Background processing not started.
    #[error("bus not running")]
    NotRunning,
}

impl BusError {
    /// Short machine-readable classification, recorded on dead-letter entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoTransports => "no_transports",
            Self::UnknownChannel(_) => "unknown_channel",
            Self::Delivery { .. } => "delivery_failed",
            Self::Timeout(_) => "timeout",
            Self::CircuitOpen(_) => "circuit_open",
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
        }
    }

    /// Configuration errors fail fast and are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NoTransports | Self::UnknownChannel(_))
    }
}

//! Error types for fan-out operations.

use thiserror::Error;

/// Result type for registry operations.
pub type FanoutResult<T> = Result<T, FanoutError>;

/// Registry errors.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// No connection registered under the given id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
}

/// Errors surfaced by an event channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has been closed by the peer.
    #[error("channel closed")]
    Closed,

    /// The send primitive failed.
    #[error("send failed: {0}")]
    Send(String),
}

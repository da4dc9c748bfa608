//! Connections and the opaque channel capability.

use crate::error::ChannelError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Opaque outbound channel to one connected client.
///
/// Keeps the registry transport-agnostic: a websocket, an SSE stream, or a
/// test channel all look the same.
pub trait EventChannel: Send + Sync {
    /// Push one serialized frame to the client.
    fn send(&self, frame: &str) -> Result<(), ChannelError>;

    /// Whether the channel can still accept frames.
    fn is_open(&self) -> bool;
}

/// A registered client connection.
#[derive(Clone)]
pub struct Connection {
    /// Connection identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning organization, when scoped.
    pub organization_id: Option<String>,
    channel: Arc<dyn EventChannel>,
}

impl Connection {
    /// Create a connection around a channel handle.
    pub fn new(
        id: impl Into<String>,
        channel: Arc<dyn EventChannel>,
        user_id: impl Into<String>,
        organization_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            organization_id,
            channel,
        }
    }

    /// Push a frame to the client.
    pub fn send(&self, frame: &str) -> Result<(), ChannelError> {
        self.channel.send(frame)
    }

    /// Whether the underlying channel is open.
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }
}

/// In-process channel backed by an unbounded mpsc queue.
///
/// The receiver half is handed to whatever writer loop owns the real
/// socket; tests read frames from it directly.
pub struct LocalChannel {
    tx: mpsc::UnboundedSender<String>,
    open: AtomicBool,
}

impl LocalChannel {
    /// Create a channel, returning the sending capability and the frame
    /// receiver.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                open: AtomicBool::new(true),
            }),
            rx,
        )
    }

    /// Mark the channel closed; subsequent sends fail.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl EventChannel for LocalChannel {
    fn send(&self, frame: &str) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        self.tx
            .send(frame.to_string())
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

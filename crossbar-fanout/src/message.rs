//! Outbound wire frames.

use serde::{Deserialize, Serialize};

/// Frame pushed to live subscribers:
/// `{ "type": "event", "data": { "type": ..., "payload": ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    /// Frame discriminator, always `"event"` for event frames.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Event envelope.
    pub data: EventData,
}

/// Event envelope inside a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    /// Event type, matched against connection filter sets.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub payload: serde_json::Value,
}

impl EventFrame {
    /// Build an event frame.
    pub fn event(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            frame_type: "event".to_string(),
            data: EventData {
                event_type: event_type.into(),
                payload,
            },
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

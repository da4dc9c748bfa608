//! Dead-letter storage and the terminal dead-letter strategy.

use crate::error::BusError;
use crate::strategy::{ErrorContext, ErrorStrategy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// A message that exhausted its retries, parked for inspection or replay.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    /// Entry identifier (used for selective removal).
    pub id: Uuid,
    /// Event type of the original message.
    pub event_type: String,
    /// Original payload.
    pub payload: serde_json::Value,
    /// Human-readable failure description.
    pub error: String,
    /// Machine-readable failure classification.
    pub error_kind: String,
    /// Retries attempted before giving up.
    pub retry_count: u32,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
}

/// In-memory dead-letter store keyed by event type.
///
/// Entries are append-only until explicitly removed or cleared; they do not
/// survive process restart.
#[derive(Default)]
pub struct DeadLetterStore {
    entries: DashMap<String, Vec<DeadLetterEntry>>,
}

impl DeadLetterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry.
    pub fn record(&self, entry: DeadLetterEntry) {
        warn!(
            event_type = %entry.event_type,
            error = %entry.error,
            retry_count = entry.retry_count,
            "Message dead-lettered"
        );
        self.entries
            .entry(entry.event_type.clone())
            .or_default()
            .push(entry);
    }

    /// All entries for an event type.
    pub fn events(&self, event_type: &str) -> Vec<DeadLetterEntry> {
        self.entries
            .get(event_type)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Remove a single entry by id; true if it existed.
    pub fn remove(&self, event_type: &str, id: Uuid) -> bool {
        if let Some(mut entries) = self.entries.get_mut(event_type) {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            return entries.len() < before;
        }
        false
    }

    /// Drop every entry for an event type, returning how many were removed.
    pub fn clear(&self, event_type: &str) -> usize {
        self.entries
            .remove(event_type)
            .map(|(_, e)| e.len())
            .unwrap_or(0)
    }

    /// Entry counts per event type.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.len()))
            .collect()
    }

    /// Total entries across all event types.
    pub fn total(&self) -> usize {
        self.entries.iter().map(|e| e.len()).sum()
    }
}

/// Terminal strategy: parks failures for its configured event types in the
/// dead-letter store and always claims them.
pub struct DeadLetterQueueStrategy {
    store: Arc<DeadLetterStore>,
    event_types: HashSet<String>,
}

impl DeadLetterQueueStrategy {
    /// Create a strategy covering the given event types (`"*"` for all).
    pub fn new(
        store: Arc<DeadLetterStore>,
        event_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            store,
            event_types: event_types.into_iter().map(Into::into).collect(),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<DeadLetterStore> {
        &self.store
    }
}

#[async_trait]
impl ErrorStrategy for DeadLetterQueueStrategy {
    fn name(&self) -> &str {
        "dead-letter"
    }

    fn applies_to(&self, event_type: &str) -> bool {
        self.event_types.contains(event_type) || self.event_types.contains("*")
    }

    async fn handle_error(&self, error: &BusError, event_type: &str, ctx: &ErrorContext) -> bool {
        self.store.record(DeadLetterEntry {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload: ctx.payload.clone(),
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            retry_count: ctx.retry_count,
            timestamp: Utc::now(),
        });
        true
    }
}

//! Live-subscriber registry and fan-out.

use crate::connection::{Connection, EventChannel};
use crate::error::{FanoutError, FanoutResult};
use crate::message::EventFrame;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Wildcard filter matching every event type.
pub const WILDCARD: &str = "*";

/// Registry of live client connections with per-connection event filters
/// and user/organization targeting indexes.
///
/// Safe for concurrent publish (reads) and attach/detach (writes). Delivery
/// is independent per connection: one failed send never blocks the rest.
#[derive(Default)]
pub struct SubscriptionRegistry {
    /// All connections by id.
    connections: DashMap<String, Connection>,
    /// Per-connection event-type filter sets.
    subscriptions: DashMap<String, HashSet<String>>,
    /// user id -> connection id (one live connection per user; a reconnect
    /// replaces the entry).
    user_index: DashMap<String, String>,
    /// organization id -> connection ids.
    org_index: DashMap<String, HashSet<String>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with an empty filter set and index it by user
    /// and organization.
    pub fn add_connection(
        &self,
        id: impl Into<String>,
        channel: Arc<dyn EventChannel>,
        user_id: impl Into<String>,
        organization_id: Option<String>,
    ) {
        let id = id.into();
        let user_id = user_id.into();
        info!(
            connection_id = %id,
            user_id = %user_id,
            organization_id = ?organization_id,
            "Connection attached"
        );

        let connection = Connection::new(&id, channel, &user_id, organization_id.clone());
        self.connections.insert(id.clone(), connection);
        self.subscriptions.insert(id.clone(), HashSet::new());
        self.user_index.insert(user_id, id.clone());
        if let Some(org) = organization_id {
            self.org_index.entry(org).or_default().insert(id);
        }
    }

    /// Remove a connection from every index. Empty organization entries are
    /// pruned; no index may keep referencing a dead connection.
    pub fn remove_connection(&self, id: &str) -> bool {
        let Some((_, connection)) = self.connections.remove(id) else {
            return false;
        };
        self.subscriptions.remove(id);
        self.user_index
            .remove_if(&connection.user_id, |_, conn_id| conn_id == id);
        if let Some(org) = &connection.organization_id {
            if let Some(mut members) = self.org_index.get_mut(org) {
                members.remove(id);
            }
            self.org_index.remove_if(org, |_, members| members.is_empty());
        }
        info!(connection_id = %id, "Connection detached");
        true
    }

    /// Add event types to a connection's filter set. `"*"` subscribes to
    /// every event type.
    pub fn subscribe(
        &self,
        id: &str,
        event_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> FanoutResult<()> {
        let mut filters = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| FanoutError::ConnectionNotFound(id.to_string()))?;
        for event_type in event_types {
            filters.insert(event_type.into());
        }
        debug!(connection_id = %id, filters = filters.len(), "Subscriptions updated");
        Ok(())
    }

    /// Remove event types from a connection's filter set.
    pub fn unsubscribe(
        &self,
        id: &str,
        event_types: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> FanoutResult<()> {
        let mut filters = self
            .subscriptions
            .get_mut(id)
            .ok_or_else(|| FanoutError::ConnectionNotFound(id.to_string()))?;
        for event_type in event_types {
            filters.remove(event_type.as_ref());
        }
        Ok(())
    }

    /// Current filter set of a connection.
    pub fn subscriptions(&self, id: &str) -> Option<HashSet<String>> {
        self.subscriptions.get(id).map(|f| f.clone())
    }

    /// Fan an event out to matching live connections.
    ///
    /// Candidates are the target user's connection, the target
    /// organization's connections, or everyone. A candidate receives the
    /// frame when its channel is open and its filter set contains the event
    /// type or `"*"`. Closed or unsubscribed connections are skipped
    /// silently; a failed send is dropped without affecting the others.
    /// Returns the number of connections the frame reached.
    pub fn publish(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        target_user: Option<&str>,
        target_org: Option<&str>,
    ) -> usize {
        let frame = EventFrame::event(event_type, payload.clone());
        let serialized = match frame.to_json() {
            Ok(s) => s,
            Err(e) => {
                error!(event_type, error = %e, "Failed to serialize event frame");
                return 0;
            }
        };

        let candidates: Vec<String> = if let Some(user) = target_user {
            self.user_index
                .get(user)
                .map(|id| vec![id.clone()])
                .unwrap_or_default()
        } else if let Some(org) = target_org {
            self.org_index
                .get(org)
                .map(|members| members.iter().cloned().collect())
                .unwrap_or_default()
        } else {
            self.connections.iter().map(|c| c.key().clone()).collect()
        };

        let mut delivered = 0;
        for id in candidates {
            let Some(connection) = self.connections.get(&id) else {
                continue;
            };
            if !connection.is_open() {
                debug!(connection_id = %id, "Skipping closed connection");
                continue;
            }
            if !self.matches_filter(&id, event_type) {
                continue;
            }
            match connection.send(&serialized) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Dropping frame for unreachable subscriber");
                }
            }
        }

        debug!(event_type, delivered, "Event fanned out");
        delivered
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// The connection currently indexed for a user.
    pub fn connection_for_user(&self, user_id: &str) -> Option<String> {
        self.user_index.get(user_id).map(|id| id.clone())
    }

    /// The connections currently indexed for an organization.
    pub fn connections_for_org(&self, org_id: &str) -> Vec<String> {
        self.org_index
            .get(org_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn matches_filter(&self, id: &str, event_type: &str) -> bool {
        self.subscriptions
            .get(id)
            .map(|filters| filters.contains(event_type) || filters.contains(WILDCARD))
            .unwrap_or(false)
    }
}

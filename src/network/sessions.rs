//! Session Store (C3)
//!
//! Per-connection soft state (§3 Session). Owned by the dispatcher task
//! alongside [`crate::network::registry::ConnectionRegistry`]; no internal
//! locking required (§5).

use std::collections::HashMap;

use chrono::{Duration, Utc};

use crate::models::connection::{ConnectionStatus, Session};

/// The session store.
#[derive(Default)]
pub struct SessionStore {
    by_client_id: HashMap<String, Session>,
}

impl SessionStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reuse) a session for `client_id`. On reconnect, prior
    /// state is preserved and the status flips back to connected (§4.2).
    pub fn register(&mut self, client_id: &str) -> &mut Session {
        self.by_client_id
            .entry(client_id.to_string())
            .and_modify(|s| s.reconnect())
            .or_insert_with(|| Session::new(client_id))
    }

    /// Touch a session's activity timestamp (§4.1: every dispatched
    /// message touches the session's last-activity).
    pub fn touch(&mut self, client_id: &str) {
        if let Some(session) = self.by_client_id.get_mut(client_id) {
            session.last_seen = Utc::now();
        }
    }

    /// Mark a session disconnected (transport-level close without an
    /// explicit teardown message).
    pub fn disconnect(&mut self, client_id: &str) {
        if let Some(session) = self.by_client_id.get_mut(client_id) {
            session.disconnect();
        }
    }

    /// Look up a session.
    pub fn get(&self, client_id: &str) -> Option<&Session> {
        self.by_client_id.get(client_id)
    }

    /// Remove sessions disconnected for longer than `max_age`, per §3:
    /// "Lifetime: from REGISTER until explicit teardown or GC of
    /// disconnected sessions older than the reconnection window."
    pub fn gc_disconnected_older_than(&mut self, max_age: Duration) {
        let now = Utc::now();
        self.by_client_id.retain(|_, session| {
            !(session.status == ConnectionStatus::Disconnected && now - session.last_seen > max_age)
        });
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.by_client_id.len()
    }

    /// True if no sessions are tracked.
    pub fn is_empty(&self) -> bool {
        self.by_client_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_reconnect_preserves_preferences() {
        let mut store = SessionStore::new();
        store.register("client-1").preferences.trust_tolerance = Some(20);
        store.disconnect("client-1");
        let session = store.register("client-1");
        assert_eq!(session.status, ConnectionStatus::Connected);
        assert_eq!(session.preferences.trust_tolerance, Some(20));
    }

    #[test]
    fn gc_removes_only_stale_disconnected_sessions() {
        let mut store = SessionStore::new();
        store.register("client-1");
        store.register("client-2");
        store.disconnect("client-1");
        // Not stale yet (max_age larger than elapsed time).
        store.gc_disconnected_older_than(Duration::seconds(60));
        assert_eq!(store.len(), 2);

        // Force staleness by GC with a zero-width window.
        store.gc_disconnected_older_than(Duration::seconds(-1));
        assert_eq!(store.len(), 1);
        assert!(store.get("client-2").is_some());
    }
}

//! Connection Registry (C2)
//!
//! Tracks live channels by `clientId` and maintains the bidirectional
//! mapping between a connection's client id and a tournament-player id
//! (§4.2, GLOSSARY "Tournament-player-id alias"). Owned exclusively by the
//! dispatcher task (§5), so this is a plain `HashMap`-backed struct with no
//! internal locking.

use std::collections::HashMap;

use crate::models::connection::Connection;
use crate::network::transport::OutboundSender;

/// A registered connection plus its outbound send primitive.
struct Entry {
    connection: Connection,
    outbound: OutboundSender,
}

/// The live connection registry.
#[derive(Default)]
pub struct ConnectionRegistry {
    by_client_id: HashMap<String, Entry>,
    /// tournament-player-id -> client-id, the reverse of
    /// `Connection::tournament_player_id` (§9 Design Notes: "Two identities
    /// per connection").
    player_id_to_client_id: HashMap<String, String>,
}

impl ConnectionRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a connection under `client_id` (§4.2: "If a
    /// prior connection exists for the same client id, it is replaced").
    /// Returns the replaced connection, if any.
    pub fn register(
        &mut self,
        client_id: impl Into<String>,
        connection: Connection,
        outbound: OutboundSender,
    ) -> Option<Connection> {
        let client_id = client_id.into();
        if let Some(alias) = &connection.tournament_player_id {
            self.player_id_to_client_id.insert(alias.clone(), client_id.clone());
        }
        self.by_client_id
            .insert(client_id, Entry { connection, outbound })
            .map(|e| e.connection)
    }

    /// Remove a connection entirely (used on process-level disconnect
    /// cleanup, distinct from the reconnection-grace path which keeps the
    /// match/session alive).
    pub fn remove(&mut self, client_id: &str) -> Option<Connection> {
        let entry = self.by_client_id.remove(client_id)?;
        if let Some(alias) = &entry.connection.tournament_player_id {
            self.player_id_to_client_id.remove(alias);
        }
        Some(entry.connection)
    }

    /// Look up a connection by client id.
    pub fn get(&self, client_id: &str) -> Option<&Connection> {
        self.by_client_id.get(client_id).map(|e| &e.connection)
    }

    /// Look up a connection by client id, mutably.
    pub fn get_mut(&mut self, client_id: &str) -> Option<&mut Connection> {
        self.by_client_id.get_mut(client_id).map(|e| &mut e.connection)
    }

    /// Look up the outbound sender for a client id.
    pub fn outbound(&self, client_id: &str) -> Option<&OutboundSender> {
        self.by_client_id.get(client_id).map(|e| &e.outbound)
    }

    /// Resolve a tournament-player-id alias to its owning client id, if a
    /// connection currently carries that alias (§9: "Implementations must
    /// consult both mappings when resolving decision-maker identity").
    pub fn client_id_for_player_id(&self, player_id: &str) -> Option<&str> {
        self.player_id_to_client_id.get(player_id).map(|s| s.as_str())
    }

    /// Resolve either a client id or a tournament-player-id alias to the
    /// owning client id. Tries the direct client-id mapping first.
    pub fn resolve_client_id(&self, id: &str) -> Option<&str> {
        if self.by_client_id.contains_key(id) {
            return Some(id);
        }
        self.client_id_for_player_id(id)
    }

    /// Number of currently registered connections.
    pub fn len(&self) -> usize {
        self.by_client_id.len()
    }

    /// True if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.by_client_id.is_empty()
    }

    /// Iterate over all registered client ids whose connection's
    /// `disconnected`-carrying match endpoints a caller may want to scan
    /// (used by REGISTER's reconnection sweep, §4.2).
    pub fn client_ids(&self) -> impl Iterator<Item = &str> {
        self.by_client_id.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn fake_outbound() -> OutboundSender {
        let (tx, _rx) = mpsc::channel(1);
        // SAFETY net for tests: OutboundSender's field is private so we
        // construct it through the public `send` contract only; here we
        // rely on the crate-internal visibility since this test lives in
        // the same crate.
        OutboundSender::from_sender(tx)
    }

    #[test]
    fn register_replaces_prior_connection() {
        let mut registry = ConnectionRegistry::new();
        let first = Connection::new("client-1");
        let replaced = registry.register("client-1", first, fake_outbound());
        assert!(replaced.is_none());

        let second = Connection::new("client-1");
        let replaced = registry.register("client-1", second, fake_outbound());
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn player_id_alias_resolves_to_client_id() {
        let mut registry = ConnectionRegistry::new();
        let mut conn = Connection::new("client-1");
        conn.tournament_player_id = Some("tp-1".into());
        registry.register("client-1", conn, fake_outbound());

        assert_eq!(registry.client_id_for_player_id("tp-1"), Some("client-1"));
        assert_eq!(registry.resolve_client_id("tp-1"), Some("client-1"));
        assert_eq!(registry.resolve_client_id("client-1"), Some("client-1"));
    }
}

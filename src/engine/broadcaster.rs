//! Broadcaster (C10)
//!
//! Resolves recipient groups (single client, match pair, lobby, room) and
//! delivers messages through the registry's send primitive, which
//! tolerates closed channels (§5). The Broadcaster holds no state of its
//! own — it reads whatever registry/entity references the dispatcher hands
//! it, matching the Design Notes in spec §9 ("global mutable state... a
//! cleaner decomposition is per-domain stores").

use crate::models::lobby::Lobby;
use crate::models::match_state::Match;
use crate::network::protocol::ServerMessage;
use crate::network::registry::ConnectionRegistry;

/// Stateless message-delivery helper.
pub struct Broadcaster;

impl Broadcaster {
    /// Send to a single client id (or tournament-player-id alias —
    /// resolved through the registry's bidirectional map, §9).
    pub fn send_to(registry: &ConnectionRegistry, recipient: &str, msg: ServerMessage) {
        let Some(client_id) = registry.resolve_client_id(recipient) else {
            return;
        };
        if let Some(outbound) = registry.outbound(client_id) {
            outbound.send(msg);
        }
    }

    /// Send distinct messages to each side of a match.
    pub fn send_to_match_pair(
        registry: &ConnectionRegistry,
        m: &Match,
        to_p1: ServerMessage,
        to_p2: ServerMessage,
    ) {
        Self::send_to(registry, &m.p1.client_id, to_p1);
        Self::send_to(registry, &m.p2.client_id, to_p2);
    }

    /// Send the same message to both sides of a match.
    pub fn broadcast_to_match(registry: &ConnectionRegistry, m: &Match, msg: ServerMessage) {
        Self::send_to(registry, &m.p1.client_id, msg.clone());
        Self::send_to(registry, &m.p2.client_id, msg);
    }

    /// Broadcast to every participant in a lobby.
    pub fn broadcast_to_lobby(registry: &ConnectionRegistry, lobby: &Lobby, msg: ServerMessage) {
        for participant in &lobby.participants {
            Self::send_to(registry, &participant.id, msg.clone());
        }
    }

    /// Broadcast to every participant in a lobby except one (e.g. the
    /// actor whose action triggered the broadcast already got a direct
    /// reply).
    pub fn broadcast_to_lobby_except(
        registry: &ConnectionRegistry,
        lobby: &Lobby,
        except_id: &str,
        msg: ServerMessage,
    ) {
        for participant in &lobby.participants {
            if participant.id != except_id {
                Self::send_to(registry, &participant.id, msg.clone());
            }
        }
    }
}

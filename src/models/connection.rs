//! Connection and session records (§3, C2/C3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transport channel, tracked by the Connection Registry (C2).
///
/// Invariant: at most one live connection per client id; on reconnect the
/// prior entry is replaced (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Connection id (equal to the client id in this implementation — the
    /// registry keys connections by client id, so the two never diverge).
    pub id: String,
    /// Owning client id.
    pub client_id: String,
    /// User id resolved from the session token, if authenticated.
    pub user_id: Option<String>,
    /// True if `sessionToken` was present and successfully validated.
    pub authenticated: bool,
    /// Last time this connection's session activity was touched.
    pub last_activity: DateTime<Utc>,
    /// Tournament-player-id alias declared at REGISTER, if different from
    /// the client id (§4.2, GLOSSARY "Tournament-player-id alias").
    pub tournament_player_id: Option<String>,
}

impl Connection {
    /// Construct a newly-registered connection.
    pub fn new(client_id: impl Into<String>) -> Self {
        let client_id = client_id.into();
        Self {
            id: client_id.clone(),
            client_id,
            user_id: None,
            authenticated: false,
            last_activity: Utc::now(),
            tournament_player_id: None,
        }
    }

    /// Touch the activity timestamp, as done by the dispatcher on every
    /// inbound message (§4.1).
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Connection status as tracked by the Session Store (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connection is live.
    Connected,
    /// Connection dropped; reconnection grace period may apply.
    Disconnected,
}

/// Matchmaking preferences captured on `JOIN_QUEUE` and stored in the
/// owning [`crate::models::queue::QueueEntry`] as well as echoed here for
/// session-level defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPreferences {
    /// Preferred game mode (reserved for future modes; only the payoff
    /// matrix in §6 is implemented today).
    #[serde(default)]
    pub game_mode: Option<String>,
    /// Maximum wait time in seconds before the queue entry expires.
    #[serde(default)]
    pub max_wait_seconds: Option<u64>,
    /// Acceptable trust-score delta from a candidate opponent.
    #[serde(default)]
    pub trust_tolerance: Option<u32>,
}

/// Per-connection soft state (§3 Session).
///
/// Lifetime: from `REGISTER` until explicit teardown or GC of disconnected
/// sessions older than the reconnection window (§5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Client id this session belongs to.
    pub client_id: String,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Last-seen timestamp.
    pub last_seen: DateTime<Utc>,
    /// Matchmaking/game preferences.
    pub preferences: SessionPreferences,
}

impl Session {
    /// Create a fresh, connected session.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            status: ConnectionStatus::Connected,
            last_seen: Utc::now(),
            preferences: SessionPreferences::default(),
        }
    }

    /// Mark the session as reconnected, preserving prior state (§4.2:
    /// "the prior session, if any, keeps its state; connection status
    /// flips back to connected").
    pub fn reconnect(&mut self) {
        self.status = ConnectionStatus::Connected;
        self.last_seen = Utc::now();
    }

    /// Mark the session as disconnected, starting the GC clock.
    pub fn disconnect(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.last_seen = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_flips_status_back_to_connected() {
        let mut s = Session::new("client-1");
        s.disconnect();
        assert_eq!(s.status, ConnectionStatus::Disconnected);
        s.reconnect();
        assert_eq!(s.status, ConnectionStatus::Connected);
    }
}

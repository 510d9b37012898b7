//! Player identity and gameplay metadata (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A player known to the server. Created on first registration; lifetime
/// is the process (no persistence of the in-memory record itself — only
/// terminal match outcomes flow to the external repositories via
/// [`crate::persistence::bridge`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    /// Stable player identifier as supplied by the client.
    pub id: String,
    /// Display name.
    pub name: String,
    /// True if this player is a bot/AI opponent.
    #[serde(default, rename = "isAI")]
    pub is_ai: bool,
    /// Trust score in [0, 100], used for matchmaking compatibility scoring.
    #[serde(default = "default_trust_score")]
    pub trust_score: u32,
    /// Lifetime games-played counter as tracked by this process.
    #[serde(default)]
    pub games_played: u32,
    /// When this player record was first seen.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_trust_score() -> u32 {
    50
}

impl Player {
    /// Construct a fresh player snapshot from a display name, as seen on
    /// `JOIN_QUEUE`/lobby join/private game creation payloads.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_ai: false,
            trust_score: default_trust_score(),
            games_played: 0,
            created_at: Utc::now(),
        }
    }

    /// Guest session tokens are prefixed `guest_` (§4.2) and are excluded
    /// from persistence writes (§4.7).
    pub fn is_guest(id: &str) -> bool {
        id.starts_with("guest_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_prefix_detected() {
        assert!(Player::is_guest("guest_abc123"));
        assert!(!Player::is_guest("user_abc123"));
    }

    #[test]
    fn new_player_has_default_trust_score() {
        let p = Player::new("p1", "Alice");
        assert_eq!(p.trust_score, 50);
        assert_eq!(p.games_played, 0);
    }
}

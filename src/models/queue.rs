//! Matchmaking queue entry (§3, C5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::player::Player;

/// Per-entry matchmaking preferences (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePreferences {
    /// Acceptable trust-score delta from a candidate opponent.
    #[serde(default = "default_trust_tolerance")]
    pub trust_tolerance: u32,
    /// Maximum time to wait before this entry expires.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_trust_tolerance() -> u32 {
    15
}

fn default_max_wait_secs() -> u64 {
    5 * 60
}

impl Default for QueuePreferences {
    fn default() -> Self {
        Self {
            trust_tolerance: default_trust_tolerance(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

/// A player waiting in the open matchmaking queue (§3).
///
/// Lifetime: until matched, expired (`joinedAt` older than `maxWaitTime`,
/// default 5 min), or explicitly withdrawn via `LEAVE_QUEUE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Player id (equal to the owning connection's client id).
    pub player_id: String,
    /// Snapshot of the player's gameplay metadata at queue time.
    pub player: Player,
    /// When this entry joined the queue.
    pub joined_at: DateTime<Utc>,
    /// Matchmaking preferences for this entry.
    pub preferences: QueuePreferences,
}

impl QueueEntry {
    /// Construct a new queue entry joining now.
    pub fn new(player: Player, preferences: QueuePreferences) -> Self {
        Self {
            player_id: player.id.clone(),
            player,
            joined_at: Utc::now(),
            preferences,
        }
    }

    /// True if this entry has outstayed its `maxWaitTime`.
    pub fn is_expired(&self) -> bool {
        let max_wait = chrono::Duration::seconds(self.preferences.max_wait_secs as i64);
        Utc::now() - self.joined_at > max_wait
    }

    /// Seconds this entry has been waiting.
    pub fn wait_seconds(&self) -> i64 {
        (Utc::now() - self.joined_at).num_seconds().max(0)
    }
}

//! Private room (§3, C6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::player::Player;

/// Private room lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateRoomStatus {
    /// Waiting for a guest to arrive.
    Waiting,
    /// Guest arrived; a match was created and this room is retired.
    Matched,
}

/// A 6-character code → pending host/guest pair (§3).
///
/// Destroyed on match creation or timeout (private-room timeout is a
/// supplemental behavior per spec §9's recommendation: 10 minutes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateRoom {
    /// 6-char uppercase alphanumeric code.
    pub code: String,
    /// Client id of the host.
    pub host_client_id: String,
    /// Host's player snapshot.
    pub host_player: Player,
    /// Guest client id and snapshot, once joined.
    pub guest: Option<(String, Player)>,
    /// Current status.
    pub status: PrivateRoomStatus,
    /// When this room was created.
    pub created_at: DateTime<Utc>,
}

impl PrivateRoom {
    /// Create a new waiting room for a host.
    pub fn new(code: impl Into<String>, host_client_id: impl Into<String>, host_player: Player) -> Self {
        Self {
            code: code.into(),
            host_client_id: host_client_id.into(),
            host_player,
            guest: None,
            status: PrivateRoomStatus::Waiting,
            created_at: Utc::now(),
        }
    }

    /// True if this room has outstayed the private-room timeout.
    pub fn is_expired(&self, timeout: chrono::Duration) -> bool {
        Utc::now() - self.created_at > timeout
    }
}

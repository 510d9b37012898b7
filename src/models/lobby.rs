//! Party lobby (§3, C7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tournament format a lobby will run when started (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentFormat {
    /// Single elimination bracket.
    SingleElimination,
    /// Double elimination bracket (winners + losers bracket).
    DoubleElimination,
    /// All-play-all via the circle method.
    RoundRobin,
}

/// Lobby settings (§3). `maxPlayers` ∈ [4,16], `roundCount` ∈ [5,20].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbySettings {
    /// Maximum participants.
    pub max_players: u32,
    /// Rounds per match within the tournament.
    pub round_count: u32,
    /// Tournament format to run on start.
    pub tournament_format: TournamentFormat,
    /// Whether non-participants may observe (not separately modeled by
    /// the core engine; carried through for the transport layer).
    #[serde(default)]
    pub allow_spectators: bool,
    /// Whether lobby chat is enabled.
    #[serde(default = "default_true")]
    pub chat_enabled: bool,
    /// Whether the lobby auto-starts its tournament once full.
    #[serde(default)]
    pub auto_start_when_full: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            max_players: 8,
            round_count: 10,
            tournament_format: TournamentFormat::SingleElimination,
            allow_spectators: true,
            chat_enabled: true,
            auto_start_when_full: false,
        }
    }
}

/// Lobby lifecycle status (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    /// Below the minimum player count to ready up.
    WaitingForPlayers,
    /// At or above the minimum player count; host may start.
    ReadyToStart,
    /// A tournament is running.
    TournamentInProgress,
    /// Lobby was closed by its host.
    Closed,
}

/// A participant's readiness within a lobby (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    /// Has not yet readied up.
    Waiting,
    /// Readied up, waiting for the tournament to start.
    Ready,
    /// Currently playing a bracket match.
    InGame,
    /// Eliminated from the tournament.
    Eliminated,
}

/// A lobby participant, owned by exactly one lobby (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyParticipant {
    /// Participant id (the player's client id / tournament-player id).
    pub id: String,
    /// Display name.
    pub name: String,
    /// True for exactly one participant per lobby (the host).
    pub is_host: bool,
    /// Current readiness state.
    pub readiness: ReadinessState,
}

impl LobbyParticipant {
    /// Construct a new participant, not the host, not yet ready.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_host: false,
            readiness: ReadinessState::Waiting,
        }
    }

    /// Construct the founding host participant, pre-readied.
    pub fn host(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_host: true,
            readiness: ReadinessState::Ready,
        }
    }
}

/// A party lobby (§3, C7).
///
/// Invariants: host always present in participants; host flag set on
/// exactly one participant; `participants.len() <= settings.max_players`;
/// `status == ReadyToStart` iff `count >= 4 && status !=
/// TournamentInProgress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    /// 6-char code, unique across live lobbies.
    pub code: String,
    /// Client id of the current host.
    pub host_client_id: String,
    /// Ordered list of participants (order is host-transfer-relevant: on
    /// host departure, the *next* participant in list order becomes host).
    pub participants: Vec<LobbyParticipant>,
    /// Lobby settings.
    pub settings: LobbySettings,
    /// Current status.
    pub status: LobbyStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-updated timestamp.
    pub updated_at: DateTime<Utc>,
    /// Tournament id, once `START_TOURNAMENT` has been processed.
    pub tournament_id: Option<String>,
}

impl Lobby {
    /// Create a new lobby with the founding host as its sole participant.
    pub fn new(
        code: impl Into<String>,
        host_client_id: impl Into<String>,
        host_name: impl Into<String>,
        settings: LobbySettings,
    ) -> Self {
        let host_client_id = host_client_id.into();
        let now = Utc::now();
        Self {
            code: code.into(),
            participants: vec![LobbyParticipant::host(host_client_id.clone(), host_name)],
            host_client_id,
            settings,
            status: LobbyStatus::WaitingForPlayers,
            created_at: now,
            updated_at: now,
            tournament_id: None,
        }
    }

    /// Current participant count.
    pub fn player_count(&self) -> u32 {
        self.participants.len() as u32
    }

    /// Recompute `status` from membership count, per the invariant in §3.
    /// Does not touch `TournamentInProgress`/`Closed`, which are only set
    /// by explicit transitions (start/close), not by membership changes.
    pub fn recompute_status(&mut self, min_players_to_ready: u32) {
        if matches!(self.status, LobbyStatus::TournamentInProgress | LobbyStatus::Closed) {
            return;
        }
        self.status = if self.player_count() >= min_players_to_ready {
            LobbyStatus::ReadyToStart
        } else {
            LobbyStatus::WaitingForPlayers
        };
        self.updated_at = Utc::now();
    }

    /// Find the host participant's index.
    pub fn host_index(&self) -> Option<usize> {
        self.participants.iter().position(|p| p.is_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lobby_has_single_host_participant() {
        let lobby = Lobby::new("ABC123", "client-1", "Host", LobbySettings::default());
        assert_eq!(lobby.participants.len(), 1);
        assert!(lobby.participants[0].is_host);
        assert_eq!(lobby.status, LobbyStatus::WaitingForPlayers);
    }

    #[test]
    fn status_flips_to_ready_at_threshold() {
        let mut lobby = Lobby::new("ABC123", "client-1", "Host", LobbySettings::default());
        for i in 1..4 {
            lobby.participants.push(LobbyParticipant::new(format!("client-{i}"), "P"));
        }
        lobby.recompute_status(4);
        assert_eq!(lobby.status, LobbyStatus::ReadyToStart);
    }
}

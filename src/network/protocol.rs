//! Protocol Messages (§6)
//!
//! Wire format for client-server communication over the transport channel.
//! Every message is a JSON object with a `type` discriminator in
//! `SCREAMING_SNAKE_CASE`; payload schemas are defined per-variant here,
//! following the teacher's tagged-enum style (`ClientMessage`/
//! `ServerMessage`), with this spec's wire casing and message set.
//!
//! Unknown fields in inbound payloads are ignored (serde's default
//! behavior for struct fields not marked `deny_unknown_fields`, which we
//! never set, per the Design Notes in spec §9: "parsing defensively;
//! unknown fields are ignored").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::lobby::{LobbyStatus, TournamentFormat};
use crate::models::match_state::Decision;
use crate::models::player::Player;
use crate::models::tournament::Tournament;

/// Negotiated protocol version, bumped whenever the message catalogue
/// changes shape. Ambient diagnostic surface (SPEC_FULL §6), not part of
/// the wire-stable gameplay catalogue itself.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// INBOUND (client -> server)
// =============================================================================

/// Messages sent from client to server (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Register (or re-register) this connection.
    Register {
        /// Opaque session token. `guest_`-prefixed tokens skip auth
        /// lookup (§4.2).
        #[serde(default)]
        session_token: Option<String>,
        /// Optional stable tournament-player-id alias (§4.2, GLOSSARY).
        #[serde(default)]
        player_id: Option<String>,
    },
    /// Join the open matchmaking queue.
    JoinQueue {
        /// Player snapshot to queue.
        player: Player,
        /// Optional matchmaking preferences.
        #[serde(default)]
        preferences: Option<QueuePreferencesWire>,
    },
    /// Leave the matchmaking queue.
    LeaveQueue,
    /// Create a private room with a host-chosen code.
    CreatePrivateGame {
        /// Desired 6-char room code.
        game_code: String,
        /// Host player snapshot.
        player: Player,
    },
    /// Join an existing private room.
    JoinPrivateGame {
        /// Room code to join.
        game_code: String,
        /// Guest player snapshot.
        player: Player,
    },
    /// Create a party lobby.
    CreatePartyLobby {
        /// Host player snapshot, if supplied in full.
        #[serde(default)]
        player: Option<Player>,
        /// Host display name, if only a name was supplied.
        #[serde(default)]
        host_player_name: Option<String>,
        /// Initial lobby settings.
        settings: LobbySettingsWire,
    },
    /// Join an existing party lobby.
    JoinPartyLobby {
        /// Lobby code.
        lobby_code: String,
        /// Joining player snapshot, if supplied in full.
        #[serde(default)]
        player: Option<Player>,
        /// Joining player's display name, if only a name was supplied.
        #[serde(default)]
        player_name: Option<String>,
    },
    /// Leave a party lobby.
    LeavePartyLobby {
        /// Lobby code.
        lobby_code: String,
    },
    /// Update lobby settings (host-only).
    UpdateLobbySettings {
        /// Lobby id/code being updated.
        lobby_id: String,
        /// Partial settings to merge.
        settings: LobbySettingsWire,
    },
    /// Kick a participant from the caller's lobby (host-only).
    KickPlayer {
        /// Id of the participant to remove.
        target_player_id: String,
    },
    /// Close the caller's lobby (host-only).
    CloseLobby,
    /// Start the tournament for a lobby (host-only).
    StartTournament {
        /// Lobby id/code to start.
        lobby_id: String,
    },
    /// Submit a round decision.
    GameDecision {
        /// Match id.
        match_id: String,
        /// Round index this decision is for.
        round: u32,
        /// The decision.
        decision: Decision,
    },
    /// Chat message scoped to a match.
    GameMessage {
        /// Match id.
        match_id: String,
        /// Message body.
        message: String,
        /// Client-supplied timestamp (informational only).
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Voluntarily forfeit the caller's current match.
    ForfeitMatch,
    /// Voluntarily forfeit a tournament match specifically.
    TournamentForfeit {
        /// Match id.
        match_id: String,
    },
    /// Accept/decline the post-match decision-reversal protocol.
    DecisionReversalResponse {
        /// Match id.
        match_id: String,
        /// True to accept, false to decline.
        accept: bool,
    },
    /// During `REVERSAL_SELECTION`, request a historical decision change.
    DecisionChangeRequest {
        /// Match id.
        match_id: String,
        /// Round number being amended.
        round_number: u32,
        /// The new decision for that round.
        new_decision: Decision,
    },
    /// Signal that the caller is done mutating decisions during reversal.
    DecisionChangesComplete {
        /// Match id.
        match_id: String,
    },
    /// Lobby chat message.
    LobbyChat {
        /// Lobby code.
        lobby_code: String,
        /// Message body.
        message: String,
    },
    /// Latency probe.
    Ping,
    /// Response to a server-initiated latency probe.
    Pong,
}

/// Wire shape for [`crate::models::queue::QueuePreferences`]; all fields
/// optional so clients may omit preferences entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePreferencesWire {
    /// Acceptable trust-score delta.
    #[serde(default)]
    pub trust_tolerance: Option<u32>,
    /// Maximum wait in seconds.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

/// Wire shape for [`crate::models::lobby::LobbySettings`]; all fields
/// optional so `UPDATE_LOBBY_SETTINGS` can merge a partial patch (§4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySettingsWire {
    /// Maximum participants, [4,16].
    #[serde(default)]
    pub max_players: Option<u32>,
    /// Rounds per match, [5,20].
    #[serde(default)]
    pub round_count: Option<u32>,
    /// Tournament format.
    #[serde(default)]
    pub tournament_format: Option<TournamentFormat>,
    /// Whether spectators are allowed.
    #[serde(default)]
    pub allow_spectators: Option<bool>,
    /// Whether chat is enabled.
    #[serde(default)]
    pub chat_enabled: Option<bool>,
    /// Whether the tournament auto-starts when the lobby fills.
    #[serde(default)]
    pub auto_start_when_full: Option<bool>,
}

// =============================================================================
// OUTBOUND (server -> client)
// =============================================================================

/// Wire error taxonomy (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Message requires a prior `REGISTER`.
    NotRegistered,
    /// Missing or malformed required fields.
    InvalidRequest,
    /// No lobby with that code/id exists.
    LobbyNotFound,
    /// Lobby is at capacity.
    LobbyFull,
    /// Action rejected because a tournament is running.
    TournamentInProgress,
    /// Caller is not the lobby host.
    NotHost,
    /// Lobby chat is disabled.
    ChatDisabled,
    /// Chat message too long.
    MessageTooLong,
    /// Chat message empty.
    MessageEmpty,
    /// Matchmaking entry expired.
    QueueTimeout,
    /// Caller is not queued.
    NotInQueue,
    /// No such match.
    MatchNotFound,
    /// Wrong match phase for this message.
    WrongPhase,
    /// Decision already recorded for this round.
    AlreadyDecided,
    /// Unsupported tournament format.
    FormatUnsupported,
    /// Invalid player count for this format.
    InvalidTournamentSize,
    /// Not enough players to start.
    InsufficientPlayers,
    /// Already in a lobby; cannot join the open queue.
    QueueConflict,
    /// Reconnection window elapsed / no match found.
    ReconnectionFailed,
    /// Programming error; owning entity was torn down.
    Internal,
}

/// Outbound error frame (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    /// Short wire code.
    pub code: ErrorCode,
    /// Human-readable, localisable message.
    pub message: String,
}

/// Opponent snapshot sent on match/queue events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpponentInfo {
    /// Opponent's id.
    pub id: String,
    /// Opponent's display name.
    pub name: String,
    /// Opponent's trust score.
    pub trust_score: u32,
}

impl OpponentInfo {
    /// Build an opponent snapshot from a player record.
    pub fn from_player(player: &Player) -> Self {
        Self {
            id: player.id.clone(),
            name: player.name.clone(),
            trust_score: player.trust_score,
        }
    }
}

/// Per-round result as seen by one side (own decision/points plus the
/// opponent's, and cumulative totals) — §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResultView {
    /// Round index.
    pub round: u32,
    /// This side's decision.
    pub your_decision: Decision,
    /// Opponent's decision.
    pub opponent_decision: Decision,
    /// This side's points earned this round.
    pub your_points: u32,
    /// Opponent's points earned this round.
    pub opponent_points: u32,
    /// This side's cumulative score.
    pub your_total: u32,
    /// Opponent's cumulative score.
    pub opponent_total: u32,
}

/// Tentative/final scoreboard (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalScores {
    /// Player 1's score.
    pub p1: u32,
    /// Player 2's score.
    pub p2: u32,
}

/// Messages sent from server to client (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges a successful `REGISTER`.
    Registered {
        /// Resolved client id.
        client_id: String,
        /// True if the session token was authenticated.
        authenticated: bool,
        /// Resolved user id, if authenticated.
        user_id: Option<String>,
    },
    /// A recoverable error.
    Error(ErrorFrame),
    /// Current matchmaking queue status for the caller.
    QueueStatus {
        /// Seconds waited so far.
        waited_seconds: i64,
        /// Queue depth at last sweep.
        queue_size: usize,
    },
    /// Pair-up found.
    MatchFound {
        /// New match id.
        match_id: String,
        /// Opponent snapshot.
        opponent: OpponentInfo,
        /// True if the receiver is player 1.
        is_player1: bool,
    },
    /// A new round has begun.
    NewRound {
        /// Round index.
        round: u32,
        /// Decision timer duration, in seconds.
        timer_duration: u64,
    },
    /// Both decisions for the round are in.
    RoundResult(RoundResultView),
    /// Terminal round scored.
    GameOver {
        /// Winner id, `"tie"`, or a player id.
        winner: String,
        /// Tentative final scores (pre-reversal).
        final_scores: FinalScores,
        /// Total rounds played.
        total_rounds: u32,
    },
    /// Per-perspective final statistics.
    ShowStatistics {
        /// This side's final score.
        your_score: u32,
        /// Opponent's final score.
        opponent_score: u32,
        /// Winner id or `"tie"`.
        winner: String,
        /// True if this resulted from a forfeit.
        forfeit: bool,
        /// True if delivered immediately (forfeit) rather than after the
        /// normal reversal window.
        immediate: bool,
    },
    /// Both sides accepted the reversal protocol.
    ReversalApproved,
    /// Reversal was declined or timed out.
    ReversalRejected,
    /// Sent to a side that has responded while the other has not.
    WaitingForOtherPlayer,
    /// Recomputed scores after decision changes during reversal selection.
    FinalScoresUpdate {
        /// New final scores.
        final_scores: FinalScores,
    },
    /// Acknowledges a voluntary forfeit from the forfeiter's side.
    ForfeitConfirmed,
    /// The opponent in a regular match disconnected.
    OpponentDisconnected,
    /// The opponent in a tournament match disconnected.
    TournamentOpponentDisconnected,
    /// Sent to a reconnecting player whose tournament match is still live.
    TournamentMatchReconnected {
        /// Opponent snapshot.
        opponent: OpponentInfo,
        /// Current round index.
        current_round: u32,
        /// Scores at reconnection time.
        scores: FinalScores,
        /// Match state name, for client phase recovery.
        game_state: String,
    },
    /// Sent to the non-disconnected side once their opponent reconnects.
    TournamentOpponentReconnected,
    /// A tournament has begun (emitted before per-match ready messages).
    TournamentStarted {
        /// The tournament object.
        tournament: Tournament,
    },
    /// A bracket match is ready to begin.
    TournamentMatchReady {
        /// New match id.
        match_id: String,
        /// Opponent snapshot.
        opponent: OpponentInfo,
    },
    /// A new tournament round has started.
    TournamentRoundStarted {
        /// 1-based round number.
        round: u32,
    },
    /// A bracket match completed.
    TournamentMatchCompleted {
        /// Match id.
        match_id: String,
        /// Winner id, or `None` for a non-elimination tie.
        winner_id: Option<String>,
        /// Final scores by player id.
        scores: BTreeMap<String, u32>,
    },
    /// The tournament has concluded.
    TournamentCompleted {
        /// Full tournament object.
        tournament: Tournament,
        /// Winner's player id.
        winner_id: String,
        /// Sorted standings (round-robin).
        standings: Vec<String>,
    },
    /// A lobby was created for the caller.
    LobbyCreated {
        /// The lobby's code.
        lobby_code: String,
    },
    /// The caller successfully joined a lobby.
    LobbyJoined {
        /// The lobby's code.
        lobby_code: String,
    },
    /// Lobby membership or settings changed.
    LobbyUpdated {
        /// Lobby code.
        lobby_code: String,
        /// Current status.
        status: LobbyStatus,
        /// Current participant count.
        player_count: u32,
    },
    /// The lobby was closed by its host.
    LobbyClosed {
        /// Lobby code.
        lobby_code: String,
    },
    /// The caller was kicked from a lobby.
    KickedFromLobby {
        /// Lobby code.
        lobby_code: String,
    },
    /// A lobby/match chat message being relayed.
    ChatMessage {
        /// Sender id, or `"system"` for server-originated messages.
        sender_id: String,
        /// Message body.
        message: String,
        /// Server timestamp.
        timestamp: DateTime<Utc>,
    },
    /// Response to a latency probe.
    Pong,
}

impl ServerMessage {
    /// Serialize to a JSON frame, as sent over the transport (§6).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&crate::error::RequestError> for ErrorFrame {
    /// Translate a recoverable request failure into its wire shape (§7).
    fn from(err: &crate::error::RequestError) -> Self {
        use crate::error::RequestError as E;
        let code = match err {
            E::NotRegistered => ErrorCode::NotRegistered,
            E::InvalidRequest(_) => ErrorCode::InvalidRequest,
            E::LobbyNotFound => ErrorCode::LobbyNotFound,
            E::LobbyFull => ErrorCode::LobbyFull,
            E::TournamentInProgress => ErrorCode::TournamentInProgress,
            E::NotHost => ErrorCode::NotHost,
            E::ChatDisabled => ErrorCode::ChatDisabled,
            E::MessageTooLong => ErrorCode::MessageTooLong,
            E::MessageEmpty => ErrorCode::MessageEmpty,
            E::QueueTimeout => ErrorCode::QueueTimeout,
            E::NotInQueue => ErrorCode::NotInQueue,
            E::MatchNotFound => ErrorCode::MatchNotFound,
            E::WrongPhase => ErrorCode::WrongPhase,
            E::AlreadyDecided => ErrorCode::AlreadyDecided,
            E::FormatUnsupported => ErrorCode::FormatUnsupported,
            E::InvalidTournamentSize => ErrorCode::InvalidTournamentSize,
            E::InsufficientPlayers => ErrorCode::InsufficientPlayers,
            E::QueueConflict => ErrorCode::QueueConflict,
            E::ReconnectionFailed => ErrorCode::ReconnectionFailed,
            E::Internal(_) => ErrorCode::Internal,
        };
        ErrorFrame { code, message: err.user_message() }
    }
}

impl ClientMessage {
    /// Parse an inbound JSON frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips_through_json() {
        let msg = ClientMessage::Register {
            session_token: Some("guest_abc".into()),
            player_id: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"REGISTER\""));
        let parsed: ClientMessage = ClientMessage::from_json(&json).unwrap();
        match parsed {
            ClientMessage::Register { session_token, .. } => {
                assert_eq!(session_token.as_deref(), Some("guest_abc"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let json = r#"{"type":"LEAVE_QUEUE","unexpected":123}"#;
        let parsed = ClientMessage::from_json(json).unwrap();
        assert!(matches!(parsed, ClientMessage::LeaveQueue));
    }

    #[test]
    fn game_decision_parses_decision_enum() {
        let json = r#"{"type":"GAME_DECISION","matchId":"m1","round":0,"decision":"BETRAY"}"#;
        let parsed = ClientMessage::from_json(json).unwrap();
        match parsed {
            ClientMessage::GameDecision { decision, round, .. } => {
                assert_eq!(decision, Decision::Betray);
                assert_eq!(round, 0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn server_error_serializes_with_code_and_message() {
        let msg = ServerMessage::Error(ErrorFrame {
            code: ErrorCode::LobbyFull,
            message: "Lobby is full".into(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("LOBBY_FULL"));
    }
}

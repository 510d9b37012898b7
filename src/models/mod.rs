//! Data model (§3).
//!
//! Plain, serde-serializable structs. Cyclic/back-pointed entities (Match
//! ↔ TournamentMatch bracket slot, Lobby ↔ Tournament) are linked by id
//! rather than by direct reference, per the Design Notes in spec §9 — each
//! engine keeps its own id-keyed map and mutates the pointed-to entity via
//! that map rather than through a shared pointer.

pub mod connection;
pub mod lobby;
pub mod match_state;
pub mod player;
pub mod private_room;
pub mod queue;
pub mod tournament;

pub use connection::{Connection, ConnectionStatus, Session, SessionPreferences};
pub use lobby::{Lobby, LobbyParticipant, LobbySettings, LobbyStatus, ReadinessState, TournamentFormat};
pub use match_state::{
    Decision, Match, MatchEndpoint, MatchState, MatchTimerKind, ReversalResponses, RoundDecisions,
};
pub use player::Player;
pub use private_room::{PrivateRoom, PrivateRoomStatus};
pub use queue::{QueueEntry, QueuePreferences};
pub use tournament::{
    Bracket, BracketMatch, BracketMatchStatus, BracketResult, BracketRound, PlayerTournamentStats,
    Tournament, TournamentStatus,
};

//! Game engines (C5–C10).
//!
//! Each engine owns one core registry (queue, private rooms, lobbies,
//! matches, tournaments) and exposes pure state-transition methods; the
//! dispatcher (C4) is the only caller and is responsible for turning
//! returned outcomes into outbound messages and armed/cancelled timers.

pub mod broadcaster;
pub mod lobby_manager;
pub mod match_engine;
pub mod matchmaking;
pub mod private_rooms;
pub mod tournament_engine;

pub use broadcaster::Broadcaster;
pub use lobby_manager::{LobbyManager, PartialLobbySettings};
pub use match_engine::{
    AdvanceOutcome, CompleteOutcome, ForfeitSettlement, MatchEngine, ReversalOutcome, RoundOutcome, Side,
};
pub use matchmaking::{MatchmakingQueue, Pairing};
pub use private_rooms::PrivateRoomRegistry;
pub use tournament_engine::{MatchResultInput, RoundAdvance, TournamentEngine};

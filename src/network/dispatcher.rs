//! Message Dispatcher (C4, §4, §5).
//!
//! A single task owns every in-memory registry and engine: connections,
//! sessions, the matchmaking queue, private rooms, party lobbies, live
//! matches and tournaments. Nothing here is behind a lock — callers reach
//! the dispatcher only by sending a [`DispatcherEvent`] down its inbound
//! channel, the same shape [`crate::network::transport::TransportServer`]
//! already produces for socket-level events. Delayed work (round timeouts,
//! reversal windows, reconnect grace, tournament round pacing) is modeled
//! as a detached `tokio::spawn` + `sleep` that posts a timer-fired event
//! back into this same channel; the `generation`/`reconnect_epoch` counters
//! on [`crate::models::match_state::Match`] let a stale firing recognize
//! itself and do nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::engine::{
    AdvanceOutcome, Broadcaster, CompleteOutcome, LobbyManager, MatchEngine, MatchResultInput,
    MatchmakingQueue, PartialLobbySettings, PrivateRoomRegistry, ReversalOutcome, RoundAdvance,
    RoundOutcome, Side, TournamentEngine,
};
use crate::error::RequestError;
use crate::models::connection::Connection;
use crate::models::lobby::{LobbySettings, TournamentFormat};
use crate::models::match_state::{Decision, Match, MatchEndpoint, MatchState, MatchTimerKind};
use crate::models::player::Player;
use crate::models::queue::QueuePreferences;
use crate::network::auth::validate_token;
use crate::network::protocol::{
    ClientMessage, FinalScores, LobbySettingsWire, OpponentInfo, QueuePreferencesWire,
    RoundResultView, ServerMessage,
};
use crate::network::registry::ConnectionRegistry;
use crate::network::sessions::SessionStore;
use crate::network::transport::OutboundSender;
use crate::persistence::{PersistenceBridge, TerminalMatch};

/// Everything that can wake the dispatcher up: socket-level events from
/// the transport layer, plus internally-generated timer firings. The
/// first four variants are produced exclusively by
/// [`crate::network::transport::TransportServer`]; the rest are posted by
/// the dispatcher to itself.
pub enum DispatcherEvent {
    /// A new socket accepted; not yet associated with a client id.
    Connected {
        provisional_id: String,
        outbound: OutboundSender,
    },
    /// A parsed client frame.
    Message {
        provisional_id: String,
        msg: ClientMessage,
    },
    /// A frame that failed to parse as a [`ClientMessage`].
    MalformedFrame { provisional_id: String },
    /// The socket closed or errored.
    Disconnected { provisional_id: String },
    /// Fires `match_found_to_first_round`/`tournament_started_ordering_delay`
    /// after MATCH_FOUND, sending the opening NEW_ROUND.
    BeginRound { match_id: String },
    /// A round-decision or results-display timer fired for `match_id` at
    /// `generation`. Stale if the match has since moved past `generation`.
    MatchTimer {
        match_id: String,
        kind: MatchTimerKind,
        generation: u64,
    },
    /// A disconnected side's reconnect grace window elapsed. Stale if the
    /// side has since reconnected past `epoch`.
    ReconnectGrace {
        match_id: String,
        side: Side,
        epoch: u64,
    },
    /// Time to announce the next tournament round and spawn its matches.
    TournamentRoundDispatch { tournament_id: String },
    /// Post-match retention window elapsed; drop the match record.
    PurgeMatch { match_id: String },
}

/// Owns every core registry and drives the server's single event loop.
pub struct Dispatcher {
    config: ServerConfig,
    inbound: mpsc::Receiver<DispatcherEvent>,
    self_tx: mpsc::Sender<DispatcherEvent>,
    pending: HashMap<String, OutboundSender>,
    client_by_provisional: HashMap<String, String>,
    registry: ConnectionRegistry,
    sessions: SessionStore,
    matchmaking: MatchmakingQueue,
    private_rooms: PrivateRoomRegistry,
    lobbies: LobbyManager,
    matches: MatchEngine,
    tournaments: TournamentEngine,
    persistence: Arc<PersistenceBridge>,
}

impl Dispatcher {
    /// Build a dispatcher and the sender transport should use to feed it
    /// events.
    pub fn new(config: ServerConfig, persistence: Arc<PersistenceBridge>) -> (Self, mpsc::Sender<DispatcherEvent>) {
        let (tx, rx) = mpsc::channel(1024);
        let dispatcher = Self {
            config,
            inbound: rx,
            self_tx: tx.clone(),
            pending: HashMap::new(),
            client_by_provisional: HashMap::new(),
            registry: ConnectionRegistry::new(),
            sessions: SessionStore::new(),
            matchmaking: MatchmakingQueue::new(),
            private_rooms: PrivateRoomRegistry::new(),
            lobbies: LobbyManager::new(),
            matches: MatchEngine::new(),
            tournaments: TournamentEngine::new(),
            persistence,
        };
        (dispatcher, tx)
    }

    /// Run the event loop until the inbound channel closes (i.e. the
    /// transport server has shut down).
    pub async fn run(mut self) {
        info!("dispatcher started");
        let mut matchmaking_sweep = time::interval(self.config.timers.matchmaking_sweep);
        let mut private_room_sweep = time::interval(Duration::from_secs(60));
        let mut session_sweep = time::interval(Duration::from_secs(30));
        let mut persistence_sweep = time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                event = self.inbound.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = matchmaking_sweep.tick() => self.sweep_matchmaking().await,
                _ = private_room_sweep.tick() => self.sweep_private_rooms(),
                _ = session_sweep.tick() => self.sweep_sessions(),
                _ = persistence_sweep.tick() => self.persistence.drain_offline_queue().await,
            }
        }
        info!("dispatcher inbound channel closed; shutting down");
    }

    async fn handle_event(&mut self, event: DispatcherEvent) {
        match event {
            DispatcherEvent::Connected { provisional_id, outbound } => {
                self.pending.insert(provisional_id, outbound);
            }
            DispatcherEvent::Message { provisional_id, msg } => self.handle_message(provisional_id, msg).await,
            DispatcherEvent::MalformedFrame { provisional_id } => {
                self.send_to_provisional(
                    &provisional_id,
                    ServerMessage::Error((&RequestError::InvalidRequest("malformed frame".into())).into()),
                );
            }
            DispatcherEvent::Disconnected { provisional_id } => self.handle_disconnect(&provisional_id),
            DispatcherEvent::BeginRound { match_id } => self.send_new_round(&match_id),
            DispatcherEvent::MatchTimer { match_id, kind, generation } => {
                self.handle_match_timer(match_id, kind, generation).await
            }
            DispatcherEvent::ReconnectGrace { match_id, side, epoch } => {
                self.handle_reconnect_grace(match_id, side, epoch).await
            }
            DispatcherEvent::TournamentRoundDispatch { tournament_id } => self.dispatch_tournament_round(&tournament_id),
            DispatcherEvent::PurgeMatch { match_id } => {
                self.matches.remove(&match_id);
            }
        }
    }

    // ---- connection lifecycle -----------------------------------------

    fn send_to_provisional(&self, provisional_id: &str, msg: ServerMessage) {
        if let Some(client_id) = self.client_by_provisional.get(provisional_id) {
            Broadcaster::send_to(&self.registry, client_id, msg);
        } else if let Some(outbound) = self.pending.get(provisional_id) {
            outbound.send(msg);
        }
    }

    fn handle_register(&mut self, provisional_id: String, session_token: Option<String>, player_id: Option<String>) {
        let resolved = match &session_token {
            Some(token) if Player::is_guest(token) => Some((token.clone(), false, None)),
            Some(token) => match validate_token(token, &self.config.auth) {
                Ok(claims) => {
                    let uid = claims.user_id();
                    Some((uid.clone(), true, Some(uid)))
                }
                Err(err) => {
                    warn!(%provisional_id, error = %err, "rejecting REGISTER: invalid session token");
                    None
                }
            },
            None => Some((format!("guest_{}", Uuid::new_v4()), false, None)),
        };

        let Some((client_id, authenticated, user_id)) = resolved else {
            self.send_to_provisional(
                &provisional_id,
                ServerMessage::Error((&RequestError::InvalidRequest("invalid session token".into())).into()),
            );
            return;
        };

        let Some(outbound) = self.pending.remove(&provisional_id) else {
            warn!(%provisional_id, "REGISTER for unknown or already-registered connection");
            return;
        };

        let mut connection = Connection::new(client_id.clone());
        connection.authenticated = authenticated;
        connection.user_id = user_id.clone();
        connection.tournament_player_id = player_id.clone();

        self.registry.register(client_id.clone(), connection, outbound);
        self.sessions.register(&client_id);
        self.client_by_provisional.insert(provisional_id, client_id.clone());

        Broadcaster::send_to(
            &self.registry,
            &client_id,
            ServerMessage::Registered {
                client_id: client_id.clone(),
                authenticated,
                user_id,
            },
        );

        self.try_reconnect(&client_id, player_id.as_deref());
    }

    /// Reconnection sweep run after every successful REGISTER (§4.2):
    /// look for a live match with a disconnected side matching either the
    /// new client id or the supplied tournament-player alias, and rebind
    /// it to this connection.
    fn try_reconnect(&mut self, client_id: &str, player_id: Option<&str>) {
        let Some((match_id, side)) = self.matches.find_disconnected_side(player_id, client_id) else {
            return;
        };
        self.matches.rebind_client_id(&match_id, side, client_id);
        let Some(m) = self.matches.get(&match_id) else { return };
        if !m.is_tournament_match() {
            return;
        }

        let (opponent, other_client_id) = match side {
            Side::P1 => (OpponentInfo::from_player(&m.p2.player), m.p2.client_id.clone()),
            Side::P2 => (OpponentInfo::from_player(&m.p1.player), m.p1.client_id.clone()),
        };
        let scores = FinalScores { p1: m.p1_score, p2: m.p2_score };
        let current_round = m.current_round;
        let game_state = Self::match_state_wire(m.state);

        Broadcaster::send_to(
            &self.registry,
            client_id,
            ServerMessage::TournamentMatchReconnected {
                opponent,
                current_round,
                scores,
                game_state,
            },
        );
        Broadcaster::send_to(&self.registry, &other_client_id, ServerMessage::TournamentOpponentReconnected);
    }

    fn handle_disconnect(&mut self, provisional_id: &str) {
        self.pending.remove(provisional_id);
        let Some(client_id) = self.client_by_provisional.remove(provisional_id) else {
            return;
        };
        self.sessions.disconnect(&client_id);
        self.registry.remove(&client_id);
        self.matchmaking.leave(&client_id);

        let Some(match_id) = self.matches.find_active_match_for_client(&client_id) else {
            return;
        };
        let Some(side) = self.matches.side_of(&match_id, &client_id) else { return };
        let Some(epoch) = self.matches.mark_disconnected(&match_id, side) else { return };
        let Some(m) = self.matches.get(&match_id) else { return };

        let is_tournament = m.is_tournament_match();
        let opponent_client = match side {
            Side::P1 => m.p2.client_id.clone(),
            Side::P2 => m.p1.client_id.clone(),
        };
        let msg = if is_tournament {
            ServerMessage::TournamentOpponentDisconnected
        } else {
            ServerMessage::OpponentDisconnected
        };
        Broadcaster::send_to(&self.registry, &opponent_client, msg);

        let grace = if is_tournament {
            self.config.timers.tournament_reconnect_grace
        } else {
            self.config.timers.reconnect_grace
        };
        self.spawn_reconnect_grace(match_id, side, epoch, grace);
    }

    async fn handle_reconnect_grace(&mut self, match_id: String, side: Side, epoch: u64) {
        if self.matches.reconnect_epoch_of(&match_id, side) != Some(epoch) {
            return;
        }
        let Some(client_id) = self.matches.get(&match_id).map(|m| match side {
            Side::P1 => m.p1.client_id.clone(),
            Side::P2 => m.p2.client_id.clone(),
        }) else {
            return;
        };
        let _ = self.apply_forfeit(&match_id, &client_id).await;
    }

    // ---- message dispatch ----------------------------------------------

    async fn handle_message(&mut self, provisional_id: String, msg: ClientMessage) {
        if let ClientMessage::Register { session_token, player_id } = msg {
            self.handle_register(provisional_id, session_token, player_id);
            return;
        }

        let Some(client_id) = self.client_by_provisional.get(&provisional_id).cloned() else {
            self.send_to_provisional(&provisional_id, ServerMessage::Error((&RequestError::NotRegistered).into()));
            return;
        };
        self.sessions.touch(&client_id);
        if let Some(conn) = self.registry.get_mut(&client_id) {
            conn.touch();
        }

        let result = match msg {
            ClientMessage::Register { .. } => unreachable!("handled above"),
            ClientMessage::JoinQueue { player, preferences } => self.handle_join_queue(&client_id, player, preferences).await,
            ClientMessage::LeaveQueue => self.handle_leave_queue(&client_id).await,
            ClientMessage::CreatePrivateGame { game_code, player } => {
                self.handle_create_private_game(&client_id, game_code, player).await
            }
            ClientMessage::JoinPrivateGame { game_code, player } => {
                self.handle_join_private_game(&client_id, game_code, player).await
            }
            ClientMessage::CreatePartyLobby { player, host_player_name, settings } => {
                self.handle_create_party_lobby(&client_id, player, host_player_name, settings).await
            }
            ClientMessage::JoinPartyLobby { lobby_code, player, player_name } => {
                self.handle_join_party_lobby(&client_id, lobby_code, player, player_name).await
            }
            ClientMessage::LeavePartyLobby { lobby_code } => self.handle_leave_party_lobby(&client_id, lobby_code).await,
            ClientMessage::UpdateLobbySettings { lobby_id, settings } => {
                self.handle_update_lobby_settings(&client_id, lobby_id, settings).await
            }
            ClientMessage::KickPlayer { target_player_id } => self.handle_kick_player(&client_id, target_player_id).await,
            ClientMessage::CloseLobby => self.handle_close_lobby(&client_id).await,
            ClientMessage::StartTournament { lobby_id } => self.handle_start_tournament(&client_id, lobby_id).await,
            ClientMessage::GameDecision { match_id, round, decision } => {
                self.handle_game_decision(&client_id, match_id, round, decision).await
            }
            ClientMessage::GameMessage { match_id, message } => self.handle_game_message(&client_id, match_id, message).await,
            ClientMessage::ForfeitMatch => self.handle_forfeit_match(&client_id).await,
            ClientMessage::TournamentForfeit { match_id } => self.handle_tournament_forfeit(&client_id, match_id).await,
            ClientMessage::DecisionReversalResponse { match_id, accept } => {
                self.handle_reversal_response(&client_id, match_id, accept).await
            }
            ClientMessage::DecisionChangeRequest { match_id, round_number, new_decision } => {
                self.handle_decision_change(&client_id, match_id, round_number, new_decision).await
            }
            ClientMessage::DecisionChangesComplete { match_id } => {
                self.handle_decision_changes_complete(&client_id, match_id).await
            }
            ClientMessage::LobbyChat { lobby_code, message } => self.handle_lobby_chat(&client_id, lobby_code, message).await,
            ClientMessage::Ping => {
                Broadcaster::send_to(&self.registry, &client_id, ServerMessage::Pong);
                Ok(())
            }
            ClientMessage::Pong => Ok(()),
        };

        if let Err(e) = result {
            Broadcaster::send_to(&self.registry, &client_id, ServerMessage::Error((&e).into()));
        }
    }

    // ---- matchmaking ----------------------------------------------------

    async fn handle_join_queue(
        &mut self,
        client_id: &str,
        mut player: Player,
        preferences: Option<QueuePreferencesWire>,
    ) -> Result<(), RequestError> {
        if self.lobbies.lobby_of(client_id).is_some() {
            return Err(RequestError::QueueConflict);
        }
        player.id = client_id.to_string();
        let wire = preferences.unwrap_or_default();
        let prefs = QueuePreferences {
            trust_tolerance: wire.trust_tolerance.unwrap_or(self.config.matchmaking.default_trust_tolerance),
            max_wait_secs: wire.max_wait_secs.unwrap_or(300),
        };
        self.matchmaking.join(player, prefs);
        self.drain_matchmaking_pairs();

        if self.matchmaking.contains(client_id) {
            Broadcaster::send_to(
                &self.registry,
                client_id,
                ServerMessage::QueueStatus {
                    waited_seconds: self.matchmaking.waited_seconds(client_id).unwrap_or(0),
                    queue_size: self.matchmaking.len(),
                },
            );
        }
        Ok(())
    }

    async fn handle_leave_queue(&mut self, client_id: &str) -> Result<(), RequestError> {
        if self.matchmaking.leave(client_id) {
            Ok(())
        } else {
            Err(RequestError::NotInQueue)
        }
    }

    fn drain_matchmaking_pairs(&mut self) {
        while let Some(pairing) = self.matchmaking.try_pair_oldest() {
            let rounds = self.config.lobby.default_round_count;
            let match_id = self.spawn_match(
                pairing.p1.player_id.clone(),
                pairing.p1.player.clone(),
                pairing.p2.player_id.clone(),
                pairing.p2.player.clone(),
                rounds,
                None,
                None,
            );
            Broadcaster::send_to(
                &self.registry,
                &pairing.p1.player_id,
                ServerMessage::MatchFound {
                    match_id: match_id.clone(),
                    opponent: OpponentInfo::from_player(&pairing.p2.player),
                    is_player1: true,
                },
            );
            Broadcaster::send_to(
                &self.registry,
                &pairing.p2.player_id,
                ServerMessage::MatchFound {
                    match_id: match_id.clone(),
                    opponent: OpponentInfo::from_player(&pairing.p1.player),
                    is_player1: false,
                },
            );
            self.schedule_first_round(match_id, self.config.timers.match_found_to_first_round);
        }
    }

    async fn sweep_matchmaking(&mut self) {
        let expired = self.matchmaking.expire_stale();
        for entry in expired {
            Broadcaster::send_to(&self.registry, &entry.player_id, ServerMessage::Error((&RequestError::QueueTimeout).into()));
        }
        self.drain_matchmaking_pairs();
    }

    // ---- private rooms ---------------------------------------------------

    async fn handle_create_private_game(&mut self, client_id: &str, game_code: String, mut player: Player) -> Result<(), RequestError> {
        player.id = client_id.to_string();
        self.private_rooms.create(game_code, client_id.to_string(), player)?;
        Ok(())
    }

    async fn handle_join_private_game(&mut self, client_id: &str, game_code: String, mut player: Player) -> Result<(), RequestError> {
        player.id = client_id.to_string();
        let room = self.private_rooms.join(&game_code, client_id.to_string(), player)?;
        let (guest_client_id, guest_player) = room.guest.clone().expect("join always populates guest");

        let rounds = self.config.lobby.default_round_count;
        let match_id = self.spawn_match(
            room.host_client_id.clone(),
            room.host_player.clone(),
            guest_client_id.clone(),
            guest_player.clone(),
            rounds,
            None,
            None,
        );
        Broadcaster::send_to(
            &self.registry,
            &room.host_client_id,
            ServerMessage::MatchFound {
                match_id: match_id.clone(),
                opponent: OpponentInfo::from_player(&guest_player),
                is_player1: true,
            },
        );
        Broadcaster::send_to(
            &self.registry,
            &guest_client_id,
            ServerMessage::MatchFound {
                match_id: match_id.clone(),
                opponent: OpponentInfo::from_player(&room.host_player),
                is_player1: false,
            },
        );
        self.schedule_first_round(match_id, self.config.timers.match_found_to_first_round);
        Ok(())
    }

    fn sweep_private_rooms(&mut self) {
        let timeout = chrono::Duration::from_std(self.config.timers.private_room_timeout).unwrap_or_else(|_| chrono::Duration::minutes(10));
        for room in self.private_rooms.expire_stale(timeout) {
            debug!(code = %room.code, "private room expired with no guest");
        }
    }

    // ---- party lobbies ----------------------------------------------------

    fn merge_lobby_settings(base: LobbySettings, patch: LobbySettingsWire) -> LobbySettings {
        let mut settings = base;
        if let Some(v) = patch.max_players {
            settings.max_players = v;
        }
        if let Some(v) = patch.round_count {
            settings.round_count = v;
        }
        if let Some(v) = patch.tournament_format {
            settings.tournament_format = v;
        }
        if let Some(v) = patch.allow_spectators {
            settings.allow_spectators = v;
        }
        if let Some(v) = patch.chat_enabled {
            settings.chat_enabled = v;
        }
        if let Some(v) = patch.auto_start_when_full {
            settings.auto_start_when_full = v;
        }
        settings
    }

    async fn handle_create_party_lobby(
        &mut self,
        client_id: &str,
        player: Option<Player>,
        host_player_name: Option<String>,
        settings: LobbySettingsWire,
    ) -> Result<(), RequestError> {
        let name = player
            .map(|p| p.name)
            .or(host_player_name)
            .unwrap_or_else(|| client_id.to_string());
        let merged = Self::merge_lobby_settings(LobbySettings::default(), settings);
        let code = self.lobbies.create(&self.config.lobby, client_id.to_string(), name, merged)?;
        Broadcaster::send_to(&self.registry, client_id, ServerMessage::LobbyCreated { lobby_code: code });
        Ok(())
    }

    async fn handle_join_party_lobby(
        &mut self,
        client_id: &str,
        lobby_code: String,
        player: Option<Player>,
        player_name: Option<String>,
    ) -> Result<(), RequestError> {
        let name = player
            .map(|p| p.name)
            .or(player_name)
            .unwrap_or_else(|| client_id.to_string());
        self.lobbies.join(&self.config.lobby, &lobby_code, client_id.to_string(), name)?;
        Broadcaster::send_to(&self.registry, client_id, ServerMessage::LobbyJoined { lobby_code: lobby_code.clone() });
        self.broadcast_lobby_updated(&lobby_code);
        self.maybe_auto_start(&lobby_code);
        Ok(())
    }

    async fn handle_leave_party_lobby(&mut self, client_id: &str, lobby_code: String) -> Result<(), RequestError> {
        self.lobbies.leave(&self.config.lobby, &lobby_code, client_id);
        self.broadcast_lobby_updated(&lobby_code);
        Ok(())
    }

    async fn handle_update_lobby_settings(&mut self, client_id: &str, lobby_id: String, settings: LobbySettingsWire) -> Result<(), RequestError> {
        let patch = PartialLobbySettings {
            max_players: settings.max_players,
            round_count: settings.round_count,
            tournament_format: settings.tournament_format,
            allow_spectators: settings.allow_spectators,
            chat_enabled: settings.chat_enabled,
            auto_start_when_full: settings.auto_start_when_full,
        };
        self.lobbies.update_settings(&self.config.lobby, &lobby_id, client_id, patch)?;
        self.broadcast_lobby_updated(&lobby_id);
        Ok(())
    }

    async fn handle_kick_player(&mut self, client_id: &str, target_player_id: String) -> Result<(), RequestError> {
        let code = self.lobbies.lobby_of(client_id).map(|l| l.code.clone()).ok_or(RequestError::LobbyNotFound)?;
        self.lobbies.kick(&self.config.lobby, &code, client_id, &target_player_id)?;
        Broadcaster::send_to(&self.registry, &target_player_id, ServerMessage::KickedFromLobby { lobby_code: code.clone() });
        self.broadcast_lobby_updated(&code);
        Ok(())
    }

    async fn handle_close_lobby(&mut self, client_id: &str) -> Result<(), RequestError> {
        let code = self.lobbies.lobby_of(client_id).map(|l| l.code.clone()).ok_or(RequestError::LobbyNotFound)?;
        let lobby = self.lobbies.close(&code, client_id)?;
        Broadcaster::broadcast_to_lobby(&self.registry, &lobby, ServerMessage::LobbyClosed { lobby_code: code });
        Ok(())
    }

    async fn handle_lobby_chat(&mut self, client_id: &str, lobby_code: String, message: String) -> Result<(), RequestError> {
        let lobby = self.lobbies.get(&lobby_code).ok_or(RequestError::LobbyNotFound)?;
        LobbyManager::validate_chat(&self.config.lobby, lobby, &message)?;
        Broadcaster::broadcast_to_lobby(
            &self.registry,
            lobby,
            ServerMessage::ChatMessage {
                sender_id: client_id.to_string(),
                message,
                timestamp: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    fn broadcast_lobby_updated(&self, code: &str) {
        let Some(lobby) = self.lobbies.get(code) else { return };
        Broadcaster::broadcast_to_lobby(
            &self.registry,
            lobby,
            ServerMessage::LobbyUpdated {
                lobby_code: code.to_string(),
                status: lobby.status,
                player_count: lobby.player_count(),
            },
        );
    }

    fn maybe_auto_start(&mut self, code: &str) {
        let Some(lobby) = self.lobbies.get(code) else { return };
        if lobby.settings.auto_start_when_full && lobby.player_count() >= lobby.settings.max_players {
            let _ = self.start_tournament_internal(code);
        }
    }

    // ---- tournaments -------------------------------------------------------

    async fn handle_start_tournament(&mut self, client_id: &str, lobby_id: String) -> Result<(), RequestError> {
        let lobby = self.lobbies.get(&lobby_id).ok_or(RequestError::LobbyNotFound)?;
        if lobby.host_client_id != client_id {
            return Err(RequestError::NotHost);
        }
        self.start_tournament_internal(&lobby_id)
    }

    fn start_tournament_internal(&mut self, lobby_id: &str) -> Result<(), RequestError> {
        let lobby = self.lobbies.get(lobby_id).ok_or(RequestError::LobbyNotFound)?.clone();
        if lobby.player_count() < 4 {
            return Err(RequestError::InsufficientPlayers);
        }
        let participants: Vec<(String, String)> = lobby.participants.iter().map(|p| (p.id.clone(), p.name.clone())).collect();
        let tournament_id = Uuid::new_v4().to_string();
        self.tournaments
            .create(tournament_id.clone(), lobby_id.to_string(), lobby.settings.tournament_format, participants, lobby.settings.round_count)?;
        self.lobbies.mark_tournament_started(lobby_id, tournament_id.clone());
        self.tournaments.mark_started(&tournament_id);

        let Some(tournament) = self.tournaments.get(&tournament_id).cloned() else {
            return Ok(());
        };
        Broadcaster::broadcast_to_lobby(&self.registry, &lobby, ServerMessage::TournamentStarted { tournament });

        self.schedule_tournament_round_dispatch(tournament_id, self.config.timers.tournament_started_ordering_delay);
        Ok(())
    }

    fn dispatch_tournament_round(&mut self, tournament_id: &str) {
        let Some(tournament) = self.tournaments.get(tournament_id).cloned() else { return };
        let Some(lobby) = self.lobbies.get(&tournament.lobby_id).cloned() else { return };
        Broadcaster::broadcast_to_lobby(&self.registry, &lobby, ServerMessage::TournamentRoundStarted { round: tournament.current_round });

        for slot in self.tournaments.current_round_matches(tournament_id) {
            let (Some(p1_id), Some(p2_id)) = (slot.player1_id.clone(), slot.player2_id.clone()) else {
                continue; // byes advance without spawning a match
            };
            let p1_name = tournament.stats_for(&p1_id).map(|s| s.name.clone()).unwrap_or_else(|| p1_id.clone());
            let p2_name = tournament.stats_for(&p2_id).map(|s| s.name.clone()).unwrap_or_else(|| p2_id.clone());
            let p1_player = Player::new(p1_id.clone(), p1_name);
            let p2_player = Player::new(p2_id.clone(), p2_name);

            let p1_client = self.registry.resolve_client_id(&p1_id).unwrap_or(&p1_id).to_string();
            let p2_client = self.registry.resolve_client_id(&p2_id).unwrap_or(&p2_id).to_string();

            let match_id = self.spawn_match(
                p1_client,
                p1_player.clone(),
                p2_client,
                p2_player.clone(),
                tournament.rounds_per_match,
                Some(tournament_id.to_string()),
                Some(slot.id.clone()),
            );
            Broadcaster::send_to(
                &self.registry,
                &p1_id,
                ServerMessage::TournamentMatchReady {
                    match_id: match_id.clone(),
                    opponent: OpponentInfo::from_player(&p2_player),
                },
            );
            Broadcaster::send_to(
                &self.registry,
                &p2_id,
                ServerMessage::TournamentMatchReady {
                    match_id: match_id.clone(),
                    opponent: OpponentInfo::from_player(&p1_player),
                },
            );
            self.schedule_first_round(match_id, self.config.timers.tournament_started_ordering_delay);
        }
    }

    fn schedule_tournament_round_dispatch(&self, tournament_id: String, delay: Duration) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(DispatcherEvent::TournamentRoundDispatch { tournament_id }).await;
        });
    }

    fn advance_tournament(&mut self, tournament_id: &str) {
        let Ok(advance) = self.tournaments.advance_round(tournament_id) else { return };
        match advance {
            RoundAdvance::NextRound { .. } => {
                self.schedule_tournament_round_dispatch(tournament_id.to_string(), self.config.timers.tournament_round_pause);
            }
            RoundAdvance::Completed { winner_id, standings } => {
                let Some(tournament) = self.tournaments.get(tournament_id).cloned() else { return };
                let Some(lobby) = self.lobbies.get(&tournament.lobby_id) else { return };
                Broadcaster::broadcast_to_lobby(
                    &self.registry,
                    lobby,
                    ServerMessage::TournamentCompleted { tournament, winner_id, standings },
                );
            }
        }
    }

    fn finalize_tournament_match(&mut self, m: &Match, winner: Option<String>, p1_coop: u32, p1_betray: u32, p2_coop: u32, p2_betray: u32) {
        let Some(tournament_id) = m.tournament_id.clone() else { return };
        let Some(bracket_match_id) = m.tournament_match_id.clone() else { return };

        let p1_id = self
            .registry
            .get(&m.p1.client_id)
            .and_then(|c| c.tournament_player_id.clone())
            .unwrap_or_else(|| m.p1.client_id.clone());
        let p2_id = self
            .registry
            .get(&m.p2.client_id)
            .and_then(|c| c.tournament_player_id.clone())
            .unwrap_or_else(|| m.p2.client_id.clone());
        let winner_id = winner.and_then(|w| {
            if w == m.p1.client_id {
                Some(p1_id.clone())
            } else if w == m.p2.client_id {
                Some(p2_id.clone())
            } else {
                None
            }
        });

        let mut scores = BTreeMap::new();
        scores.insert(p1_id.clone(), m.p1_score);
        scores.insert(p2_id.clone(), m.p2_score);

        let round_complete = self
            .tournaments
            .record_match_result(
                &tournament_id,
                MatchResultInput {
                    bracket_match_id,
                    p1_id: p1_id.clone(),
                    p2_id: p2_id.clone(),
                    p1_score: m.p1_score,
                    p2_score: m.p2_score,
                    winner_id: winner_id.clone(),
                    p1_cooperations: p1_coop,
                    p1_betrayals: p1_betray,
                    p2_cooperations: p2_coop,
                    p2_betrayals: p2_betray,
                },
            )
            .unwrap_or(false);

        Broadcaster::send_to(
            &self.registry,
            &p1_id,
            ServerMessage::TournamentMatchCompleted {
                match_id: m.id.clone(),
                winner_id: winner_id.clone(),
                scores: scores.clone(),
            },
        );
        Broadcaster::send_to(
            &self.registry,
            &p2_id,
            ServerMessage::TournamentMatchCompleted { match_id: m.id.clone(), winner_id, scores },
        );

        if round_complete {
            self.advance_tournament(&tournament_id);
        }
    }

    // ---- live matches -------------------------------------------------------

    fn spawn_match(
        &mut self,
        p1_client: impl Into<String>,
        p1_player: Player,
        p2_client: impl Into<String>,
        p2_player: Player,
        rounds: u32,
        tournament_id: Option<String>,
        tournament_match_id: Option<String>,
    ) -> String {
        let match_id = Uuid::new_v4().to_string();
        let m = Match::new(
            match_id.clone(),
            MatchEndpoint::new(p1_client.into(), p1_player),
            MatchEndpoint::new(p2_client.into(), p2_player),
            rounds,
            tournament_id,
            tournament_match_id,
        );
        self.matches.insert(m);
        match_id
    }

    fn schedule_first_round(&self, match_id: String, delay: Duration) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(DispatcherEvent::BeginRound { match_id }).await;
        });
    }

    fn spawn_match_timer(&self, match_id: String, kind: MatchTimerKind, generation: u64, duration: Duration) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            time::sleep(duration).await;
            let _ = tx.send(DispatcherEvent::MatchTimer { match_id, kind, generation }).await;
        });
    }

    fn spawn_reconnect_grace(&self, match_id: String, side: Side, epoch: u64, duration: Duration) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            time::sleep(duration).await;
            let _ = tx.send(DispatcherEvent::ReconnectGrace { match_id, side, epoch }).await;
        });
    }

    fn send_new_round(&mut self, match_id: &str) {
        let Some(m) = self.matches.get(match_id) else { return };
        let duration = self.config.timers.round_timeout;
        let generation = m.generation;
        let round = m.current_round;
        Broadcaster::broadcast_to_match(
            &self.registry,
            m,
            ServerMessage::NewRound { round, timer_duration: duration.as_secs() },
        );
        self.spawn_match_timer(match_id.to_string(), MatchTimerKind::Round, generation, duration);
    }

    async fn handle_game_decision(&mut self, client_id: &str, match_id: String, round: u32, decision: Decision) -> Result<(), RequestError> {
        let side = self.matches.side_of(&match_id, client_id).ok_or(RequestError::MatchNotFound)?;
        let outcome = self.matches.submit_decision(&match_id, side, round, decision)?;
        self.handle_round_outcome(&match_id, outcome);
        Ok(())
    }

    fn handle_round_outcome(&mut self, match_id: &str, outcome: RoundOutcome) {
        let RoundOutcome::RoundScored { round, .. } = outcome else {
            return; // one side still deciding; nothing to broadcast yet
        };
        let Some(m) = self.matches.get(match_id) else { return };
        if let Some(entry) = m.rounds.get(&round) {
            let p1_view = ServerMessage::RoundResult(RoundResultView {
                round,
                your_decision: entry.p1_decision.unwrap_or(Decision::Cooperate),
                opponent_decision: entry.p2_decision.unwrap_or(Decision::Cooperate),
                your_points: entry.p1_score,
                opponent_points: entry.p2_score,
                your_total: m.p1_score,
                opponent_total: m.p2_score,
            });
            let p2_view = ServerMessage::RoundResult(RoundResultView {
                round,
                your_decision: entry.p2_decision.unwrap_or(Decision::Cooperate),
                opponent_decision: entry.p1_decision.unwrap_or(Decision::Cooperate),
                your_points: entry.p2_score,
                opponent_points: entry.p1_score,
                your_total: m.p2_score,
                opponent_total: m.p1_score,
            });
            Broadcaster::send_to_match_pair(&self.registry, m, p1_view, p2_view);
        }
        let generation = m.generation;
        self.spawn_match_timer(match_id.to_string(), MatchTimerKind::Round, generation, self.config.timers.results_display_pause);
    }

    async fn handle_match_timer(&mut self, match_id: String, kind: MatchTimerKind, generation: u64) {
        let Some(state) = self.matches.get(&match_id).map(|m| m.state) else { return };
        match (kind, state) {
            (MatchTimerKind::Round, MatchState::WaitingForDecisions) => {
                if let Ok(outcome) = self.matches.round_timeout(&match_id, generation) {
                    self.handle_round_outcome(&match_id, outcome);
                }
            }
            (MatchTimerKind::Round, MatchState::ShowingResults) => {
                if let Ok(outcome) = self.matches.advance_after_results(&match_id, generation) {
                    self.handle_advance_outcome(&match_id, outcome);
                }
            }
            (MatchTimerKind::Reversal, MatchState::AwaitingReversalResponses) => {
                if let Ok(outcome) = self.matches.reversal_timeout(&match_id, generation) {
                    self.handle_reversal_outcome(&match_id, None, outcome).await;
                }
            }
            _ => {} // stale firing against a match that has already moved on
        }
    }

    fn handle_advance_outcome(&mut self, match_id: &str, outcome: AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::NextRound { .. } => self.send_new_round(match_id),
            AdvanceOutcome::AwaitingReversal => {
                let Some(m) = self.matches.get(match_id) else { return };
                // §4.5: GAME_OVER is broadcast here, tentatively, the moment the
                // match enters AWAITING_REVERSAL_RESPONSES — persistence and the
                // per-perspective SHOW_STATISTICS wait for the reversal protocol
                // to actually resolve (see `finalize_match`).
                let winner = if m.p1_score > m.p2_score {
                    m.p1.client_id.clone()
                } else if m.p2_score > m.p1_score {
                    m.p2.client_id.clone()
                } else {
                    "tie".to_string()
                };
                Broadcaster::broadcast_to_match(
                    &self.registry,
                    m,
                    ServerMessage::GameOver {
                        winner,
                        final_scores: FinalScores { p1: m.p1_score, p2: m.p2_score },
                        total_rounds: m.max_rounds,
                    },
                );
                let duration = if m.is_tournament_match() {
                    self.config.timers.tournament_reversal_window
                } else {
                    self.config.timers.reversal_window
                };
                let generation = m.generation;
                self.spawn_match_timer(match_id.to_string(), MatchTimerKind::Reversal, generation, duration);
            }
        }
    }

    async fn handle_reversal_response(&mut self, client_id: &str, match_id: String, accept: bool) -> Result<(), RequestError> {
        let side = self.matches.side_of(&match_id, client_id).ok_or(RequestError::MatchNotFound)?;
        let outcome = self.matches.reversal_response(&match_id, side, accept)?;
        self.handle_reversal_outcome(&match_id, Some(side), outcome).await;
        Ok(())
    }

    async fn handle_reversal_outcome(&mut self, match_id: &str, responder: Option<Side>, outcome: ReversalOutcome) {
        match outcome {
            ReversalOutcome::Waiting => {
                if let Some(side) = responder {
                    if let Some(m) = self.matches.get(match_id) {
                        let client = match side {
                            Side::P1 => m.p1.client_id.clone(),
                            Side::P2 => m.p2.client_id.clone(),
                        };
                        Broadcaster::send_to(&self.registry, &client, ServerMessage::WaitingForOtherPlayer);
                    }
                }
            }
            ReversalOutcome::Approved => {
                if let Some(m) = self.matches.get(match_id) {
                    Broadcaster::broadcast_to_match(&self.registry, m, ServerMessage::ReversalApproved);
                }
            }
            ReversalOutcome::Rejected => {
                if let Some(m) = self.matches.get(match_id) {
                    Broadcaster::broadcast_to_match(&self.registry, m, ServerMessage::ReversalRejected);
                }
                self.finalize_match(match_id, true).await;
            }
        }
    }

    async fn handle_decision_change(
        &mut self,
        client_id: &str,
        match_id: String,
        round_number: u32,
        new_decision: Decision,
    ) -> Result<(), RequestError> {
        let side = self.matches.side_of(&match_id, client_id).ok_or(RequestError::MatchNotFound)?;
        // Applied silently: individual changes don't broadcast until both
        // sides signal DECISION_CHANGES_COMPLETE (§9 Open Question).
        self.matches.decision_change_request(&match_id, side, round_number, new_decision)?;
        Ok(())
    }

    async fn handle_decision_changes_complete(&mut self, client_id: &str, match_id: String) -> Result<(), RequestError> {
        let side = self.matches.side_of(&match_id, client_id).ok_or(RequestError::MatchNotFound)?;
        let outcome = self.matches.decision_changes_complete(&match_id, side)?;
        if let CompleteOutcome::BothComplete = outcome {
            if let Some(m) = self.matches.get(&match_id) {
                Broadcaster::broadcast_to_match(
                    &self.registry,
                    m,
                    ServerMessage::FinalScoresUpdate {
                        final_scores: FinalScores { p1: m.p1_score, p2: m.p2_score },
                    },
                );
            }
            self.finalize_match(&match_id, true).await;
        }
        Ok(())
    }

    async fn handle_game_message(&mut self, client_id: &str, match_id: String, message: String) -> Result<(), RequestError> {
        self.matches.side_of(&match_id, client_id).ok_or(RequestError::MatchNotFound)?;
        if message.is_empty() {
            return Err(RequestError::MessageEmpty);
        }
        if message.len() > self.config.lobby.max_chat_len {
            return Err(RequestError::MessageTooLong);
        }
        if let Some(m) = self.matches.get(&match_id) {
            Broadcaster::broadcast_to_match(
                &self.registry,
                m,
                ServerMessage::ChatMessage {
                    sender_id: client_id.to_string(),
                    message,
                    timestamp: chrono::Utc::now(),
                },
            );
        }
        Ok(())
    }

    async fn handle_forfeit_match(&mut self, client_id: &str) -> Result<(), RequestError> {
        let match_id = self.matches.find_active_match_for_client(client_id).ok_or(RequestError::MatchNotFound)?;
        self.apply_forfeit(&match_id, client_id).await
    }

    async fn handle_tournament_forfeit(&mut self, client_id: &str, match_id: String) -> Result<(), RequestError> {
        self.apply_forfeit(&match_id, client_id).await
    }

    async fn apply_forfeit(&mut self, match_id: &str, client_id: &str) -> Result<(), RequestError> {
        let side = self.matches.side_of(match_id, client_id).ok_or(RequestError::MatchNotFound)?;
        let settlement = self.matches.forfeit(match_id, side)?;

        Broadcaster::send_to(&self.registry, client_id, ServerMessage::ForfeitConfirmed);
        Broadcaster::send_to(
            &self.registry,
            &settlement.winner_client_id,
            ServerMessage::ShowStatistics {
                your_score: settlement.winner_score,
                opponent_score: settlement.loser_score,
                winner: settlement.winner_client_id.clone(),
                forfeit: true,
                immediate: true,
            },
        );
        Broadcaster::send_to(
            &self.registry,
            &settlement.loser_client_id,
            ServerMessage::ShowStatistics {
                your_score: settlement.loser_score,
                opponent_score: settlement.winner_score,
                winner: settlement.winner_client_id.clone(),
                forfeit: true,
                immediate: true,
            },
        );

        self.finalize_match(match_id, false).await;
        Ok(())
    }

    fn start_tiebreaker(&mut self, match_id: &str) {
        if self.matches.start_tiebreaker(match_id).is_err() {
            return;
        }
        let Some(m) = self.matches.get(match_id) else { return };
        let generation = m.generation;
        let duration = self.config.timers.round_timeout;
        Broadcaster::broadcast_to_match(&self.registry, m, ServerMessage::NewRound { round: 0, timer_duration: duration.as_secs() });
        self.spawn_match_timer(match_id.to_string(), MatchTimerKind::Round, generation, duration);
    }

    /// Close out a match once the reversal protocol (or a forfeit) has
    /// resolved it: resolve a tied single-elimination bracket match into a
    /// best-of-3 tiebreaker instead of finalizing, otherwise show
    /// per-perspective statistics, persist the outcome, and fold the result
    /// into the owning tournament if any. GAME_OVER itself was already
    /// broadcast (tentatively) when the match entered AWAITING_REVERSAL
    /// -- see `handle_advance_outcome` -- so `announce` only controls the
    /// terminal SHOW_STATISTICS pair; forfeits send their own immediate
    /// SHOW_STATISTICS before calling in here and pass `false`.
    async fn finalize_match(&mut self, match_id: &str, announce: bool) {
        let Some(m) = self.matches.get(match_id).cloned() else { return };
        if m.results_saved {
            return;
        }

        if m.is_tournament_match() && !m.is_tiebreaker && m.p1_score == m.p2_score {
            let format = m.tournament_id.as_deref().and_then(|id| self.tournaments.get(id)).map(|t| t.format);
            if format == Some(TournamentFormat::SingleElimination) {
                self.start_tiebreaker(match_id);
                return;
            }
        }

        let winner = if m.p1_score > m.p2_score {
            Some(m.p1.client_id.clone())
        } else if m.p2_score > m.p1_score {
            Some(m.p2.client_id.clone())
        } else if m.is_tiebreaker {
            self.matches.resolve_tiebreaker_tie_randomly(match_id)
        } else {
            None
        };

        self.matches.mark_results_saved(match_id);

        if announce {
            let winner_label = winner.clone().unwrap_or_else(|| "tie".to_string());
            Broadcaster::send_to_match_pair(
                &self.registry,
                &m,
                ServerMessage::ShowStatistics {
                    your_score: m.p1_score,
                    opponent_score: m.p2_score,
                    winner: winner_label.clone(),
                    forfeit: false,
                    immediate: false,
                },
                ServerMessage::ShowStatistics {
                    your_score: m.p2_score,
                    opponent_score: m.p1_score,
                    winner: winner_label,
                    forfeit: false,
                    immediate: false,
                },
            );
        }

        let (p1_coop, p1_betray) = Self::tally_decisions(&m, Side::P1);
        let (p2_coop, p2_betray) = Self::tally_decisions(&m, Side::P2);

        self.persistence
            .record_terminal_match(TerminalMatch {
                match_id: m.id.clone(),
                p1_client_id: m.p1.client_id.clone(),
                p2_client_id: m.p2.client_id.clone(),
                p1_score: m.p1_score,
                p2_score: m.p2_score,
                rounds_played: m.max_rounds,
                game_duration_ms: (chrono::Utc::now() - m.created_at).num_milliseconds().max(0) as u64,
                p1_cooperations: p1_coop,
                p1_betrayals: p1_betray,
                p2_cooperations: p2_coop,
                p2_betrayals: p2_betray,
            })
            .await;

        if m.is_tournament_match() {
            self.finalize_tournament_match(&m, winner, p1_coop, p1_betray, p2_coop, p2_betray);
        }

        self.schedule_match_purge(match_id.to_string());
    }

    fn schedule_match_purge(&self, match_id: String) {
        let tx = self.self_tx.clone();
        let delay = self.config.timers.post_match_retention;
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(DispatcherEvent::PurgeMatch { match_id }).await;
        });
    }

    fn tally_decisions(m: &Match, side: Side) -> (u32, u32) {
        let mut cooperations = 0;
        let mut betrayals = 0;
        for round in m.rounds.values() {
            let decision = match side {
                Side::P1 => round.p1_decision,
                Side::P2 => round.p2_decision,
            };
            match decision {
                Some(Decision::Cooperate) => cooperations += 1,
                Some(Decision::Betray) => betrayals += 1,
                None => {}
            }
        }
        (cooperations, betrayals)
    }

    fn match_state_wire(state: MatchState) -> String {
        serde_json::to_value(state)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn sweep_sessions(&mut self) {
        let max_age = chrono::Duration::from_std(self.config.timers.tournament_reconnect_grace).unwrap_or_else(|_| chrono::Duration::minutes(5));
        self.sessions.gc_disconnected_older_than(max_age);
    }
}

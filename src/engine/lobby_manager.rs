//! Lobby Manager (C7, §4.4)
//!
//! Party lobbies: creation, join/leave, kick, host-transfer, settings
//! mutation, chat broadcast, readiness transitions. Grounded on the
//! teacher's code-generation and registry-mutation style in
//! `network/server.rs`, generalized from a connection registry to a
//! lobby-by-code map.

use std::collections::HashMap;

use rand::Rng;

use crate::config::LobbyConfig;
use crate::error::RequestError;
use crate::models::lobby::{Lobby, LobbyParticipant, LobbySettings, TournamentFormat};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// The set of all live party lobbies.
#[derive(Default)]
pub struct LobbyManager {
    by_code: HashMap<String, Lobby>,
}

impl LobbyManager {
    /// Construct an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh 6-char uppercase alphanumeric code, retried on
    /// collision with any live lobby (§4.4).
    pub fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if !self.by_code.contains_key(&code) {
                return code;
            }
        }
    }

    /// Validate a settings payload against the configured bounds (§6, §8:
    /// `maxPlayers` ∈ [4,16], `roundCount` ∈ [5,20]).
    pub fn validate_settings(config: &LobbyConfig, settings: &LobbySettings) -> Result<(), RequestError> {
        if !(config.min_max_players..=config.max_max_players).contains(&settings.max_players) {
            return Err(RequestError::InvalidRequest(format!(
                "maxPlayers must be between {} and {}",
                config.min_max_players, config.max_max_players
            )));
        }
        if !(config.min_round_count..=config.max_round_count).contains(&settings.round_count) {
            return Err(RequestError::InvalidRequest(format!(
                "roundCount must be between {} and {}",
                config.min_round_count, config.max_round_count
            )));
        }
        Ok(())
    }

    /// Create a new lobby with `host_client_id` as its sole, ready host.
    pub fn create(
        &mut self,
        config: &LobbyConfig,
        host_client_id: impl Into<String>,
        host_name: impl Into<String>,
        settings: LobbySettings,
    ) -> Result<String, RequestError> {
        Self::validate_settings(config, &settings)?;
        let code = self.generate_code();
        let lobby = Lobby::new(code.clone(), host_client_id, host_name, settings);
        self.by_code.insert(code.clone(), lobby);
        Ok(code)
    }

    /// Look up a lobby by code.
    pub fn get(&self, code: &str) -> Option<&Lobby> {
        self.by_code.get(code)
    }

    /// Look up a lobby by code, mutably.
    pub fn get_mut(&mut self, code: &str) -> Option<&mut Lobby> {
        self.by_code.get_mut(code)
    }

    /// Find the (at most one) live lobby a client currently belongs to.
    pub fn lobby_of(&self, client_id: &str) -> Option<&Lobby> {
        self.by_code.values().find(|l| l.participants.iter().any(|p| p.id == client_id))
    }

    /// Remove `client_id` from whichever *other* live lobby they currently
    /// hold membership in, if any (`except_code` is left untouched),
    /// applying the same departure semantics as an explicit leave (host
    /// transfer / empty-lobby deletion). Used by `JOIN_PARTY_LOBBY` to
    /// silently clear prior membership (§4.4: "the joining client is
    /// silently removed from any *other* live lobby").
    pub fn remove_from_current_lobby(&mut self, config: &LobbyConfig, client_id: &str, except_code: &str) -> Option<String> {
        let code = self.lobby_of(client_id).map(|l| l.code.clone())?;
        if code == except_code {
            return None;
        }
        self.leave(config, &code, client_id);
        Some(code)
    }

    /// Join `code`, rejecting if full, if a tournament is running, or if
    /// the client is already a participant (§4.4).
    pub fn join(
        &mut self,
        config: &LobbyConfig,
        code: &str,
        client_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<(), RequestError> {
        let client_id = client_id.into();

        let lobby = self.by_code.get(code).ok_or(RequestError::LobbyNotFound)?;
        if lobby.participants.iter().any(|p| p.id == client_id) {
            return Err(RequestError::InvalidRequest("already a member of this lobby".into()));
        }

        self.remove_from_current_lobby(config, &client_id, code);

        let lobby = self.by_code.get_mut(code).ok_or(RequestError::LobbyNotFound)?;
        if matches!(lobby.status, crate::models::lobby::LobbyStatus::TournamentInProgress) {
            return Err(RequestError::TournamentInProgress);
        }
        if lobby.player_count() >= lobby.settings.max_players {
            return Err(RequestError::LobbyFull);
        }
        lobby.participants.push(LobbyParticipant::new(client_id, name));
        lobby.recompute_status(config.min_players_to_ready);
        Ok(())
    }

    /// Remove a participant. If the host leaves and others remain, host
    /// flag transfers to the next participant in list order. If the last
    /// participant leaves, the lobby is deleted. Returns `true` if the
    /// lobby was deleted as a result.
    pub fn leave(&mut self, config: &LobbyConfig, code: &str, client_id: &str) -> bool {
        let Some(lobby) = self.by_code.get_mut(code) else {
            return false;
        };
        let was_host = lobby.participants.iter().any(|p| p.id == client_id && p.is_host);
        lobby.participants.retain(|p| p.id != client_id);

        if lobby.participants.is_empty() {
            self.by_code.remove(code);
            return true;
        }
        if was_host {
            lobby.participants[0].is_host = true;
            lobby.host_client_id = lobby.participants[0].id.clone();
        }
        lobby.recompute_status(config.min_players_to_ready);
        false
    }

    /// Host-only kick; identical mechanics to [`Self::leave`] (§4.4).
    pub fn kick(&mut self, config: &LobbyConfig, code: &str, caller_client_id: &str, target_id: &str) -> Result<bool, RequestError> {
        let lobby = self.by_code.get(code).ok_or(RequestError::LobbyNotFound)?;
        if lobby.host_client_id != caller_client_id {
            return Err(RequestError::NotHost);
        }
        if !lobby.participants.iter().any(|p| p.id == target_id) {
            return Err(RequestError::InvalidRequest("no such participant".into()));
        }
        Ok(self.leave(config, code, target_id))
    }

    /// Host-only settings merge, rejected while a tournament is running
    /// (§4.4: "`maxPlayers` change is allowed; other settings are merged").
    pub fn update_settings(
        &mut self,
        lobby_config: &LobbyConfig,
        code: &str,
        caller_client_id: &str,
        patch: PartialLobbySettings,
    ) -> Result<(), RequestError> {
        let lobby = self.by_code.get_mut(code).ok_or(RequestError::LobbyNotFound)?;
        if lobby.host_client_id != caller_client_id {
            return Err(RequestError::NotHost);
        }
        if matches!(lobby.status, crate::models::lobby::LobbyStatus::TournamentInProgress) {
            return Err(RequestError::TournamentInProgress);
        }

        let mut merged = lobby.settings.clone();
        if let Some(v) = patch.max_players {
            merged.max_players = v;
        }
        if let Some(v) = patch.round_count {
            merged.round_count = v;
        }
        if let Some(v) = patch.tournament_format {
            merged.tournament_format = v;
        }
        if let Some(v) = patch.allow_spectators {
            merged.allow_spectators = v;
        }
        if let Some(v) = patch.chat_enabled {
            merged.chat_enabled = v;
        }
        if let Some(v) = patch.auto_start_when_full {
            merged.auto_start_when_full = v;
        }
        Self::validate_settings(lobby_config, &merged)?;
        lobby.settings = merged;
        lobby.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Host-only close; deletes the lobby, returning it for the caller
    /// to broadcast `LOBBY_CLOSED` to its participants.
    pub fn close(&mut self, code: &str, caller_client_id: &str) -> Result<Lobby, RequestError> {
        let lobby = self.by_code.get(code).ok_or(RequestError::LobbyNotFound)?;
        if lobby.host_client_id != caller_client_id {
            return Err(RequestError::NotHost);
        }
        Ok(self.by_code.remove(code).unwrap())
    }

    /// Validate a chat message per §4.4 (`chatEnabled`, length ≤ 500,
    /// non-empty).
    pub fn validate_chat(config: &LobbyConfig, lobby: &Lobby, message: &str) -> Result<(), RequestError> {
        if !lobby.settings.chat_enabled {
            return Err(RequestError::ChatDisabled);
        }
        if message.is_empty() {
            return Err(RequestError::MessageEmpty);
        }
        if message.len() > config.max_chat_len {
            return Err(RequestError::MessageTooLong);
        }
        Ok(())
    }

    /// Mark a lobby's status as `tournament_in_progress` once
    /// `START_TOURNAMENT` succeeds.
    pub fn mark_tournament_started(&mut self, code: &str, tournament_id: impl Into<String>) {
        if let Some(lobby) = self.by_code.get_mut(code) {
            lobby.status = crate::models::lobby::LobbyStatus::TournamentInProgress;
            lobby.tournament_id = Some(tournament_id.into());
            lobby.updated_at = chrono::Utc::now();
        }
    }
}

/// A partial settings patch, as accepted by `UPDATE_LOBBY_SETTINGS`
/// (§6 `LobbySettingsWire`).
#[derive(Debug, Clone, Default)]
pub struct PartialLobbySettings {
    pub max_players: Option<u32>,
    pub round_count: Option<u32>,
    pub tournament_format: Option<TournamentFormat>,
    pub allow_spectators: Option<bool>,
    pub chat_enabled: Option<bool>,
    pub auto_start_when_full: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LobbyConfig {
        LobbyConfig::default()
    }

    #[test]
    fn create_then_join_increments_count() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create(&config(), "host", "Host", LobbySettings::default()).unwrap();
        mgr.join(&config(), &code, "p2", "P2").unwrap();
        assert_eq!(mgr.get(&code).unwrap().player_count(), 2);
    }

    #[test]
    fn host_departure_transfers_to_next_participant() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create(&config(), "host", "Host", LobbySettings::default()).unwrap();
        mgr.join(&config(), &code, "p2", "P2").unwrap();
        let deleted = mgr.leave(&config(), &code, "host");
        assert!(!deleted);
        let lobby = mgr.get(&code).unwrap();
        assert_eq!(lobby.host_client_id, "p2");
        assert!(lobby.participants[0].is_host);
    }

    #[test]
    fn last_participant_leaving_deletes_lobby() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create(&config(), "host", "Host", LobbySettings::default()).unwrap();
        let deleted = mgr.leave(&config(), &code, "host");
        assert!(deleted);
        assert!(mgr.get(&code).is_none());
    }

    #[test]
    fn joining_silently_leaves_prior_lobby() {
        let mut mgr = LobbyManager::new();
        let code_a = mgr.create(&config(), "host-a", "HostA", LobbySettings::default()).unwrap();
        mgr.join(&config(), &code_a, "p2", "P2").unwrap();
        let code_b = mgr.create(&config(), "host-b", "HostB", LobbySettings::default()).unwrap();

        mgr.join(&config(), &code_b, "p2", "P2").unwrap();
        assert_eq!(mgr.get(&code_a).unwrap().player_count(), 1);
        assert_eq!(mgr.get(&code_b).unwrap().player_count(), 2);
    }

    #[test]
    fn rejoining_same_lobby_is_rejected_and_leaves_membership_intact() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create(&config(), "host", "Host", LobbySettings::default()).unwrap();
        mgr.join(&config(), &code, "p2", "P2").unwrap();

        let err = mgr.join(&config(), &code, "p2", "P2").unwrap_err();
        assert_eq!(err, RequestError::InvalidRequest("already a member of this lobby".into()));
        assert_eq!(mgr.get(&code).unwrap().player_count(), 2);
    }

    #[test]
    fn sole_participant_rejoining_own_lobby_does_not_delete_it() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create(&config(), "host", "Host", LobbySettings::default()).unwrap();

        let err = mgr.join(&config(), &code, "host", "Host").unwrap_err();
        assert_eq!(err, RequestError::InvalidRequest("already a member of this lobby".into()));
        assert!(mgr.get(&code).is_some());
        assert_eq!(mgr.get(&code).unwrap().player_count(), 1);
    }

    #[test]
    fn kick_requires_host() {
        let mut mgr = LobbyManager::new();
        let code = mgr.create(&config(), "host", "Host", LobbySettings::default()).unwrap();
        mgr.join(&config(), &code, "p2", "P2").unwrap();
        assert!(matches!(mgr.kick(&config(), &code, "p2", "host"), Err(RequestError::NotHost)));
    }

    #[test]
    fn chat_validation_enforces_length_and_emptiness() {
        let cfg = config();
        let mut lobby = Lobby::new("ABC123", "host", "Host", LobbySettings::default());
        lobby.settings.chat_enabled = true;
        assert!(LobbyManager::validate_chat(&cfg, &lobby, "hello").is_ok());
        assert!(matches!(LobbyManager::validate_chat(&cfg, &lobby, ""), Err(RequestError::MessageEmpty)));
        let long = "a".repeat(501);
        assert!(matches!(LobbyManager::validate_chat(&cfg, &lobby, &long), Err(RequestError::MessageTooLong)));
        let exactly_500 = "a".repeat(500);
        assert!(LobbyManager::validate_chat(&cfg, &lobby, &exactly_500).is_ok());
    }
}

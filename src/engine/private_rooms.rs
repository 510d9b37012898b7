//! Private Game Registry (C6, §3, §4.3 sibling)
//!
//! Map of 6-character codes to a pending host/guest pair, resolving to a
//! [`crate::models::match_state::Match`] on guest arrival. Destroyed on
//! match creation or timeout (§9: 10-minute timeout, not in the source,
//! added here per the recommendation).

use std::collections::HashMap;

use rand::Rng;

use crate::error::RequestError;
use crate::models::player::Player;
use crate::models::private_room::PrivateRoom;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// The private-room registry.
#[derive(Default)]
pub struct PrivateRoomRegistry {
    by_code: HashMap<String, PrivateRoom>,
}

impl PrivateRoomRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room under a host-chosen code. Rejects a collision with
    /// any live room (the host picks the code directly, unlike lobby
    /// codes which are server-generated, §6 `CREATE_PRIVATE_GAME{gameCode}`).
    pub fn create(&mut self, code: impl Into<String>, host_client_id: impl Into<String>, host_player: Player) -> Result<(), RequestError> {
        let code = code.into();
        if self.by_code.contains_key(&code) {
            return Err(RequestError::InvalidRequest("room code already in use".into()));
        }
        self.by_code.insert(code.clone(), PrivateRoom::new(code, host_client_id, host_player));
        Ok(())
    }

    /// Look up a room by code.
    pub fn get(&self, code: &str) -> Option<&PrivateRoom> {
        self.by_code.get(code)
    }

    /// Join an existing waiting room as guest, returning the completed
    /// room (now ready for match creation) and removing it from the
    /// registry (§3: "destroyed on match creation").
    pub fn join(&mut self, code: &str, guest_client_id: impl Into<String>, guest_player: Player) -> Result<PrivateRoom, RequestError> {
        let room = self.by_code.get(code).ok_or(RequestError::LobbyNotFound)?;
        if room.guest.is_some() {
            return Err(RequestError::InvalidRequest("room already matched".into()));
        }
        let mut room = self.by_code.remove(code).unwrap();
        room.guest = Some((guest_client_id.into(), guest_player));
        room.status = crate::models::private_room::PrivateRoomStatus::Matched;
        Ok(room)
    }

    /// Remove and return every room that has outstayed the private-room
    /// timeout.
    pub fn expire_stale(&mut self, timeout: chrono::Duration) -> Vec<PrivateRoom> {
        let stale: Vec<String> = self
            .by_code
            .iter()
            .filter(|(_, room)| room.is_expired(timeout))
            .map(|(code, _)| code.clone())
            .collect();
        stale.into_iter().filter_map(|code| self.by_code.remove(&code)).collect()
    }

    /// Generate a fresh 6-char uppercase alphanumeric code, retried on
    /// collision with any live room (§4.4's code-generation rule, shared
    /// here for private rooms that don't supply their own code).
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_join_removes_room() {
        let mut reg = PrivateRoomRegistry::new();
        reg.create("ABC123", "host", Player::new("host", "Host")).unwrap();
        let room = reg.join("ABC123", "guest", Player::new("guest", "Guest")).unwrap();
        assert_eq!(room.host_client_id, "host");
        assert!(reg.get("ABC123").is_none());
    }

    #[test]
    fn duplicate_code_rejected() {
        let mut reg = PrivateRoomRegistry::new();
        reg.create("ABC123", "host", Player::new("host", "Host")).unwrap();
        assert!(reg.create("ABC123", "host2", Player::new("host2", "Host2")).is_err());
    }

    #[test]
    fn join_missing_code_fails() {
        let mut reg = PrivateRoomRegistry::new();
        assert!(matches!(reg.join("ZZZZZZ", "guest", Player::new("guest", "Guest")), Err(RequestError::LobbyNotFound)));
    }
}

//! Repository ports for the external data-access layer (§1 out-of-scope,
//! §6 persistent schema).
//!
//! The core never talks to a concrete database; it depends on these
//! traits, matching the `DatabasePort` pattern from the pack's
//! tournament-scheduling example (`app_core::ports::database`) — a trait
//! bundle plus one in-memory fake per port, so the bridge in
//! `persistence::bridge` is unit-testable without a real store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A persistence-layer failure. Transient failures (`Transient`) are
/// retried by the bridge per §4.7; `NotFound` is not retried.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No such record; not retried.
    #[error("not found")]
    NotFound,
    /// Likely transient (connection reset, timeout); safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),
}

/// One row of `game_history` (§6).
#[derive(Debug, Clone)]
pub struct GameHistoryRecord {
    pub id: String,
    pub player1_id: String,
    pub player2_id: String,
    pub player1_score: u32,
    pub player2_score: u32,
    /// `None` for a tie.
    pub winner_id: Option<String>,
    pub game_mode: String,
    pub rounds_played: u32,
    pub game_duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A row of `user_stats` (§6), keyed by `user_id`.
#[derive(Debug, Clone)]
pub struct UserStats {
    pub user_id: String,
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,
    pub cooperations: u32,
    pub betrayals: u32,
    pub total_score: u64,
    pub win_rate: f64,
    pub trust_score: u32,
    pub betrayal_rate: f64,
    pub average_score: f64,
    pub longest_win_streak: u32,
    pub current_win_streak: u32,
    pub games_this_week: u32,
    pub games_this_month: u32,
}

impl UserStats {
    /// A fresh row for a user with no recorded games.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            total_games: 0,
            wins: 0,
            losses: 0,
            cooperations: 0,
            betrayals: 0,
            total_score: 0,
            win_rate: 0.0,
            trust_score: 50,
            betrayal_rate: 0.0,
            average_score: 0.0,
            longest_win_streak: 0,
            current_win_streak: 0,
            games_this_week: 0,
            games_this_month: 0,
        }
    }

    /// Fold in the outcome of one completed match for this user (§4.7:
    /// "applies delta updates to each user's aggregate statistics").
    pub fn apply_match(&mut self, won: bool, tied: bool, score: u32, cooperations: u32, betrayals: u32) {
        self.total_games += 1;
        self.total_score += score as u64;
        self.cooperations += cooperations;
        self.betrayals += betrayals;
        self.games_this_week += 1;
        self.games_this_month += 1;

        if won {
            self.wins += 1;
            self.current_win_streak += 1;
            self.longest_win_streak = self.longest_win_streak.max(self.current_win_streak);
        } else if !tied {
            self.losses += 1;
            self.current_win_streak = 0;
        }

        self.win_rate = self.wins as f64 / self.total_games as f64;
        self.average_score = self.total_score as f64 / self.total_games as f64;
        let total_decisions = self.cooperations + self.betrayals;
        if total_decisions > 0 {
            self.betrayal_rate = self.betrayals as f64 / total_decisions as f64;
        }
    }
}

/// Resolves a client/session identity to a persistent user id (§4.7:
/// "resolves both client ids to persistent user ids via the session
/// repository"). Guests never reach this port — the bridge filters them
/// out via [`crate::models::player::Player::is_guest`] first.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Resolve a client id to its bound user id, if the client is a known,
    /// authenticated session.
    async fn resolve_user_id(&self, client_id: &str) -> Result<Option<String>, RepositoryError>;
}

/// Writes completed-match rows (§6 `game_history`).
#[async_trait]
pub trait GameHistoryRepository: Send + Sync {
    /// Insert one terminal-match record.
    async fn create(&self, record: GameHistoryRecord) -> Result<(), RepositoryError>;
}

/// Reads/writes per-user aggregate statistics (§6 `user_stats`).
#[async_trait]
pub trait UserStatsRepository: Send + Sync {
    /// Fetch a user's current stats row, if one exists.
    async fn find_by_user(&self, user_id: &str) -> Result<Option<UserStats>, RepositoryError>;
    /// Replace a user's stats row (the bridge reads-modifies-writes).
    async fn upsert(&self, stats: UserStats) -> Result<(), RepositoryError>;
}

/// The bundle of repository ports the bridge depends on, injected at
/// server startup (§9 Design Notes: "singleton services ... model them
/// as interface values injected into the engine").
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn SessionRepository>,
    pub game_history: Arc<dyn GameHistoryRepository>,
    pub user_stats: Arc<dyn UserStatsRepository>,
}

impl Repositories {
    /// Build a bundle backed entirely by the in-memory test doubles below.
    pub fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionRepository::new()),
            game_history: Arc::new(InMemoryGameHistoryRepository::new()),
            user_stats: Arc::new(InMemoryUserStatsRepository::new()),
        }
    }
}

/// In-memory [`SessionRepository`] test double: every non-guest client id
/// resolves to itself prefixed `user_`, unless explicitly seeded.
#[derive(Default)]
pub struct InMemorySessionRepository {
    overrides: Mutex<HashMap<String, String>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an explicit client-id -> user-id mapping.
    pub fn seed(&self, client_id: impl Into<String>, user_id: impl Into<String>) {
        self.overrides.lock().unwrap().insert(client_id.into(), user_id.into());
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn resolve_user_id(&self, client_id: &str) -> Result<Option<String>, RepositoryError> {
        if let Some(user_id) = self.overrides.lock().unwrap().get(client_id) {
            return Ok(Some(user_id.clone()));
        }
        Ok(Some(format!("user_{client_id}")))
    }
}

/// In-memory [`GameHistoryRepository`] test double.
#[derive(Default)]
pub struct InMemoryGameHistoryRepository {
    rows: Mutex<Vec<GameHistoryRecord>>,
}

impl InMemoryGameHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row written so far, for test assertions.
    pub fn rows(&self) -> Vec<GameHistoryRecord> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl GameHistoryRepository for InMemoryGameHistoryRepository {
    async fn create(&self, record: GameHistoryRecord) -> Result<(), RepositoryError> {
        self.rows.lock().unwrap().push(record);
        Ok(())
    }
}

/// In-memory [`UserStatsRepository`] test double.
#[derive(Default)]
pub struct InMemoryUserStatsRepository {
    rows: Mutex<HashMap<String, UserStats>>,
}

impl InMemoryUserStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStatsRepository for InMemoryUserStatsRepository {
    async fn find_by_user(&self, user_id: &str) -> Result<Option<UserStats>, RepositoryError> {
        Ok(self.rows.lock().unwrap().get(user_id).cloned())
    }

    async fn upsert(&self, stats: UserStats) -> Result<(), RepositoryError> {
        self.rows.lock().unwrap().insert(stats.user_id.clone(), stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_apply_match_tracks_streak() {
        let mut stats = UserStats::new("u1");
        stats.apply_match(true, false, 30, 8, 2);
        stats.apply_match(true, false, 25, 7, 3);
        stats.apply_match(false, false, 10, 2, 8);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.longest_win_streak, 2);
        assert_eq!(stats.current_win_streak, 0);
    }

    #[tokio::test]
    async fn in_memory_session_repository_resolves_default_mapping() {
        let repo = InMemorySessionRepository::new();
        let resolved = repo.resolve_user_id("client-1").await.unwrap();
        assert_eq!(resolved, Some("user_client-1".into()));
    }

    #[tokio::test]
    async fn in_memory_session_repository_honors_seed() {
        let repo = InMemorySessionRepository::new();
        repo.seed("client-1", "user-42");
        assert_eq!(repo.resolve_user_id("client-1").await.unwrap(), Some("user-42".into()));
    }

    #[tokio::test]
    async fn game_history_repository_records_rows() {
        let repo = InMemoryGameHistoryRepository::new();
        repo.create(GameHistoryRecord {
            id: "m1".into(),
            player1_id: "u1".into(),
            player2_id: "u2".into(),
            player1_score: 30,
            player2_score: 20,
            winner_id: Some("u1".into()),
            game_mode: "classic".into(),
            rounds_played: 10,
            game_duration_ms: 1000,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        assert_eq!(repo.rows().len(), 1);
    }

    #[tokio::test]
    async fn user_stats_repository_upsert_then_find() {
        let repo = InMemoryUserStatsRepository::new();
        assert!(repo.find_by_user("u1").await.unwrap().is_none());
        repo.upsert(UserStats::new("u1")).await.unwrap();
        assert!(repo.find_by_user("u1").await.unwrap().is_some());
    }
}

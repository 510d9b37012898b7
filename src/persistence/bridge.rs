//! Persistence Bridge (C11, §4.7)
//!
//! Writes terminal-match outcomes out to the external data-access layer:
//! resolves both client ids to persistent user ids, skips guests, retries
//! transient failures with exponential backoff, and falls back to the
//! offline queue once the retry budget is exhausted. Guarded by
//! [`crate::engine::match_engine::MatchEngine::mark_results_saved`]
//! against the reversal/timeout double-write race named in §4.7.
//!
//! Grounded on the teacher's retry-with-backoff shape used for proof
//! submission, generalized from a single external call to the three
//! repository writes this spec needs.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{error, warn};

use crate::config::PersistenceConfig;
use crate::models::player::Player;
use crate::persistence::offline_queue::{OfflineQueue, PendingWrite};
use crate::persistence::repository::{GameHistoryRecord, RepositoryError, Repositories, UserStats};

/// Input describing one terminal match, as the dispatcher observes it
/// once [`crate::engine::match_engine::MatchEngine`] reaches `COMPLETED`.
pub struct TerminalMatch {
    pub match_id: String,
    pub p1_client_id: String,
    pub p2_client_id: String,
    pub p1_score: u32,
    pub p2_score: u32,
    pub rounds_played: u32,
    pub game_duration_ms: u64,
    pub p1_cooperations: u32,
    pub p1_betrayals: u32,
    pub p2_cooperations: u32,
    pub p2_betrayals: u32,
}

impl TerminalMatch {
    /// Winner's client id, or `None` for a tie.
    fn winner_client_id(&self) -> Option<&str> {
        use std::cmp::Ordering;
        match self.p1_score.cmp(&self.p2_score) {
            Ordering::Greater => Some(&self.p1_client_id),
            Ordering::Less => Some(&self.p2_client_id),
            Ordering::Equal => None,
        }
    }
}

/// The persistence boundary, owned by the dispatcher and invoked once per
/// terminal match.
pub struct PersistenceBridge {
    repos: Repositories,
    config: PersistenceConfig,
    offline_queue: OfflineQueue,
}

impl PersistenceBridge {
    /// Construct a bridge over the given repository bundle.
    pub fn new(repos: Repositories, config: PersistenceConfig) -> Self {
        Self {
            repos,
            config,
            offline_queue: OfflineQueue::new(),
        }
    }

    /// Number of writes currently parked in the offline queue, for
    /// diagnostics.
    pub fn offline_queue_len(&self) -> usize {
        self.offline_queue.len()
    }

    /// Record a terminal match: resolve both user ids first, then, only
    /// if *both* resolve to a persistent user (§4.7: "if both resolve"),
    /// write `game_history` plus both sides' `user_stats`. A guest on
    /// either side (or a resolution failure) skips every write.
    pub async fn record_terminal_match(&self, m: TerminalMatch) {
        let winner = m.winner_client_id().map(|s| s.to_string());

        let p1_user = self.resolve_user(&m, &m.p1_client_id).await;
        let p2_user = self.resolve_user(&m, &m.p2_client_id).await;
        let (Some(p1_user), Some(p2_user)) = (p1_user, p2_user) else {
            return;
        };

        self.record_side(&m, &p1_user, m.p1_score, m.p1_cooperations, m.p1_betrayals, winner.as_deref() == Some(&m.p1_client_id), winner.is_none())
            .await;
        self.record_side(&m, &p2_user, m.p2_score, m.p2_cooperations, m.p2_betrayals, winner.as_deref() == Some(&m.p2_client_id), winner.is_none())
            .await;

        let winner_user = match winner.as_deref() {
            Some(id) if id == m.p1_client_id => Some(p1_user.clone()),
            Some(id) if id == m.p2_client_id => Some(p2_user.clone()),
            _ => None,
        };
        self.write_game_history(&m, p1_user, p2_user, winner_user).await;
    }

    /// Resolve `client_id` to a persistent user id, or `None` for guests
    /// or an unresolvable/failed lookup.
    async fn resolve_user(&self, m: &TerminalMatch, client_id: &str) -> Option<String> {
        if Player::is_guest(client_id) {
            return None;
        }
        match self.with_retry(|| self.repos.sessions.resolve_user_id(client_id)).await {
            Ok(id) => id,
            Err(_) => {
                error!(match_id = %m.match_id, client_id, "could not resolve user id; skipping match write");
                None
            }
        }
    }

    async fn record_side(
        &self,
        m: &TerminalMatch,
        user_id: &str,
        score: u32,
        cooperations: u32,
        betrayals: u32,
        won: bool,
        tied: bool,
    ) {
        let existing = self.with_retry(|| self.repos.user_stats.find_by_user(user_id)).await.ok().flatten();
        let mut stats = existing.unwrap_or_else(|| UserStats::new(user_id.to_string()));
        stats.apply_match(won, tied, score, cooperations, betrayals);

        let stats_for_queue = stats.clone();
        if self.with_retry(|| self.repos.user_stats.upsert(stats.clone())).await.is_err() {
            warn!(match_id = %m.match_id, user_id, "user_stats write exhausted retries; queued offline");
            self.offline_queue.push(PendingWrite::UserStats(stats_for_queue));
        }
    }

    async fn write_game_history(&self, m: &TerminalMatch, p1_user: String, p2_user: String, winner_user: Option<String>) {
        let record = GameHistoryRecord {
            id: m.match_id.clone(),
            player1_id: p1_user,
            player2_id: p2_user,
            player1_score: m.p1_score,
            player2_score: m.p2_score,
            winner_id: winner_user,
            game_mode: "classic".into(),
            rounds_played: m.rounds_played,
            game_duration_ms: m.game_duration_ms,
            created_at: chrono::Utc::now(),
        };

        let record_for_queue = record.clone();
        if self.with_retry(|| self.repos.game_history.create(record.clone())).await.is_err() {
            warn!(match_id = %m.match_id, "game_history write exhausted retries; queued offline");
            self.offline_queue.push(PendingWrite::GameHistory(record_for_queue));
        }
    }

    /// Retry `op` with exponential backoff per `config` (§4.7: base delay,
    /// multiplier, cap, max attempts). `NotFound` is never retried.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, RepositoryError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RepositoryError>>,
    {
        let mut delay = self.config.retry_base;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(RepositoryError::NotFound) => return Err(RepositoryError::NotFound),
                Err(e @ RepositoryError::Transient(_)) => {
                    if attempt >= self.config.max_attempts {
                        return Err(e);
                    }
                    sleep(delay).await;
                    delay = (delay * self.config.retry_multiplier).min(self.config.retry_max);
                }
            }
        }
    }

    /// Drain the offline queue, retrying each parked write once. Intended
    /// to run on a periodic sweep alongside the matchmaking/session GC
    /// intervals (§4.7: "for later replay").
    pub async fn drain_offline_queue(&self) {
        let repos = self.repos.clone();
        self.offline_queue
            .drain_with(|write| {
                let repos = repos.clone();
                async move {
                    match write {
                        PendingWrite::GameHistory(record) => {
                            repos.game_history.create(record.clone()).await.map_err(|_| PendingWrite::GameHistory(record))
                        }
                        PendingWrite::UserStats(stats) => {
                            repos.user_stats.upsert(stats.clone()).await.map_err(|_| PendingWrite::UserStats(stats))
                        }
                    }
                }
            })
            .await;
    }
}

/// Convenience constructor wiring the in-memory repository doubles,
/// suitable for tests and for running without an external store
/// configured.
pub fn in_memory_bridge(config: PersistenceConfig) -> Arc<PersistenceBridge> {
    Arc::new(PersistenceBridge::new(Repositories::in_memory(), config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PersistenceConfig {
        PersistenceConfig::default()
    }

    #[tokio::test]
    async fn guest_vs_guest_match_skips_every_write() {
        let bridge = PersistenceBridge::new(Repositories::in_memory(), config());
        bridge
            .record_terminal_match(TerminalMatch {
                match_id: "m1".into(),
                p1_client_id: "guest_abc".into(),
                p2_client_id: "guest_def".into(),
                p1_score: 30,
                p2_score: 10,
                rounds_played: 10,
                game_duration_ms: 1000,
                p1_cooperations: 8,
                p1_betrayals: 2,
                p2_cooperations: 3,
                p2_betrayals: 7,
            })
            .await;
        assert_eq!(bridge.offline_queue_len(), 0);
    }

    #[tokio::test]
    async fn authenticated_match_writes_history_and_stats() {
        let repos = Repositories::in_memory();
        let bridge = PersistenceBridge::new(repos.clone(), config());
        bridge
            .record_terminal_match(TerminalMatch {
                match_id: "m1".into(),
                p1_client_id: "client-1".into(),
                p2_client_id: "client-2".into(),
                p1_score: 30,
                p2_score: 10,
                rounds_played: 10,
                game_duration_ms: 1000,
                p1_cooperations: 8,
                p1_betrayals: 2,
                p2_cooperations: 3,
                p2_betrayals: 7,
            })
            .await;

        let stats = repos.user_stats.find_by_user("user_client-1").await.unwrap().unwrap();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.total_games, 1);
    }

    #[tokio::test]
    async fn authenticated_vs_guest_match_skips_every_write() {
        let game_history = Arc::new(crate::persistence::repository::InMemoryGameHistoryRepository::new());
        let repos = Repositories {
            sessions: Arc::new(crate::persistence::repository::InMemorySessionRepository::new()),
            game_history: game_history.clone(),
            user_stats: Arc::new(crate::persistence::repository::InMemoryUserStatsRepository::new()),
        };
        let bridge = PersistenceBridge::new(repos.clone(), config());
        bridge
            .record_terminal_match(TerminalMatch {
                match_id: "m1".into(),
                p1_client_id: "client-1".into(),
                p2_client_id: "guest_def".into(),
                p1_score: 30,
                p2_score: 10,
                rounds_played: 10,
                game_duration_ms: 1000,
                p1_cooperations: 8,
                p1_betrayals: 2,
                p2_cooperations: 3,
                p2_betrayals: 7,
            })
            .await;

        assert!(repos.user_stats.find_by_user("user_client-1").await.unwrap().is_none());
        assert!(game_history.rows().is_empty());
        assert_eq!(bridge.offline_queue_len(), 0);
    }
}

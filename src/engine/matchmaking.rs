//! Matchmaking Queue (C5, §4.3)
//!
//! FIFO-with-scoring queue of solo players seeking an opponent. A
//! periodic sweep (and every `JOIN_QUEUE`) attempts to pair the two
//! oldest compatible entries. Grounded on the teacher's
//! `GameServer::matchmaking_queue` / `run_matchmaking_loop` (a
//! `Vec`-backed FIFO scanned by a background task), adapted to run
//! synchronously inside the dispatcher loop instead of its own task
//! (§5: all core-map mutation happens on one scheduling context).

use tracing::debug;

use crate::models::player::Player;
use crate::models::queue::{QueueEntry, QueuePreferences};

/// A pairing of two queue entries, ready to become a [`crate::models::match_state::Match`].
pub struct Pairing {
    pub p1: QueueEntry,
    pub p2: QueueEntry,
}

/// The open matchmaking queue.
#[derive(Default)]
pub struct MatchmakingQueue {
    entries: Vec<QueueEntry>,
}

impl MatchmakingQueue {
    /// Construct an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `player_id` currently holds a queue entry.
    pub fn contains(&self, player_id: &str) -> bool {
        self.entries.iter().any(|e| e.player_id == player_id)
    }

    /// Add a new entry to the back of the queue (§4.3: "entries ordered
    /// by join time").
    pub fn join(&mut self, player: Player, preferences: QueuePreferences) {
        self.entries.push(QueueEntry::new(player, preferences));
    }

    /// Remove `player_id`'s entry, if present. Idempotent (§5:
    /// "an explicit ... LEAVE_QUEUE is idempotent").
    pub fn leave(&mut self, player_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.player_id != player_id);
        self.entries.len() != before
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no one is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seconds `player_id` has been waiting, if queued.
    pub fn waited_seconds(&self, player_id: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| e.player_id == player_id)
            .map(|e| e.wait_seconds())
    }

    /// Remove and return every entry that has outstayed its `maxWaitTime`
    /// (§3, §4.3: default 5 min, overridable per entry).
    pub fn expire_stale(&mut self) -> Vec<QueueEntry> {
        let (expired, remaining): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|e| e.is_expired());
        self.entries = remaining;
        expired
    }

    /// Compatibility score between two entries, per §4.3's formula:
    /// `100 − max(0, |Δtrust| − tolerance)·2 + min(avgWaitSeconds, 50) −
    /// 0.5·max(0, |Δgames| − 10)`, clipped to `[0, ∞)`.
    pub fn compatibility_score(a: &QueueEntry, b: &QueueEntry) -> f64 {
        let trust_delta = (a.player.trust_score as i64 - b.player.trust_score as i64).unsigned_abs() as f64;
        let games_delta = (a.player.games_played as i64 - b.player.games_played as i64).unsigned_abs() as f64;
        let tolerance = a.preferences.trust_tolerance.min(b.preferences.trust_tolerance) as f64;
        let avg_wait = (a.wait_seconds() + b.wait_seconds()) as f64 / 2.0;

        let score = 100.0 - (trust_delta - tolerance).max(0.0) * 2.0 + avg_wait.min(50.0)
            - 0.5 * (games_delta - 10.0).max(0.0);
        score.max(0.0)
    }

    /// Attempt to pair the two oldest entries unconditionally (the basic
    /// path named in §4.3: "when ≥2 entries, the two oldest are paired
    /// unconditionally"). Returns `None` if fewer than two are queued.
    pub fn try_pair_oldest(&mut self) -> Option<Pairing> {
        if self.entries.len() < 2 {
            return None;
        }
        let p1 = self.entries.remove(0);
        let p2 = self.entries.remove(0);
        debug!(p1 = %p1.player_id, p2 = %p2.player_id, score = MatchmakingQueue::compatibility_score(&p1, &p2), "paired queue entries");
        Some(Pairing { p1, p2 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, trust: u32) -> QueueEntry {
        let mut player = Player::new(id, id);
        player.trust_score = trust;
        QueueEntry::new(player, QueuePreferences::default())
    }

    #[test]
    fn join_then_pair_oldest_removes_both() {
        let mut q = MatchmakingQueue::new();
        q.entries.push(entry("p1", 50));
        q.entries.push(entry("p2", 55));
        q.entries.push(entry("p3", 60));

        let pairing = q.try_pair_oldest().unwrap();
        assert_eq!(pairing.p1.player_id, "p1");
        assert_eq!(pairing.p2.player_id, "p2");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn leave_is_idempotent() {
        let mut q = MatchmakingQueue::new();
        q.entries.push(entry("p1", 50));
        assert!(q.leave("p1"));
        assert!(!q.leave("p1"));
    }

    #[test]
    fn compatibility_score_penalizes_large_trust_delta() {
        let a = entry("a", 50);
        let b = entry("b", 90);
        let score = MatchmakingQueue::compatibility_score(&a, &b);
        // |Δtrust|=40, tolerance=15 => penalty (40-15)*2=50; avg wait ~0.
        assert!(score < 60.0);
    }
}

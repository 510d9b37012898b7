//! Offline write queue (§4.7).
//!
//! When a terminal-match write exhausts its retry budget, the bridge
//! parks the record here instead of dropping it (§4.7: "falls back to an
//! offline queue for later replay rather than dropping the write").
//! In-process only — a restart loses whatever hasn't drained, matching
//! this crate's "no persistence of in-memory state itself" stance
//! (SPEC_FULL §3).

use std::sync::Mutex;

use crate::persistence::repository::{GameHistoryRecord, UserStats};

/// One queued write, parked after exhausting the retry budget.
pub enum PendingWrite {
    /// A `game_history` row.
    GameHistory(GameHistoryRecord),
    /// A `user_stats` upsert.
    UserStats(UserStats),
}

/// FIFO queue of writes awaiting replay.
#[derive(Default)]
pub struct OfflineQueue {
    pending: Mutex<Vec<PendingWrite>>,
}

impl OfflineQueue {
    /// Construct an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a write for later replay.
    pub fn push(&self, write: PendingWrite) {
        self.pending.lock().unwrap().push(write);
    }

    /// Number of writes currently parked.
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// True if nothing is parked.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }

    /// Drain every parked write, handing each to `f` for replay. Writes
    /// `f` reports as failed are re-queued in original order; the rest
    /// are dropped once `f` succeeds.
    pub async fn drain_with<F, Fut>(&self, mut f: F)
    where
        F: FnMut(PendingWrite) -> Fut,
        Fut: std::future::Future<Output = Result<(), PendingWrite>>,
    {
        let batch: Vec<PendingWrite> = std::mem::take(&mut *self.pending.lock().unwrap());
        for write in batch {
            if let Err(failed) = f(write).await {
                self.pending.lock().unwrap().push(failed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_record() -> GameHistoryRecord {
        GameHistoryRecord {
            id: "m1".into(),
            player1_id: "u1".into(),
            player2_id: "u2".into(),
            player1_score: 10,
            player2_score: 5,
            winner_id: Some("u1".into()),
            game_mode: "classic".into(),
            rounds_played: 10,
            game_duration_ms: 500,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn push_then_len() {
        let q = OfflineQueue::new();
        assert!(q.is_empty());
        q.push(PendingWrite::GameHistory(sample_record()));
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn drain_with_success_empties_queue() {
        let q = OfflineQueue::new();
        q.push(PendingWrite::GameHistory(sample_record()));
        q.drain_with(|_write| async { Ok(()) }).await;
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn drain_with_failure_requeues() {
        let q = OfflineQueue::new();
        q.push(PendingWrite::GameHistory(sample_record()));
        q.drain_with(|write| async { Err(write) }).await;
        assert_eq!(q.len(), 1);
    }
}

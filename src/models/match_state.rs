//! Match engine state (§3, C8).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::player::Player;

/// A round decision (§4.5 payoff matrix axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Cooperate.
    Cooperate,
    /// Betray.
    Betray,
}

impl Decision {
    /// Score this decision earns against an opponent's decision, per the
    /// payoff matrix in §4.5.
    pub fn score_against(self, opponent: Decision) -> u32 {
        match (self, opponent) {
            (Decision::Cooperate, Decision::Cooperate) => 3,
            (Decision::Cooperate, Decision::Betray) => 0,
            (Decision::Betray, Decision::Cooperate) => 5,
            (Decision::Betray, Decision::Betray) => 1,
        }
    }
}

/// One endpoint (side) of a match (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEndpoint {
    /// Client id of the connection currently bound to this side (may
    /// change across reconnects; tournament matches additionally carry a
    /// stable tournament-player id via the alias map in C2).
    pub client_id: String,
    /// Player snapshot at match creation time.
    pub player: Player,
    /// True if this side is currently disconnected (grace period active).
    pub disconnected: bool,
    /// Bumped every time this endpoint's disconnected flag changes.
    /// A reconnection-grace timer captures the epoch at arm time; if it
    /// fires against a stale epoch the player already reconnected and the
    /// firing is a no-op (§5 Cancellation — distinct from `Match::generation`,
    /// which governs round/reversal timers and must NOT change on a plain
    /// disconnect since "disconnection cancels neither the match nor its
    /// timers").
    pub reconnect_epoch: u64,
}

impl MatchEndpoint {
    /// Construct a freshly-connected endpoint.
    pub fn new(client_id: impl Into<String>, player: Player) -> Self {
        Self {
            client_id: client_id.into(),
            player,
            disconnected: false,
            reconnect_epoch: 0,
        }
    }
}

/// Per-round decisions and post-scoring results (§3).
///
/// Decisions for a round are monotonic pre-reversal; during
/// `REVERSAL_SELECTION` they may mutate, after which scores and match
/// totals are fully recomputed from scratch (never by incremental delta
/// once more than one field has changed — recomputation always replays
/// every round).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundDecisions {
    /// Player 1's decision, once submitted.
    pub p1_decision: Option<Decision>,
    /// Player 2's decision, once submitted.
    pub p2_decision: Option<Decision>,
    /// Player 1's score for this round, set once both decisions are in.
    pub p1_score: u32,
    /// Player 2's score for this round, set once both decisions are in.
    pub p2_score: u32,
}

impl RoundDecisions {
    /// True once both sides have submitted a decision for this round.
    pub fn is_complete(&self) -> bool {
        self.p1_decision.is_some() && self.p2_decision.is_some()
    }

    /// Score this round from whatever decisions are present, defaulting
    /// missing decisions to `COOPERATE` (§4.5 timeout policy). Idempotent:
    /// safe to call repeatedly, including during reversal recomputation.
    pub fn score(&mut self) {
        let p1 = self.p1_decision.unwrap_or(Decision::Cooperate);
        let p2 = self.p2_decision.unwrap_or(Decision::Cooperate);
        self.p1_score = p1.score_against(p2);
        self.p2_score = p2.score_against(p1);
    }
}

/// Match engine state machine (§3).
///
/// `SHOWING_RESULTS` can transition only to `WAITING_FOR_DECISIONS` (next
/// round) or `AWAITING_REVERSAL_RESPONSES` (terminal round).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    /// Waiting for both endpoints to be bound (transient, matchmaking/lobby
    /// hand-off).
    WaitingForPlayers,
    /// Waiting for `GAME_DECISION` from both sides for the current round.
    WaitingForDecisions,
    /// Displaying `ROUND_RESULT` before advancing.
    ShowingResults,
    /// Terminal round scored; waiting for both
    /// `DECISION_REVERSAL_RESPONSE`s.
    AwaitingReversalResponses,
    /// Both sides accepted reversal; decisions may be mutated.
    ReversalSelection,
    /// Match fully concluded; retained briefly for in-flight viewers then
    /// purged (§4.5 post-match retention).
    Completed,
}

/// Which side of the reversal protocol has responded (§4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReversalResponses {
    /// Player 1's accept/decline, if responded.
    pub p1: Option<bool>,
    /// Player 2's accept/decline, if responded.
    pub p2: Option<bool>,
}

impl ReversalResponses {
    /// True once both sides have responded.
    pub fn both_responded(&self) -> bool {
        self.p1.is_some() && self.p2.is_some()
    }

    /// True if both sides responded and both accepted.
    pub fn both_accepted(&self) -> bool {
        self.p1 == Some(true) && self.p2 == Some(true)
    }

    /// True if either side explicitly declined.
    pub fn either_declined(&self) -> bool {
        self.p1 == Some(false) || self.p2 == Some(false)
    }
}

/// Named timer kinds an owning `Match` may have exactly one of armed at a
/// time (§3 invariant: "exactly one active timeout at a time").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchTimerKind {
    /// Round decision timeout.
    Round,
    /// Reversal acceptance window.
    Reversal,
}

/// A live match (§3, C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    /// Match id.
    pub id: String,
    /// Player 1's endpoint.
    pub p1: MatchEndpoint,
    /// Player 2's endpoint.
    pub p2: MatchEndpoint,
    /// 0-based current round index.
    pub current_round: u32,
    /// Configured number of rounds (default 10).
    pub max_rounds: u32,
    /// Round index → decisions/scores. Populated as rounds are scored.
    pub rounds: BTreeMap<u32, RoundDecisions>,
    /// Running cumulative score for player 1.
    pub p1_score: u32,
    /// Running cumulative score for player 2.
    pub p2_score: u32,
    /// Current state.
    pub state: MatchState,
    /// Which timer kind, if any, is currently armed.
    pub active_timer: Option<MatchTimerKind>,
    /// Monotonic counter bumped on every state transition; used to
    /// recognize stale timer firings as no-ops (§5 Cancellation).
    pub generation: u64,
    /// Reversal protocol responses.
    pub reversal_responses: ReversalResponses,
    /// True once a persistence write has been performed for this match,
    /// preventing double-writes across the reversal/timeout paths (§4.7).
    pub results_saved: bool,
    /// Tournament id, if this match is part of a bracket.
    pub tournament_id: Option<String>,
    /// Back-pointer to the bracket slot id this match updates on
    /// completion (§3 "Match.tournamentMatch").
    pub tournament_match_id: Option<String>,
    /// True while running a best-of-3 single-elimination tiebreaker.
    pub is_tiebreaker: bool,
    /// True if this tiebreaker block has already been started once (a
    /// match may only spawn one tiebreaker block — §4.5).
    pub tiebreaker_started: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Match {
    /// Construct a new match between two endpoints.
    pub fn new(
        id: impl Into<String>,
        p1: MatchEndpoint,
        p2: MatchEndpoint,
        max_rounds: u32,
        tournament_id: Option<String>,
        tournament_match_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            p1,
            p2,
            current_round: 0,
            max_rounds,
            rounds: BTreeMap::new(),
            p1_score: 0,
            p2_score: 0,
            state: MatchState::WaitingForDecisions,
            active_timer: Some(MatchTimerKind::Round),
            generation: 0,
            reversal_responses: ReversalResponses::default(),
            results_saved: false,
            tournament_id,
            tournament_match_id,
            is_tiebreaker: false,
            tiebreaker_started: false,
            created_at: Utc::now(),
        }
    }

    /// True if this match is part of a tournament bracket.
    pub fn is_tournament_match(&self) -> bool {
        self.tournament_id.is_some()
    }

    /// Bump the generation counter, invalidating any previously-armed
    /// timer firing for this match.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Recompute `p1_score`/`p2_score` as the sum of all per-round scores
    /// up to and including `current_round`'s completed rounds. Used after
    /// a reversal `DECISION_CHANGE_REQUEST` mutates historical decisions
    /// (§8: "recomputing per-round scores from the payoff matrix over
    /// stored decisions yields the same match totals as the running sum").
    pub fn recompute_totals(&mut self) {
        let mut p1_total = 0;
        let mut p2_total = 0;
        for round in self.rounds.values_mut() {
            round.score();
            p1_total += round.p1_score;
            p2_total += round.p2_score;
        }
        self.p1_score = p1_total;
        self.p2_score = p2_total;
    }

    /// Rounds remaining after (and including) the given round index,
    /// counting from `current_round` to `max_rounds - 1` inclusive. Used
    /// for forfeit bonus calculation (§4.5: "3 points x remaining rounds").
    pub fn remaining_rounds_from(&self, round_index: u32) -> u32 {
        self.max_rounds.saturating_sub(round_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str) -> MatchEndpoint {
        MatchEndpoint::new(id, Player::new(id, id))
    }

    #[test]
    fn payoff_matrix_matches_spec_table() {
        assert_eq!(Decision::Cooperate.score_against(Decision::Cooperate), 3);
        assert_eq!(Decision::Cooperate.score_against(Decision::Betray), 0);
        assert_eq!(Decision::Betray.score_against(Decision::Cooperate), 5);
        assert_eq!(Decision::Betray.score_against(Decision::Betray), 1);
    }

    #[test]
    fn missing_decision_defaults_to_cooperate_on_score() {
        let mut round = RoundDecisions {
            p1_decision: Some(Decision::Betray),
            p2_decision: None,
            p1_score: 0,
            p2_score: 0,
        };
        round.score();
        assert_eq!(round.p1_score, 5);
        assert_eq!(round.p2_score, 0);
    }

    #[test]
    fn recompute_totals_matches_running_sum() {
        let mut m = Match::new("m1", endpoint("p1"), endpoint("p2"), 3, None, None);
        m.rounds.insert(0, RoundDecisions {
            p1_decision: Some(Decision::Cooperate),
            p2_decision: Some(Decision::Betray),
            p1_score: 0,
            p2_score: 0,
        });
        m.rounds.insert(1, RoundDecisions {
            p1_decision: Some(Decision::Betray),
            p2_decision: Some(Decision::Betray),
            p1_score: 0,
            p2_score: 0,
        });
        m.recompute_totals();
        assert_eq!(m.p1_score, 0 + 1);
        assert_eq!(m.p2_score, 5 + 1);
    }
}

//! Match Engine (C8, §4.5)
//!
//! Owns every live [`Match`] and implements its state machine: round
//! lifecycle, decision collection, scoring, timeouts, the decision-
//! reversal protocol, forfeit, and tiebreaker. Methods are pure state
//! transitions over the owned map; callers (the dispatcher) translate
//! returned outcomes into outbound messages and arm/cancel timers, per
//! the single-scheduling-context model in §5.

use std::collections::HashMap;

use rand::Rng;
use tracing::warn;

use crate::error::RequestError;
use crate::models::match_state::{Decision, Match, MatchEndpoint, MatchState, MatchTimerKind, RoundDecisions};

/// Which side of a match a client id resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    P1,
    P2,
}

/// Outcome of submitting (or timing out) a round's decisions.
pub enum RoundOutcome {
    /// Only one side has decided so far; nothing else to do.
    Waiting,
    /// Both sides decided; the round was scored. If `match_over` the
    /// engine has moved to `AWAITING_REVERSAL_RESPONSES` after the
    /// results pause — the caller should run `GAME_OVER`/terminal logic
    /// once the results-display timer also elapses (§4.5: "SHOWING_RESULTS
    /// can transition only to WAITING_FOR_DECISIONS or
    /// AWAITING_REVERSAL_RESPONSES").
    RoundScored { round: u32, match_over: bool },
}

/// Outcome of the results-display pause elapsing.
pub enum AdvanceOutcome {
    /// A new round has begun.
    NextRound { round: u32 },
    /// The match has reached `AWAITING_REVERSAL_RESPONSES`.
    AwaitingReversal,
}

/// Outcome of a `DECISION_REVERSAL_RESPONSE` or reversal-window timeout.
pub enum ReversalOutcome {
    /// Only one side has responded so far.
    Waiting,
    /// Both sides accepted; now in `REVERSAL_SELECTION`.
    Approved,
    /// Either side declined, or the window elapsed with no full
    /// acceptance; the match is now finalized (`COMPLETED`).
    Rejected,
}

/// Outcome of a `DECISION_CHANGES_COMPLETE` signal.
pub enum CompleteOutcome {
    /// Only one side has signaled completion so far.
    Waiting,
    /// Both sides signaled; scores are final and the match is `COMPLETED`.
    BothComplete,
}

/// Computed forfeit settlement.
pub struct ForfeitSettlement {
    pub winner_client_id: String,
    pub loser_client_id: String,
    pub winner_score: u32,
    pub loser_score: u32,
}

/// The live match table.
#[derive(Default)]
pub struct MatchEngine {
    matches: HashMap<String, Match>,
    /// Per-match `DECISION_CHANGES_COMPLETE` flags (p1, p2), tracked
    /// separately from [`Match`] since they apply only during
    /// `REVERSAL_SELECTION` and reset per reversal cycle.
    reversal_complete: HashMap<String, (bool, bool)>,
}

impl MatchEngine {
    /// Construct an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly-created match.
    pub fn insert(&mut self, m: Match) {
        self.matches.insert(m.id.clone(), m);
    }

    /// Look up a match by id.
    pub fn get(&self, match_id: &str) -> Option<&Match> {
        self.matches.get(match_id)
    }

    /// Look up a match by id, mutably.
    pub fn get_mut(&mut self, match_id: &str) -> Option<&mut Match> {
        self.matches.get_mut(match_id)
    }

    /// Remove a match entirely (post-retention purge, §4.5: "retained for
    /// 30 s after terminal statistics ... then deleted").
    pub fn remove(&mut self, match_id: &str) -> Option<Match> {
        self.reversal_complete.remove(match_id);
        self.matches.remove(match_id)
    }

    /// Resolve which side `client_id` plays in a match.
    pub fn side_of(&self, match_id: &str, client_id: &str) -> Option<Side> {
        let m = self.matches.get(match_id)?;
        if m.p1.client_id == client_id {
            Some(Side::P1)
        } else if m.p2.client_id == client_id {
            Some(Side::P2)
        } else {
            None
        }
    }

    /// Rebind a side's client id after a reconnect (the tournament-player
    /// id in `player.id` stays stable; only the transport-level client id
    /// changes, §4.2).
    pub fn rebind_client_id(&mut self, match_id: &str, side: Side, new_client_id: impl Into<String>) {
        if let Some(m) = self.matches.get_mut(match_id) {
            let endpoint = match side {
                Side::P1 => &mut m.p1,
                Side::P2 => &mut m.p2,
            };
            endpoint.client_id = new_client_id.into();
            endpoint.disconnected = false;
            endpoint.reconnect_epoch += 1;
        }
    }

    /// Mark a side disconnected and return the reconnect epoch the caller
    /// should stamp onto the reconnection-grace timer it arms. If the
    /// firing's epoch no longer matches [`reconnect_epoch_of`] when it
    /// fires, the player already reconnected and the firing is a no-op.
    pub fn mark_disconnected(&mut self, match_id: &str, side: Side) -> Option<u64> {
        let m = self.matches.get_mut(match_id)?;
        let endpoint = match side {
            Side::P1 => &mut m.p1,
            Side::P2 => &mut m.p2,
        };
        endpoint.disconnected = true;
        endpoint.reconnect_epoch += 1;
        Some(endpoint.reconnect_epoch)
    }

    /// Current reconnect epoch for a side, for comparison against a
    /// previously-armed reconnection-grace timer firing.
    pub fn reconnect_epoch_of(&self, match_id: &str, side: Side) -> Option<u64> {
        let m = self.matches.get(match_id)?;
        Some(match side {
            Side::P1 => m.p1.reconnect_epoch,
            Side::P2 => m.p2.reconnect_epoch,
        })
    }

    /// Submit a decision for `side` in the current round. Late decisions
    /// (round mismatch, wrong state) are rejected with `WrongPhase`;
    /// duplicate decisions for an already-decided side are
    /// `AlreadyDecided` (§5 ordering guarantees).
    pub fn submit_decision(
        &mut self,
        match_id: &str,
        side: Side,
        round: u32,
        decision: Decision,
    ) -> Result<RoundOutcome, RequestError> {
        let m = self.matches.get_mut(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.state != MatchState::WaitingForDecisions || m.current_round != round {
            return Err(RequestError::WrongPhase);
        }
        let entry = m.rounds.entry(round).or_default();
        let slot = match side {
            Side::P1 => &mut entry.p1_decision,
            Side::P2 => &mut entry.p2_decision,
        };
        if slot.is_some() {
            return Err(RequestError::AlreadyDecided);
        }
        *slot = Some(decision);

        if entry.is_complete() {
            Ok(self.finish_round(match_id))
        } else {
            Ok(RoundOutcome::Waiting)
        }
    }

    /// Force-score the current round on timeout, defaulting any missing
    /// decision to `COOPERATE` (§4.5 timeout policy). `generation` must
    /// match the match's current generation or the firing is stale.
    pub fn round_timeout(&mut self, match_id: &str, generation: u64) -> Result<RoundOutcome, RequestError> {
        let m = self.matches.get(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.generation != generation || m.state != MatchState::WaitingForDecisions {
            return Ok(RoundOutcome::Waiting);
        }
        Ok(self.finish_round(match_id))
    }

    fn finish_round(&mut self, match_id: &str) -> RoundOutcome {
        let m = self.matches.get_mut(match_id).expect("match exists");
        let round = m.current_round;
        let entry = m.rounds.entry(round).or_default();
        entry.score();
        m.p1_score += entry.p1_score;
        m.p2_score += entry.p2_score;
        m.state = MatchState::ShowingResults;
        m.active_timer = Some(MatchTimerKind::Round);
        m.bump_generation();

        let match_over = round + 1 >= m.max_rounds;
        RoundOutcome::RoundScored { round, match_over }
    }

    /// Advance past the `SHOWING_RESULTS` display pause: starts the next
    /// round, or opens the reversal window if this was the terminal round.
    pub fn advance_after_results(&mut self, match_id: &str, generation: u64) -> Result<AdvanceOutcome, RequestError> {
        let m = self.matches.get_mut(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.generation != generation || m.state != MatchState::ShowingResults {
            return Err(RequestError::WrongPhase);
        }
        if m.current_round + 1 >= m.max_rounds {
            m.state = MatchState::AwaitingReversalResponses;
            m.active_timer = Some(MatchTimerKind::Reversal);
            m.bump_generation();
            Ok(AdvanceOutcome::AwaitingReversal)
        } else {
            m.current_round += 1;
            m.state = MatchState::WaitingForDecisions;
            m.active_timer = Some(MatchTimerKind::Round);
            m.bump_generation();
            Ok(AdvanceOutcome::NextRound { round: m.current_round })
        }
    }

    /// Record a reversal accept/decline. Duplicate responses after both
    /// sides have already responded are a no-op (§8 round-trip property).
    pub fn reversal_response(&mut self, match_id: &str, side: Side, accept: bool) -> Result<ReversalOutcome, RequestError> {
        let m = self.matches.get_mut(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.state != MatchState::AwaitingReversalResponses {
            return Err(RequestError::WrongPhase);
        }
        if m.reversal_responses.both_responded() {
            return Ok(ReversalOutcome::Waiting);
        }
        match side {
            Side::P1 => m.reversal_responses.p1 = Some(accept),
            Side::P2 => m.reversal_responses.p2 = Some(accept),
        }

        if m.reversal_responses.either_declined() {
            m.state = MatchState::Completed;
            m.active_timer = None;
            m.bump_generation();
            return Ok(ReversalOutcome::Rejected);
        }
        if m.reversal_responses.both_accepted() {
            m.state = MatchState::ReversalSelection;
            m.active_timer = None;
            m.bump_generation();
            self.reversal_complete.insert(match_id.to_string(), (false, false));
            return Ok(ReversalOutcome::Approved);
        }
        Ok(ReversalOutcome::Waiting)
    }

    /// The reversal window elapsed with fewer than two acceptances on
    /// file; finalizes the match exactly as an explicit decline would.
    pub fn reversal_timeout(&mut self, match_id: &str, generation: u64) -> Result<ReversalOutcome, RequestError> {
        let m = self.matches.get_mut(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.generation != generation || m.state != MatchState::AwaitingReversalResponses {
            return Ok(ReversalOutcome::Waiting);
        }
        m.state = MatchState::Completed;
        m.active_timer = None;
        m.bump_generation();
        Ok(ReversalOutcome::Rejected)
    }

    /// Mutate a historical round's decision during `REVERSAL_SELECTION`
    /// and fully recompute match totals (§4.5: "not incremental delta").
    pub fn decision_change_request(
        &mut self,
        match_id: &str,
        side: Side,
        round_number: u32,
        new_decision: Decision,
    ) -> Result<(), RequestError> {
        let m = self.matches.get_mut(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.state != MatchState::ReversalSelection {
            return Err(RequestError::WrongPhase);
        }
        let entry = m.rounds.entry(round_number).or_insert_with(RoundDecisions::default);
        match side {
            Side::P1 => entry.p1_decision = Some(new_decision),
            Side::P2 => entry.p2_decision = Some(new_decision),
        }
        m.recompute_totals();
        Ok(())
    }

    /// Signal that `side` is done mutating decisions. Once both sides
    /// have signaled, the match finalizes (§9 Open Question resolution:
    /// silent-until-complete broadcasting).
    pub fn decision_changes_complete(&mut self, match_id: &str, side: Side) -> Result<CompleteOutcome, RequestError> {
        let m = self.matches.get(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.state != MatchState::ReversalSelection {
            return Err(RequestError::WrongPhase);
        }
        let flags = self.reversal_complete.entry(match_id.to_string()).or_insert((false, false));
        match side {
            Side::P1 => flags.0 = true,
            Side::P2 => flags.1 = true,
        }
        if flags.0 && flags.1 {
            let m = self.matches.get_mut(match_id).unwrap();
            m.state = MatchState::Completed;
            m.bump_generation();
            self.reversal_complete.remove(match_id);
            Ok(CompleteOutcome::BothComplete)
        } else {
            Ok(CompleteOutcome::Waiting)
        }
    }

    /// Settle a voluntary or timeout-triggered forfeit: the non-forfeiter
    /// is awarded `3 × remainingRounds` added to their current cumulative
    /// score (§4.5, GLOSSARY "Forfeit bonus").
    pub fn forfeit(&mut self, match_id: &str, forfeiting_side: Side) -> Result<ForfeitSettlement, RequestError> {
        let m = self.matches.get_mut(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.state == MatchState::Completed {
            return Err(RequestError::WrongPhase);
        }
        let remaining = m.remaining_rounds_from(m.current_round);
        let bonus = 3 * remaining;

        let settlement = match forfeiting_side {
            Side::P1 => {
                m.p2_score += bonus;
                ForfeitSettlement {
                    winner_client_id: m.p2.client_id.clone(),
                    loser_client_id: m.p1.client_id.clone(),
                    winner_score: m.p2_score,
                    loser_score: m.p1_score,
                }
            }
            Side::P2 => {
                m.p1_score += bonus;
                ForfeitSettlement {
                    winner_client_id: m.p1.client_id.clone(),
                    loser_client_id: m.p2.client_id.clone(),
                    winner_score: m.p1_score,
                    loser_score: m.p2_score,
                }
            }
        };
        m.state = MatchState::Completed;
        m.active_timer = None;
        m.bump_generation();
        Ok(settlement)
    }

    /// True if the match is tied at its current (post-reversal) totals.
    pub fn is_tied(&self, match_id: &str) -> Option<bool> {
        self.matches.get(match_id).map(|m| m.p1_score == m.p2_score)
    }

    /// Winner's client id by cumulative score, or `None` for a tie.
    pub fn winner_client_id(&self, match_id: &str) -> Option<Option<String>> {
        self.matches.get(match_id).map(|m| {
            use std::cmp::Ordering;
            match m.p1_score.cmp(&m.p2_score) {
                Ordering::Greater => Some(m.p1.client_id.clone()),
                Ordering::Less => Some(m.p2.client_id.clone()),
                Ordering::Equal => None,
            }
        })
    }

    /// Reset a tied single-elimination match into a best-of-3 tiebreaker
    /// block (§4.5). May only be invoked once per match.
    pub fn start_tiebreaker(&mut self, match_id: &str) -> Result<(), RequestError> {
        let m = self.matches.get_mut(match_id).ok_or(RequestError::MatchNotFound)?;
        if m.tiebreaker_started {
            return Err(RequestError::WrongPhase);
        }
        m.rounds.clear();
        m.current_round = 0;
        m.max_rounds = 3;
        m.p1_score = 0;
        m.p2_score = 0;
        m.state = MatchState::WaitingForDecisions;
        m.active_timer = Some(MatchTimerKind::Round);
        m.reversal_responses = Default::default();
        m.is_tiebreaker = true;
        m.tiebreaker_started = true;
        m.bump_generation();
        Ok(())
    }

    /// If the tiebreaker block itself ends tied, pick a winner uniformly
    /// at random (§4.5).
    pub fn resolve_tiebreaker_tie_randomly(&self, match_id: &str) -> Option<String> {
        let m = self.matches.get(match_id)?;
        let mut rng = rand::thread_rng();
        Some(if rng.gen_bool(0.5) { m.p1.client_id.clone() } else { m.p2.client_id.clone() })
    }

    /// Find a disconnected side across all live matches matching either its
    /// stable player id (tournament-player alias) or its last-known client
    /// id, used by REGISTER's reconnection sweep (§4.2).
    pub fn find_disconnected_side(&self, player_id: Option<&str>, client_id: &str) -> Option<(String, Side)> {
        for (id, m) in &self.matches {
            if m.p1.disconnected && (m.p1.client_id == client_id || player_id == Some(m.p1.player.id.as_str())) {
                return Some((id.clone(), Side::P1));
            }
            if m.p2.disconnected && (m.p2.client_id == client_id || player_id == Some(m.p2.player.id.as_str())) {
                return Some((id.clone(), Side::P2));
            }
        }
        None
    }

    /// Find the live, not-yet-completed match `client_id` currently
    /// participates in, used by `FORFEIT_MATCH` (no `matchId` on the wire)
    /// and by transport-level disconnect handling.
    pub fn find_active_match_for_client(&self, client_id: &str) -> Option<String> {
        self.matches
            .iter()
            .find(|(_, m)| m.state != MatchState::Completed && (m.p1.client_id == client_id || m.p2.client_id == client_id))
            .map(|(id, _)| id.clone())
    }

    /// Mark a match's persistence write as done, preventing double-writes
    /// across the reversal/timeout paths (§4.7).
    pub fn mark_results_saved(&mut self, match_id: &str) {
        if let Some(m) = self.matches.get_mut(match_id) {
            if m.results_saved {
                warn!(match_id, "results already saved; ignoring duplicate save");
            }
            m.results_saved = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::player::Player;

    fn new_match(id: &str, max_rounds: u32) -> Match {
        Match::new(
            id,
            MatchEndpoint::new("c1", Player::new("c1", "Alice")),
            MatchEndpoint::new("c2", Player::new("c2", "Bob")),
            max_rounds,
            None,
            None,
        )
    }

    #[test]
    fn both_cooperate_scores_three_each() {
        let mut engine = MatchEngine::new();
        engine.insert(new_match("m1", 1));
        engine.submit_decision("m1", Side::P1, 0, Decision::Cooperate).unwrap();
        let outcome = engine.submit_decision("m1", Side::P2, 0, Decision::Cooperate).unwrap();
        assert!(matches!(outcome, RoundOutcome::RoundScored { round: 0, match_over: true }));
        let m = engine.get("m1").unwrap();
        assert_eq!(m.p1_score, 3);
        assert_eq!(m.p2_score, 3);
    }

    #[test]
    fn duplicate_decision_rejected() {
        let mut engine = MatchEngine::new();
        engine.insert(new_match("m1", 10));
        engine.submit_decision("m1", Side::P1, 0, Decision::Cooperate).unwrap();
        assert!(matches!(
            engine.submit_decision("m1", Side::P1, 0, Decision::Betray),
            Err(RequestError::AlreadyDecided)
        ));
    }

    #[test]
    fn round_timeout_defaults_missing_decision_to_cooperate() {
        let mut engine = MatchEngine::new();
        engine.insert(new_match("m1", 10));
        engine.submit_decision("m1", Side::P1, 0, Decision::Betray).unwrap();
        let generation = engine.get("m1").unwrap().generation;
        engine.round_timeout("m1", generation).unwrap();
        let m = engine.get("m1").unwrap();
        assert_eq!(m.p1_score, 5);
        assert_eq!(m.p2_score, 0);
    }

    #[test]
    fn stale_timeout_generation_is_noop() {
        let mut engine = MatchEngine::new();
        engine.insert(new_match("m1", 10));
        let stale_generation = engine.get("m1").unwrap().generation + 99;
        let outcome = engine.round_timeout("m1", stale_generation).unwrap();
        assert!(matches!(outcome, RoundOutcome::Waiting));
    }

    #[test]
    fn forfeit_awards_bonus_for_remaining_rounds() {
        let mut engine = MatchEngine::new();
        let mut m = new_match("m1", 10);
        m.current_round = 4;
        m.p1_score = 7;
        m.p2_score = 9;
        engine.insert(m);
        let settlement = engine.forfeit("m1", Side::P1).unwrap();
        assert_eq!(settlement.winner_score, 9 + 18);
        assert_eq!(settlement.winner_client_id, "c2");
    }

    #[test]
    fn duplicate_reversal_response_after_both_responded_is_noop() {
        let mut engine = MatchEngine::new();
        let mut m = new_match("m1", 1);
        m.state = MatchState::AwaitingReversalResponses;
        engine.insert(m);
        engine.reversal_response("m1", Side::P1, true).unwrap();
        let outcome = engine.reversal_response("m1", Side::P2, false).unwrap();
        assert!(matches!(outcome, ReversalOutcome::Rejected));
        let outcome = engine.reversal_response("m1", Side::P1, true).unwrap();
        assert!(matches!(outcome, ReversalOutcome::Waiting));
    }

    #[test]
    fn decision_change_recomputes_totals_from_scratch() {
        let mut engine = MatchEngine::new();
        let mut m = new_match("m1", 2);
        m.rounds.insert(0, RoundDecisions { p1_decision: Some(Decision::Betray), p2_decision: Some(Decision::Cooperate), p1_score: 5, p2_score: 0 });
        m.p1_score = 5;
        m.p2_score = 0;
        m.state = MatchState::ReversalSelection;
        engine.insert(m);

        engine.decision_change_request("m1", Side::P1, 0, Decision::Cooperate).unwrap();
        let m = engine.get("m1").unwrap();
        assert_eq!(m.p1_score, 3);
        assert_eq!(m.p2_score, 3);
    }

    #[test]
    fn both_complete_finalizes_match() {
        let mut engine = MatchEngine::new();
        let mut m = new_match("m1", 1);
        m.state = MatchState::ReversalSelection;
        engine.insert(m);
        let outcome = engine.decision_changes_complete("m1", Side::P1).unwrap();
        assert!(matches!(outcome, CompleteOutcome::Waiting));
        let outcome = engine.decision_changes_complete("m1", Side::P2).unwrap();
        assert!(matches!(outcome, CompleteOutcome::BothComplete));
        assert_eq!(engine.get("m1").unwrap().state, MatchState::Completed);
    }
}

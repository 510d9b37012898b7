//! Tournament Engine (C9, §4.6)
//!
//! Bracket generation and progression for the three supported formats.
//! Single/double elimination size-validate to {4, 8, 16}; round robin
//! accepts any count in [4, 16]. Grounded on the teacher's registry-by-id
//! style (`LobbyManager`, `MatchEngine`) generalized to a bracket
//! structure, with round-robin scheduling borrowed from the circle-method
//! convention used across the pack's other tournament-scheduling example.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::error::RequestError;
use crate::models::lobby::TournamentFormat;
use crate::models::tournament::{
    Bracket, BracketMatch, BracketMatchStatus, BracketResult, BracketRound, PlayerTournamentStats, Tournament,
    TournamentStatus,
};

/// Final outcome of one bracket slot, as reported by the match engine once
/// a live match reaches a terminal state.
pub struct MatchResultInput {
    pub bracket_match_id: String,
    pub p1_id: String,
    pub p2_id: String,
    pub p1_score: u32,
    pub p2_score: u32,
    /// `None` only for a round-robin tie; every elimination format
    /// resolves a winner via the tiebreaker block before reaching here.
    pub winner_id: Option<String>,
    pub p1_cooperations: u32,
    pub p1_betrayals: u32,
    pub p2_cooperations: u32,
    pub p2_betrayals: u32,
}

/// Outcome of advancing past a completed round.
pub enum RoundAdvance {
    /// The tournament continues; these bracket slots are ready to dispatch.
    NextRound { round: u32, matches: Vec<BracketMatch> },
    /// Every round is done; rankings have been assigned.
    Completed { winner_id: String, standings: Vec<String> },
}

/// The set of all live tournaments.
#[derive(Default)]
pub struct TournamentEngine {
    tournaments: HashMap<String, Tournament>,
}

impl TournamentEngine {
    /// Construct an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate that `player_count` is legal for `format` (§4.6: elimination
    /// formats require exactly 4, 8, or 16; round robin accepts [4, 16]).
    pub fn validate_size(format: TournamentFormat, player_count: usize) -> Result<(), RequestError> {
        match format {
            TournamentFormat::SingleElimination | TournamentFormat::DoubleElimination => {
                if ![4, 8, 16].contains(&player_count) {
                    return Err(RequestError::InvalidTournamentSize);
                }
            }
            TournamentFormat::RoundRobin => {
                if !(4..=16).contains(&player_count) {
                    return Err(RequestError::InvalidTournamentSize);
                }
            }
        }
        Ok(())
    }

    /// Generate a bracket and register a new tournament. `participants` is
    /// `(player_id, display_name)` in lobby-list order.
    pub fn create(
        &mut self,
        id: impl Into<String>,
        lobby_id: impl Into<String>,
        format: TournamentFormat,
        participants: Vec<(String, String)>,
        rounds_per_match: u32,
    ) -> Result<&Tournament, RequestError> {
        Self::validate_size(format, participants.len())?;

        let players: Vec<PlayerTournamentStats> = participants
            .iter()
            .map(|(id, name)| PlayerTournamentStats::new(id.clone(), name.clone()))
            .collect();

        let ids: Vec<String> = participants.iter().map(|(id, _)| id.clone()).collect();
        let (bracket, total_rounds) = match format {
            TournamentFormat::SingleElimination => {
                let bracket = Self::generate_elimination_round0(ids);
                (bracket, (players.len() as f64).log2().ceil() as u32)
            }
            TournamentFormat::DoubleElimination => {
                let bracket = Self::generate_elimination_round0(ids);
                let winners_rounds = (players.len() as f64).log2().ceil() as u32;
                (bracket, winners_rounds + (winners_rounds - 1) + 1)
            }
            TournamentFormat::RoundRobin => Self::generate_round_robin(ids),
        };

        let id = id.into();
        let tournament = Tournament {
            id: id.clone(),
            lobby_id: lobby_id.into(),
            format,
            players,
            current_round: 1,
            total_rounds,
            status: TournamentStatus::Starting,
            start_time: chrono::Utc::now(),
            end_time: None,
            rounds_per_match,
            bracket,
        };
        self.tournaments.insert(id.clone(), tournament);
        Ok(self.tournaments.get(&id).unwrap())
    }

    /// Look up a tournament by id.
    pub fn get(&self, id: &str) -> Option<&Tournament> {
        self.tournaments.get(id)
    }

    /// Look up a tournament by id, mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Tournament> {
        self.tournaments.get_mut(id)
    }

    /// Remove a tournament from the engine (post-completion purge).
    pub fn remove(&mut self, id: &str) -> Option<Tournament> {
        self.tournaments.remove(id)
    }

    /// Mark a tournament's status `InProgress` once its first round has
    /// been dispatched.
    pub fn mark_started(&mut self, id: &str) {
        if let Some(t) = self.tournaments.get_mut(id) {
            t.status = TournamentStatus::InProgress;
        }
    }

    /// The bracket slots due for dispatch in the tournament's current
    /// round (elimination byes and round-robin BYE placeholders excluded —
    /// byes never spawn a live match).
    pub fn current_round_matches(&self, id: &str) -> Vec<BracketMatch> {
        let Some(t) = self.tournaments.get(id) else {
            return Vec::new();
        };
        let index = t.bracket_round_index();
        t.bracket
            .rounds
            .get(index)
            .map(|round| round.matches.iter().filter(|m| !m.is_bye()).cloned().collect())
            .unwrap_or_default()
    }

    fn shuffled(mut ids: Vec<String>) -> Vec<String> {
        ids.shuffle(&mut rand::thread_rng());
        ids
    }

    /// Pair a list of ids sequentially, carrying the last one forward as a
    /// bye if the count is odd (§4.6: "one entrant carried forward without
    /// a match").
    fn pair_sequential(mut ids: Vec<String>) -> (Vec<(String, String)>, Option<String>) {
        let bye = if ids.len() % 2 == 1 { ids.pop() } else { None };
        let mut pairs = Vec::new();
        let mut iter = ids.into_iter();
        while let (Some(a), Some(b)) = (iter.next(), iter.next()) {
            pairs.push((a, b));
        }
        (pairs, bye)
    }

    fn generate_elimination_round0(ids: Vec<String>) -> Bracket {
        let shuffled = Self::shuffled(ids);
        let (pairs, bye) = Self::pair_sequential(shuffled);
        let matches = pairs
            .into_iter()
            .map(|(a, b)| BracketMatch::new(Uuid::new_v4().to_string(), 0, a, Some(b)))
            .collect();
        Bracket {
            rounds: vec![BracketRound { round_number: 0, matches }],
            eliminated_players: Vec::new(),
            bye_player: bye,
            losers_bracket: None,
            losses: Default::default(),
        }
    }

    /// Circle-method round-robin schedule: N-1 rounds (N odd -> N, via a
    /// padded BYE slot), ⌊N/2⌋ matches per round, each player appearing at
    /// most once per round (§4.6).
    fn generate_round_robin(ids: Vec<String>) -> (Bracket, u32) {
        let mut slots: Vec<Option<String>> = ids.into_iter().map(Some).collect();
        if slots.len() % 2 != 0 {
            slots.push(None);
        }
        let n = slots.len();
        let rounds_count = n - 1;

        let mut rounds = Vec::with_capacity(rounds_count);
        for round_number in 0..rounds_count {
            let mut matches = Vec::new();
            for i in 0..n / 2 {
                let a = slots[i].clone();
                let b = slots[n - 1 - i].clone();
                match (a, b) {
                    (Some(x), Some(y)) => {
                        matches.push(BracketMatch::new(Uuid::new_v4().to_string(), round_number as u32, x, Some(y)));
                    }
                    (Some(x), None) | (None, Some(x)) => {
                        matches.push(BracketMatch::new(Uuid::new_v4().to_string(), round_number as u32, x, None));
                    }
                    (None, None) => {}
                }
            }
            rounds.push(BracketRound { round_number: round_number as u32, matches });
            let last = slots.pop().unwrap();
            slots.insert(1, last);
        }

        (
            Bracket {
                rounds,
                eliminated_players: Vec::new(),
                bye_player: None,
                losers_bracket: None,
                losses: Default::default(),
            },
            rounds_count as u32,
        )
    }

    /// Record a bracket slot's terminal result: updates the slot, folds
    /// the outcome into both players' stats, and (elimination formats)
    /// updates loss counts / eliminations. Returns `true` if this was the
    /// last slot of its round to complete.
    pub fn record_match_result(&mut self, tournament_id: &str, input: MatchResultInput) -> Result<bool, RequestError> {
        let t = self.tournaments.get_mut(tournament_id).ok_or(RequestError::MatchNotFound)?;

        let round_number = {
            let slot = Self::find_slot_mut(t, &input.bracket_match_id).ok_or(RequestError::MatchNotFound)?;
            slot.status = BracketMatchStatus::Completed;
            let mut scores = std::collections::BTreeMap::new();
            scores.insert(input.p1_id.clone(), input.p1_score);
            scores.insert(input.p2_id.clone(), input.p2_score);
            slot.result = Some(BracketResult {
                winner_id: input.winner_id.clone(),
                scores,
                completed_at: chrono::Utc::now(),
            });
            slot.round_number
        };

        let p1_won = input.winner_id.as_deref() == Some(input.p1_id.as_str());
        let p2_won = input.winner_id.as_deref() == Some(input.p2_id.as_str());
        if let Some(stats) = t.stats_for_mut(&input.p1_id) {
            stats.record_match(p1_won, input.p1_score, input.p1_cooperations, input.p1_betrayals);
        }
        if let Some(stats) = t.stats_for_mut(&input.p2_id) {
            stats.record_match(p2_won, input.p2_score, input.p2_cooperations, input.p2_betrayals);
        }

        match t.format {
            TournamentFormat::SingleElimination => {
                if let Some(winner) = &input.winner_id {
                    let loser = if winner == &input.p1_id { &input.p2_id } else { &input.p1_id };
                    t.bracket.eliminated_players.push(loser.clone());
                    if let Some(stats) = t.stats_for_mut(loser) {
                        stats.eliminated = true;
                    }
                }
            }
            TournamentFormat::DoubleElimination => {
                if let Some(winner) = &input.winner_id {
                    let loser = if winner == &input.p1_id { input.p2_id.clone() } else { input.p1_id.clone() };
                    let losses = t.bracket.record_loss(&loser);
                    if losses >= 2 {
                        t.bracket.eliminated_players.push(loser.clone());
                        if let Some(stats) = t.stats_for_mut(&loser) {
                            stats.eliminated = true;
                        }
                    }
                }
            }
            TournamentFormat::RoundRobin => {}
        }

        let is_winners_round = t.bracket.rounds.get(round_number as usize).map(|r| r.is_complete()).unwrap_or(false);
        let is_losers_round = t
            .bracket
            .losers_bracket
            .as_ref()
            .and_then(|lb| lb.get(round_number as usize))
            .map(|r| r.is_complete())
            .unwrap_or(false);
        Ok(is_winners_round || is_losers_round)
    }

    fn find_slot_mut<'a>(t: &'a mut Tournament, bracket_match_id: &str) -> Option<&'a mut BracketMatch> {
        for round in &mut t.bracket.rounds {
            if let Some(m) = round.matches.iter_mut().find(|m| m.id == bracket_match_id) {
                return Some(m);
            }
        }
        if let Some(losers) = &mut t.bracket.losers_bracket {
            for round in losers {
                if let Some(m) = round.matches.iter_mut().find(|m| m.id == bracket_match_id) {
                    return Some(m);
                }
            }
        }
        None
    }

    /// Advance past a just-completed round: builds the next round's slots,
    /// or finalizes the tournament with rankings assigned.
    pub fn advance_round(&mut self, tournament_id: &str) -> Result<RoundAdvance, RequestError> {
        let t = self.tournaments.get_mut(tournament_id).ok_or(RequestError::MatchNotFound)?;
        match t.format {
            TournamentFormat::SingleElimination => Self::advance_single_elimination(t),
            TournamentFormat::DoubleElimination => Self::advance_double_elimination(t),
            TournamentFormat::RoundRobin => Self::advance_round_robin(t),
        }
    }

    fn advance_single_elimination(t: &mut Tournament) -> Result<RoundAdvance, RequestError> {
        if t.surviving_player_count() <= 1 {
            return Ok(Self::finalize_with_champion(t));
        }

        let current = t.bracket.rounds.last().expect("at least one round generated");
        let mut advancing: Vec<String> = current
            .matches
            .iter()
            .filter_map(|m| m.result.as_ref().and_then(|r| r.winner_id.clone()))
            .collect();
        if let Some(bye) = t.bracket.bye_player.take() {
            advancing.insert(0, bye);
        }

        let (pairs, bye) = Self::pair_sequential(advancing);
        let round_number = t.bracket.rounds.len() as u32;
        let matches: Vec<BracketMatch> = pairs
            .into_iter()
            .map(|(a, b)| BracketMatch::new(Uuid::new_v4().to_string(), round_number, a, Some(b)))
            .collect();
        t.bracket.bye_player = bye;
        t.bracket.rounds.push(BracketRound { round_number, matches: matches.clone() });
        t.current_round += 1;
        Ok(RoundAdvance::NextRound { round: t.current_round, matches })
    }

    /// Double-elimination progression, simplified per the recorded design
    /// decision: losers rounds chain one-for-one off winners rounds
    /// (freshly-dropped losers paired with the prior losers-round
    /// survivors, bye to the first entry if odd), and the grand final is a
    /// single match between the last winners- and losers-bracket survivor
    /// with no reset bout.
    fn advance_double_elimination(t: &mut Tournament) -> Result<RoundAdvance, RequestError> {
        let winners_alive: Vec<String> = t
            .players
            .iter()
            .filter(|p| !p.eliminated && t.bracket.losses.get(&p.player_id).copied().unwrap_or(0) == 0)
            .map(|p| p.player_id.clone())
            .collect();
        let losers_alive: Vec<String> = t
            .players
            .iter()
            .filter(|p| !p.eliminated && t.bracket.losses.get(&p.player_id).copied().unwrap_or(0) == 1)
            .map(|p| p.player_id.clone())
            .collect();

        if winners_alive.len() <= 1 && losers_alive.len() <= 1 {
            return Ok(Self::finalize_with_champion(t));
        }

        // Grand final: exactly one survivor on each side and no further
        // winners round pending.
        if winners_alive.len() == 1 && losers_alive.len() == 1 {
            let round_number = t.bracket.rounds.len() as u32;
            let m = BracketMatch::new(Uuid::new_v4().to_string(), round_number, winners_alive[0].clone(), Some(losers_alive[0].clone()));
            t.bracket.rounds.push(BracketRound { round_number, matches: vec![m.clone()] });
            t.current_round += 1;
            return Ok(RoundAdvance::NextRound { round: t.current_round, matches: vec![m] });
        }

        let current = t.bracket.rounds.last().expect("at least one round generated");
        let mut winners_advancing: Vec<String> = current
            .matches
            .iter()
            .filter_map(|m| m.result.as_ref().and_then(|r| r.winner_id.clone()))
            .collect();
        if let Some(bye) = t.bracket.bye_player.take() {
            winners_advancing.insert(0, bye);
        }
        let dropped: Vec<String> = current
            .matches
            .iter()
            .filter_map(|m| {
                let result = m.result.as_ref()?;
                let winner = result.winner_id.as_ref()?;
                if winner == m.player1_id.as_ref().unwrap() {
                    m.player2_id.clone()
                } else {
                    m.player1_id.clone()
                }
            })
            .collect();

        let (winners_pairs, winners_bye) = Self::pair_sequential(winners_advancing);
        let winners_round_number = t.bracket.rounds.len() as u32;
        let mut next_matches: Vec<BracketMatch> = winners_pairs
            .into_iter()
            .map(|(a, b)| BracketMatch::new(Uuid::new_v4().to_string(), winners_round_number, a, Some(b)))
            .collect();
        t.bracket.bye_player = winners_bye;
        t.bracket.rounds.push(BracketRound { round_number: winners_round_number, matches: next_matches.clone() });

        let losers_pool: Vec<String> = losers_alive.into_iter().chain(dropped).collect();
        let (losers_pairs, _losers_bye) = Self::pair_sequential(losers_pool);
        let losers_bracket = t.bracket.losers_bracket.get_or_insert_with(Vec::new);
        let losers_round_number = losers_bracket.len() as u32;
        let losers_matches: Vec<BracketMatch> = losers_pairs
            .into_iter()
            .map(|(a, b)| BracketMatch::new(Uuid::new_v4().to_string(), losers_round_number, a, Some(b)))
            .collect();
        if !losers_matches.is_empty() {
            losers_bracket.push(BracketRound { round_number: losers_round_number, matches: losers_matches.clone() });
            next_matches.extend(losers_matches);
        }

        t.current_round += 1;
        Ok(RoundAdvance::NextRound { round: t.current_round, matches: next_matches })
    }

    fn advance_round_robin(t: &mut Tournament) -> Result<RoundAdvance, RequestError> {
        if t.current_round >= t.total_rounds {
            t.assign_ranks_by_wins_then_score();
            t.status = TournamentStatus::Completed;
            t.end_time = Some(chrono::Utc::now());
            let mut standings: Vec<(u32, String)> =
                t.players.iter().map(|p| (p.rank.unwrap_or(u32::MAX), p.player_id.clone())).collect();
            standings.sort_by_key(|(rank, _)| *rank);
            let winner_id = standings.first().map(|(_, id)| id.clone()).unwrap_or_default();
            return Ok(RoundAdvance::Completed { winner_id, standings: standings.into_iter().map(|(_, id)| id).collect() });
        }
        t.current_round += 1;
        let index = t.bracket_round_index();
        let matches = t
            .bracket
            .rounds
            .get(index)
            .map(|r| r.matches.iter().filter(|m| !m.is_bye()).cloned().collect())
            .unwrap_or_default();
        Ok(RoundAdvance::NextRound { round: t.current_round, matches })
    }

    fn finalize_with_champion(t: &mut Tournament) -> RoundAdvance {
        t.assign_ranks_by_wins_then_score();
        let champion = t.players.iter().find(|p| !p.eliminated).map(|p| p.player_id.clone());
        if let Some(champion_id) = &champion {
            if let Some(stats) = t.stats_for_mut(champion_id) {
                stats.rank = Some(1);
            }
        }
        t.status = TournamentStatus::Completed;
        t.end_time = Some(chrono::Utc::now());
        let mut standings: Vec<(u32, String)> =
            t.players.iter().map(|p| (p.rank.unwrap_or(u32::MAX), p.player_id.clone())).collect();
        standings.sort_by_key(|(rank, _)| *rank);
        RoundAdvance::Completed {
            winner_id: champion.unwrap_or_default(),
            standings: standings.into_iter().map(|(_, id)| id).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_players() -> Vec<(String, String)> {
        vec![
            ("p1".into(), "A".into()),
            ("p2".into(), "B".into()),
            ("p3".into(), "C".into()),
            ("p4".into(), "D".into()),
        ]
    }

    #[test]
    fn single_elimination_rejects_invalid_size() {
        let mut engine = TournamentEngine::new();
        let three = vec![("p1".into(), "A".into()), ("p2".into(), "B".into()), ("p3".into(), "C".into())];
        assert!(matches!(
            engine.create("t1", "lobby", TournamentFormat::SingleElimination, three, 10),
            Err(RequestError::InvalidTournamentSize)
        ));
    }

    #[test]
    fn single_elimination_four_players_runs_to_completion() {
        let mut engine = TournamentEngine::new();
        engine.create("t1", "lobby", TournamentFormat::SingleElimination, four_players(), 10).unwrap();
        assert_eq!(engine.get("t1").unwrap().total_rounds, 2);
        assert_eq!(engine.current_round_matches("t1").len(), 2);

        let round0_ids: Vec<String> = engine.get("t1").unwrap().bracket.rounds[0].matches.iter().map(|m| m.id.clone()).collect();
        for bm_id in round0_ids {
            let (p1, p2) = {
                let t = engine.get("t1").unwrap();
                let m = t.bracket.rounds[0].matches.iter().find(|m| m.id == bm_id).unwrap();
                (m.player1_id.clone().unwrap(), m.player2_id.clone().unwrap())
            };
            engine
                .record_match_result(
                    "t1",
                    MatchResultInput {
                        bracket_match_id: bm_id,
                        p1_id: p1.clone(),
                        p2_id: p2,
                        p1_score: 30,
                        p2_score: 10,
                        winner_id: Some(p1),
                        p1_cooperations: 8,
                        p1_betrayals: 2,
                        p2_cooperations: 3,
                        p2_betrayals: 7,
                    },
                )
                .unwrap();
        }

        let advance = engine.advance_round("t1").unwrap();
        let final_match = match advance {
            RoundAdvance::NextRound { round, matches } => {
                assert_eq!(round, 2);
                assert_eq!(matches.len(), 1);
                matches.into_iter().next().unwrap()
            }
            RoundAdvance::Completed { .. } => panic!("expected one more round"),
        };

        let p1 = final_match.player1_id.unwrap();
        let p2 = final_match.player2_id.unwrap();
        engine
            .record_match_result(
                "t1",
                MatchResultInput {
                    bracket_match_id: final_match.id,
                    p1_id: p1.clone(),
                    p2_id: p2,
                    p1_score: 25,
                    p2_score: 20,
                    winner_id: Some(p1.clone()),
                    p1_cooperations: 6,
                    p1_betrayals: 4,
                    p2_cooperations: 5,
                    p2_betrayals: 5,
                },
            )
            .unwrap();

        match engine.advance_round("t1").unwrap() {
            RoundAdvance::Completed { winner_id, standings } => {
                assert_eq!(winner_id, p1);
                assert_eq!(standings.len(), 4);
            }
            RoundAdvance::NextRound { .. } => panic!("tournament should be complete"),
        }
        assert_eq!(engine.get("t1").unwrap().status, TournamentStatus::Completed);
    }

    #[test]
    fn round_robin_schedule_covers_every_pair_once() {
        let mut engine = TournamentEngine::new();
        let five = vec![
            ("p1".into(), "A".into()),
            ("p2".into(), "B".into()),
            ("p3".into(), "C".into()),
            ("p4".into(), "D".into()),
            ("p5".into(), "E".into()),
        ];
        engine.create("t1", "lobby", TournamentFormat::RoundRobin, five, 10).unwrap();
        let t = engine.get("t1").unwrap();
        assert_eq!(t.total_rounds, 5);

        let mut seen_pairs = std::collections::HashSet::new();
        let mut match_count = 0;
        for round in &t.bracket.rounds {
            let mut seen_players = std::collections::HashSet::new();
            for m in &round.matches {
                if m.is_bye() {
                    continue;
                }
                match_count += 1;
                let a = m.player1_id.clone().unwrap();
                let b = m.player2_id.clone().unwrap();
                assert!(seen_players.insert(a.clone()));
                assert!(seen_players.insert(b.clone()));
                let mut pair = [a, b];
                pair.sort();
                assert!(seen_pairs.insert(pair));
            }
        }
        assert_eq!(match_count, 5 * 4 / 2);
    }
}

//! Tournament bracket and bookkeeping (§3, C9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::lobby::TournamentFormat;

/// Overall tournament lifecycle status (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// Bracket generated, first round not yet dispatched.
    Starting,
    /// At least one round is in progress.
    InProgress,
    /// All rounds complete; rankings assigned.
    Completed,
}

/// Bracket slot status (§3 TournamentMatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketMatchStatus {
    /// Not yet started (e.g. waiting on a prior round).
    Scheduled,
    /// A live [`crate::models::match_state::Match`] is running for this slot.
    InProgress,
    /// Terminal; `result` is populated.
    Completed,
}

/// Outcome of a completed bracket slot (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketResult {
    /// Winning player id, or `None` for a tie (round-robin/double-elim
    /// only; single-elimination always resolves a winner via tiebreaker).
    pub winner_id: Option<String>,
    /// Final scores, keyed by player id.
    pub scores: std::collections::BTreeMap<String, u32>,
    /// When the slot was completed.
    pub completed_at: DateTime<Utc>,
}

/// A single bracket slot (§3 TournamentMatch).
///
/// Distinct from [`crate::models::match_state::Match`], the volatile engine
/// state; `Match.tournament_match_id` back-points here so the engine can
/// mutate the slot on terminal events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketMatch {
    /// Bracket slot id (matches `Match.tournament_match_id` once a live
    /// match is instantiated for this slot).
    pub id: String,
    /// Round number this slot belongs to (0-based, matching
    /// `Tournament.rounds`).
    pub round_number: u32,
    /// First player id, if assigned.
    pub player1_id: Option<String>,
    /// Second player id, if assigned (absent for a bye).
    pub player2_id: Option<String>,
    /// Current status.
    pub status: BracketMatchStatus,
    /// Result, once completed.
    pub result: Option<BracketResult>,
}

impl BracketMatch {
    /// Construct a scheduled slot between two players.
    pub fn new(id: impl Into<String>, round_number: u32, player1_id: String, player2_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            round_number,
            player1_id: Some(player1_id),
            player2_id,
            status: BracketMatchStatus::Scheduled,
            result: None,
        }
    }

    /// True if this slot is a bye (only one player assigned).
    pub fn is_bye(&self) -> bool {
        self.player2_id.is_none()
    }
}

/// One round of the bracket: an ordered list of slots (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketRound {
    /// Round number (0-based).
    pub round_number: u32,
    /// Slots in this round, in dispatch order.
    pub matches: Vec<BracketMatch>,
}

impl BracketRound {
    /// True once every slot in this round is `Completed`.
    pub fn is_complete(&self) -> bool {
        self.matches.iter().all(|m| m.status == BracketMatchStatus::Completed)
    }
}

/// The bracket structure driving a tournament (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bracket {
    /// Ordered rounds.
    pub rounds: Vec<BracketRound>,
    /// Players eliminated so far, in elimination order.
    pub eliminated_players: Vec<String>,
    /// A player carried forward without a match this round, if any
    /// (single/double elimination with an odd field).
    pub bye_player: Option<String>,
    /// Parallel losers bracket (double elimination only).
    pub losers_bracket: Option<Vec<BracketRound>>,
    /// Per-player loss counts, used for double-elimination's
    /// "eliminated at 2 losses" rule.
    pub losses: std::collections::BTreeMap<String, u32>,
}

impl Bracket {
    /// Current (most recently appended) round, if any.
    pub fn current_round(&self) -> Option<&BracketRound> {
        self.rounds.last()
    }

    /// Mutable access to the current round.
    pub fn current_round_mut(&mut self) -> Option<&mut BracketRound> {
        self.rounds.last_mut()
    }

    /// Record a loss for `player_id`, returning the new loss count.
    pub fn record_loss(&mut self, player_id: &str) -> u32 {
        let count = self.losses.entry(player_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Per-player tournament statistics (§3), updated on every match's
/// terminal event (§4.6 "Result propagation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerTournamentStats {
    /// Player id.
    pub player_id: String,
    /// Display name.
    pub name: String,
    /// Matches played so far.
    pub matches_played: u32,
    /// Matches won.
    pub matches_won: u32,
    /// Matches lost.
    pub matches_lost: u32,
    /// Sum of match scores across all matches played.
    pub total_points: u32,
    /// Running cooperation rate: cooperations / (cooperations + betrayals)
    /// across every round of every match played so far.
    pub cooperation_rate: f64,
    /// `1.0 - cooperation_rate`.
    pub betrayal_rate: f64,
    /// `total_points / matches_played` (0 if none played).
    pub average_match_score: f64,
    /// Final rank, assigned at tournament completion (1 = winner).
    pub rank: Option<u32>,
    /// True once eliminated.
    pub eliminated: bool,
    /// Raw cooperation/betrayal tallies backing `cooperation_rate`.
    #[serde(default)]
    pub cooperations: u32,
    /// Raw betrayal tally.
    #[serde(default)]
    pub betrayals: u32,
}

impl PlayerTournamentStats {
    /// Construct a fresh stats record for a tournament entrant.
    pub fn new(player_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            name: name.into(),
            matches_played: 0,
            matches_won: 0,
            matches_lost: 0,
            total_points: 0,
            cooperation_rate: 0.0,
            betrayal_rate: 0.0,
            average_match_score: 0.0,
            rank: None,
            eliminated: false,
            cooperations: 0,
            betrayals: 0,
        }
    }

    /// Fold in the result of one completed match: outcome, points earned,
    /// and this player's own cooperate/betray tally for that match.
    pub fn record_match(&mut self, won: bool, points: u32, cooperations: u32, betrayals: u32) {
        self.matches_played += 1;
        if won {
            self.matches_won += 1;
        } else {
            self.matches_lost += 1;
        }
        self.total_points += points;
        self.cooperations += cooperations;
        self.betrayals += betrayals;

        let total_decisions = self.cooperations + self.betrayals;
        if total_decisions > 0 {
            self.cooperation_rate = self.cooperations as f64 / total_decisions as f64;
            self.betrayal_rate = 1.0 - self.cooperation_rate;
        }
        self.average_match_score = self.total_points as f64 / self.matches_played as f64;
    }
}

/// A tournament (§3, C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    /// Tournament id.
    pub id: String,
    /// Owning lobby id.
    pub lobby_id: String,
    /// Format selected at lobby creation.
    pub format: TournamentFormat,
    /// Per-player statistics, in seed/entry order.
    pub players: Vec<PlayerTournamentStats>,
    /// Current round, 1-based in tournament vocabulary (the bracket's
    /// `rounds` vec is 0-based; `current_round - 1` indexes it).
    pub current_round: u32,
    /// Total rounds this tournament format will run.
    pub total_rounds: u32,
    /// Lifecycle status.
    pub status: TournamentStatus,
    /// When the tournament started.
    pub start_time: DateTime<Utc>,
    /// When the tournament completed.
    pub end_time: Option<DateTime<Utc>>,
    /// Rounds-per-match copied from the lobby's settings at start time.
    pub rounds_per_match: u32,
    /// Bracket structure.
    pub bracket: Bracket,
}

impl Tournament {
    /// True if this is a single-elimination tournament.
    pub fn is_single_elimination(&self) -> bool {
        self.format == TournamentFormat::SingleElimination
    }

    /// The 0-based bracket round index corresponding to `current_round`.
    pub fn bracket_round_index(&self) -> usize {
        self.current_round.saturating_sub(1) as usize
    }

    /// Find a player's stats by id.
    pub fn stats_for(&self, player_id: &str) -> Option<&PlayerTournamentStats> {
        self.players.iter().find(|p| p.player_id == player_id)
    }

    /// Find a player's stats by id, mutably.
    pub fn stats_for_mut(&mut self, player_id: &str) -> Option<&mut PlayerTournamentStats> {
        self.players.iter_mut().find(|p| p.player_id == player_id)
    }

    /// Count of players not yet eliminated.
    pub fn surviving_player_count(&self) -> usize {
        self.players.iter().filter(|p| !p.eliminated).count()
    }

    /// Assign final ranks by descending (wins, totalScore), per §4.6
    /// round-robin ranking rule (also used as the tie-break ordering for
    /// non-champion ranks in elimination formats).
    pub fn assign_ranks_by_wins_then_score(&mut self) {
        let mut order: Vec<usize> = (0..self.players.len()).collect();
        order.sort_by(|&a, &b| {
            let pa = &self.players[a];
            let pb = &self.players[b];
            pb.matches_won
                .cmp(&pa.matches_won)
                .then(pb.total_points.cmp(&pa.total_points))
        });
        for (rank, idx) in order.into_iter().enumerate() {
            self.players[idx].rank = Some(rank as u32 + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_record_match_updates_rates() {
        let mut stats = PlayerTournamentStats::new("p1", "Alice");
        stats.record_match(true, 30, 8, 2);
        assert_eq!(stats.matches_played, 1);
        assert_eq!(stats.matches_won, 1);
        assert!((stats.cooperation_rate - 0.8).abs() < f64::EPSILON);
        assert!((stats.average_match_score - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ranks_assigned_by_wins_then_score() {
        let mut t = Tournament {
            id: "t1".into(),
            lobby_id: "l1".into(),
            format: TournamentFormat::RoundRobin,
            players: vec![
                {
                    let mut s = PlayerTournamentStats::new("p1", "A");
                    s.matches_won = 2;
                    s.total_points = 10;
                    s
                },
                {
                    let mut s = PlayerTournamentStats::new("p2", "B");
                    s.matches_won = 3;
                    s.total_points = 5;
                    s
                },
            ],
            current_round: 1,
            total_rounds: 3,
            status: TournamentStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            rounds_per_match: 10,
            bracket: Bracket::default(),
        };
        t.assign_ranks_by_wins_then_score();
        assert_eq!(t.stats_for("p2").unwrap().rank, Some(1));
        assert_eq!(t.stats_for("p1").unwrap().rank, Some(2));
    }
}

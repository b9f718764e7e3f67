use std::cmp::Ordering;
use std::collections::HashMap;

use core_types::{FightMode, HistoryFight, Opponent};

/// Which identity "we" are when replaying a fight history. Determines both
/// the match-type filter and which side of each row is the opponent.
#[derive(Debug, Clone, Copy)]
pub enum Perspective {
    Leek(i64),
    Farmer(i64),
    Team(i64),
}

/// Per-opponent running score: +1 per win, -1 per defeat, -0.5 for any
/// other outcome. Held in memory for one batch run and recomputed from
/// history on the next; absent opponents score zero.
#[derive(Debug, Clone, Default)]
pub struct Record {
    scores: HashMap<i64, f64>,
}

impl Record {
    pub fn score(&self, opponent_id: i64) -> f64 {
        self.scores.get(&opponent_id).copied().unwrap_or(0.0)
    }

    pub fn apply(&mut self, opponent_id: i64, outcome: &str) {
        *self.scores.entry(opponent_id).or_insert(0.0) += outcome_score(outcome);
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Replays historical fight rows into the record, filtered to the match
    /// type relevant for the perspective and attributed to the opposing
    /// side's identifier(s).
    pub fn seed_from_history(&mut self, fights: &[HistoryFight], perspective: Perspective) {
        for fight in fights {
            match perspective {
                Perspective::Leek(me) => {
                    if fight.kind != 0 {
                        continue;
                    }
                    for side in [&fight.leeks1, &fight.leeks2] {
                        if side.iter().any(|leek| leek.id == me) {
                            continue;
                        }
                        for opponent in side {
                            self.apply(opponent.id, &fight.result);
                        }
                    }
                }
                Perspective::Farmer(me) => {
                    if fight.kind != 1 {
                        continue;
                    }
                    let (Some(first), Some(second)) = (fight.farmer1, fight.farmer2) else {
                        continue;
                    };
                    let opponent = if first == me { second } else { first };
                    self.apply(opponent, &fight.result);
                }
                Perspective::Team(me) => {
                    if fight.kind != 1 {
                        continue;
                    }
                    let (Some(first), Some(second)) = (fight.team1, fight.team2) else {
                        continue;
                    };
                    let opponent = if first == me { second } else { first };
                    self.apply(opponent, &fight.result);
                }
            }
        }
    }
}

pub fn outcome_score(result: &str) -> f64 {
    match result {
        "win" => 1.0,
        "defeat" => -1.0,
        _ => -0.5,
    }
}

/// Orders candidates for opponent selection, best pick first. The sort is
/// stable, so ties preserve the order the server returned. Must be re-run
/// before every round since the record mutates after each fight.
///
/// Keys, in priority order:
/// 1. record score, descending (opponents beaten more come first);
/// 2. talent, ascending, or descending when `max_elo` is set;
/// 3. farmer/team only: total_level / leek_count, ascending;
/// 4. team only: level, direction following `max_elo`.
pub fn rank_opponents(candidates: &mut [Opponent], record: &Record, mode: FightMode, max_elo: bool) {
    candidates.sort_by(|a, b| {
        let ordering = record
            .score(b.id)
            .total_cmp(&record.score(a.id))
            .then_with(|| talent_order(a, b, max_elo));

        match mode {
            FightMode::Solo => ordering,
            FightMode::Farmer => ordering.then_with(|| ratio_order(a, b)),
            FightMode::Team => ordering
                .then_with(|| ratio_order(a, b))
                .then_with(|| level_order(a, b, max_elo)),
        }
    });
}

fn talent_order(a: &Opponent, b: &Opponent, max_elo: bool) -> Ordering {
    if max_elo {
        b.talent.cmp(&a.talent)
    } else {
        a.talent.cmp(&b.talent)
    }
}

fn ratio_order(a: &Opponent, b: &Opponent) -> Ordering {
    // Candidates without group fields rank last among ratio ties.
    let left = a.level_ratio().unwrap_or(f64::INFINITY);
    let right = b.level_ratio().unwrap_or(f64::INFINITY);
    left.total_cmp(&right)
}

fn level_order(a: &Opponent, b: &Opponent, max_elo: bool) -> Ordering {
    if max_elo {
        b.level.cmp(&a.level)
    } else {
        a.level.cmp(&b.level)
    }
}

#[cfg(test)]
mod tests {
    use core_types::LeekRef;

    use super::*;

    fn opponent(id: i64, talent: i64) -> Opponent {
        Opponent {
            id,
            name: format!("opponent-{id}"),
            talent,
            level: 0,
            total_level: None,
            leek_count: None,
        }
    }

    fn group(id: i64, talent: i64, total_level: i64, leek_count: i64) -> Opponent {
        Opponent {
            total_level: Some(total_level),
            leek_count: Some(leek_count),
            ..opponent(id, talent)
        }
    }

    fn solo_fight(result: &str, my_leek: i64, opponent_leek: i64) -> HistoryFight {
        HistoryFight {
            kind: 0,
            result: result.to_string(),
            leeks1: vec![LeekRef { id: my_leek }],
            leeks2: vec![LeekRef { id: opponent_leek }],
            ..HistoryFight::default()
        }
    }

    #[test]
    fn empty_record_orders_by_talent_ascending() {
        let mut candidates = vec![opponent(1, 300), opponent(2, 100), opponent(3, 200)];
        rank_opponents(&mut candidates, &Record::default(), FightMode::Solo, false);
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn max_elo_flips_the_talent_key() {
        let mut candidates = vec![opponent(1, 300), opponent(2, 100), opponent(3, 200)];
        rank_opponents(&mut candidates, &Record::default(), FightMode::Solo, true);
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }

    #[test]
    fn equal_keys_preserve_input_order() {
        let mut candidates = vec![opponent(7, 150), opponent(8, 150), opponent(9, 150)];
        rank_opponents(&mut candidates, &Record::default(), FightMode::Solo, false);
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[test]
    fn record_dominates_input_order() {
        let mut record = Record::default();
        record.apply(1, "win");
        record.apply(1, "win");
        record.apply(2, "defeat");

        // B first in input, equal talent; A's record score wins.
        let mut candidates = vec![opponent(2, 150), opponent(1, 150)];
        rank_opponents(&mut candidates, &record, FightMode::Solo, false);
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn replayed_history_sums_win_defeat_draw() {
        let fights = vec![
            solo_fight("win", 10, 99),
            solo_fight("win", 10, 99),
            solo_fight("win", 10, 99),
            solo_fight("defeat", 10, 99),
            solo_fight("draw", 10, 99),
        ];
        let mut record = Record::default();
        record.seed_from_history(&fights, Perspective::Leek(10));
        assert_eq!(record.score(99), 1.5);
    }

    #[test]
    fn solo_replay_skips_other_match_types() {
        let mut team_row = solo_fight("win", 10, 99);
        team_row.kind = 1;
        let mut record = Record::default();
        record.seed_from_history(&[team_row], Perspective::Leek(10));
        assert!(record.is_empty());
    }

    #[test]
    fn farmer_replay_scores_the_opposing_farmer() {
        let fights = vec![
            HistoryFight {
                kind: 1,
                result: "win".to_string(),
                farmer1: Some(42),
                farmer2: Some(7),
                ..HistoryFight::default()
            },
            HistoryFight {
                kind: 1,
                result: "defeat".to_string(),
                farmer1: Some(7),
                farmer2: Some(42),
                ..HistoryFight::default()
            },
        ];
        let mut record = Record::default();
        record.seed_from_history(&fights, Perspective::Farmer(42));
        assert_eq!(record.score(7), 0.0);
    }

    #[test]
    fn team_replay_filters_on_type_and_team_ids() {
        let fights = vec![HistoryFight {
            kind: 1,
            result: "win".to_string(),
            team1: Some(8876),
            team2: Some(444),
            ..HistoryFight::default()
        }];
        let mut record = Record::default();
        record.seed_from_history(&fights, Perspective::Team(8876));
        assert_eq!(record.score(444), 1.0);
    }

    #[test]
    fn farmer_mode_prefers_numerically_weaker_groups() {
        let mut candidates = vec![group(1, 150, 200, 4), group(2, 150, 90, 3)];
        rank_opponents(&mut candidates, &Record::default(), FightMode::Farmer, false);
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn team_mode_breaks_ratio_ties_by_level() {
        let mut weaker = group(1, 150, 120, 4);
        weaker.level = 50;
        let mut stronger = group(2, 150, 120, 4);
        stronger.level = 30;

        let mut candidates = vec![weaker, stronger];
        rank_opponents(&mut candidates, &Record::default(), FightMode::Team, false);
        let ids: Vec<i64> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn unknown_outcome_counts_as_half_loss() {
        assert_eq!(outcome_score("win"), 1.0);
        assert_eq!(outcome_score("defeat"), -1.0);
        assert_eq!(outcome_score("cancelled"), -0.5);
        assert_eq!(outcome_score("draw"), -0.5);
    }
}

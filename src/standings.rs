use std::collections::HashMap;

use serde::Serialize;

use crate::database::models::{Participant, ScoreRow};

/// One ranked entry in a season's standings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandingRow {
    pub rank: i32,
    pub user_id: i64,
    pub name: String,
    pub total_points: i64,
}

/// Sums every member's points across the season's completed rounds.
///
/// `total = Σ rounds Σ places tally(place) × points(place)`. Places missing
/// from the table contribute nothing. Members with no score rows at all
/// (joined late, nothing scored yet) total zero but still appear.
pub fn total_points(
    members: &[Participant],
    scores: &[ScoreRow],
    point_values: &HashMap<i16, i64>,
) -> HashMap<i64, i64> {
    let mut totals: HashMap<i64, i64> = members.iter().map(|m| (m.id, 0)).collect();
    for score in scores {
        let points = point_values.get(&score.place).copied().unwrap_or(0);
        if let Some(total) = totals.get_mut(&score.user_id) {
            *total += i64::from(score.tally) * points;
        }
    }
    totals
}

/// Ranks members by total points, descending, with shared ranks on ties.
///
/// A single forward pass tracks the previous score and how many entries have
/// been placed so far: equal totals share a rank, and the next distinct
/// total lands at 1 + the number of entries above it. `[10, 10, 8, 5, 5, 5]`
/// ranks as `[1, 1, 3, 4, 4, 4]`.
pub fn rank_standings(
    members: &[Participant],
    totals: &HashMap<i64, i64>,
) -> Vec<StandingRow> {
    let mut entries: Vec<(&Participant, i64)> = members
        .iter()
        .map(|m| (m, totals.get(&m.id).copied().unwrap_or(0)))
        .collect();
    // Name as a secondary key keeps tied rows in a stable display order.
    entries.sort_by(|(a, a_total), (b, b_total)| {
        b_total.cmp(a_total).then_with(|| a.name.cmp(&b.name))
    });

    let mut standings = Vec::with_capacity(entries.len());
    let mut current_rank = 0;
    let mut previous_total = None;
    for (placed_so_far, (member, total)) in entries.into_iter().enumerate() {
        if previous_total != Some(total) {
            current_rank = placed_so_far as i32 + 1;
            previous_total = Some(total);
        }
        standings.push(StandingRow {
            rank: current_rank,
            user_id: member.id,
            name: member.name.clone(),
            total_points: total,
        });
    }
    standings
}

/// The winner rows a finalize snapshot keeps: everyone ranked in the top
/// `podium_size`, ties included, so a three-way tie for fifth still fits.
pub fn podium(standings: &[StandingRow], podium_size: i32) -> Vec<&StandingRow> {
    standings.iter().filter(|row| row.rank <= podium_size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn member(id: i64, name: &str) -> Participant {
        Participant {
            id,
            name: name.to_string(),
            email: format!("{name}@example.com"),
            created_at: Utc::now(),
        }
    }

    fn standings_for(totals: &[(i64, i64)]) -> Vec<StandingRow> {
        let members: Vec<Participant> = totals
            .iter()
            .map(|(id, _)| member(*id, &format!("p{id}")))
            .collect();
        let totals: HashMap<i64, i64> = totals.iter().copied().collect();
        rank_standings(&members, &totals)
    }

    #[test]
    fn ties_share_rank_and_skip_the_next() {
        let standings = standings_for(&[(1, 10), (2, 10), (3, 8), (4, 5), (5, 5), (6, 5)]);
        let ranks: Vec<i32> = standings.iter().map(|row| row.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3, 4, 4, 4]);
    }

    #[test]
    fn sole_leader_gets_rank_one() {
        let standings = standings_for(&[(1, 3), (2, 12), (3, 7)]);
        assert_eq!(standings[0].user_id, 2);
        assert_eq!(standings[0].rank, 1);
        assert_eq!(standings[1].user_id, 3);
        assert_eq!(standings[1].rank, 2);
        assert_eq!(standings[2].user_id, 1);
        assert_eq!(standings[2].rank, 3);
    }

    #[test]
    fn totals_multiply_tallies_by_place_values() {
        let members = vec![member(1, "p1"), member(2, "p2"), member(3, "p3")];
        let scores = vec![
            ScoreRow { round_id: 1, user_id: 1, place: 1, tally: 1 },
            ScoreRow { round_id: 1, user_id: 2, place: 0, tally: 1 },
            ScoreRow { round_id: 2, user_id: 1, place: 2, tally: 2 },
        ];
        let point_values = HashMap::from([(0, 0), (1, 6), (2, 3)]);

        let totals = total_points(&members, &scores, &point_values);
        assert_eq!(totals[&1], 12); // 1×6 + 2×3
        assert_eq!(totals[&2], 0);
        assert_eq!(totals[&3], 0); // member, no score rows
    }

    #[test]
    fn negative_no_pick_points_subtract() {
        let members = vec![member(1, "p1")];
        let scores = vec![ScoreRow { round_id: 1, user_id: 1, place: 0, tally: 1 }];
        let point_values = HashMap::from([(0, -2), (1, 6)]);

        let totals = total_points(&members, &scores, &point_values);
        assert_eq!(totals[&1], -2);
    }

    // The scenario from the product rules: result {1st: "Team A"},
    // P1 picks Team A, P2 picks Team B, P3 sits out. Place 1 = 6, place 0 = 0.
    #[test]
    fn single_winner_scenario() {
        let members = vec![member(1, "p1"), member(2, "p2"), member(3, "p3")];
        let result = vec![crate::database::models::PlacedOption { place: 1, option_id: 10 }];
        let mut picks = HashMap::new();
        picks.insert(1, vec![10]);
        picks.insert(2, vec![11]);

        let scores = crate::scoring::score_round(1, &members, &picks, &result);
        let point_values = HashMap::from([(0, 0), (1, 6)]);
        let totals = total_points(&members, &scores, &point_values);

        assert_eq!(totals[&1], 6);
        assert_eq!(totals[&2], 0);
        assert_eq!(totals[&3], 0);
    }

    #[test]
    fn podium_keeps_ties_at_the_cutoff() {
        let standings = standings_for(&[(1, 10), (2, 9), (3, 8), (4, 7), (5, 6), (6, 6), (7, 1)]);
        // ranks: 1,2,3,4,5,5,7
        let podium = podium(&standings, 5);
        assert_eq!(podium.len(), 6);
        assert!(podium.iter().all(|row| row.rank <= 5));
    }
}

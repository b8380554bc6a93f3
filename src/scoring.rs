use std::collections::HashMap;

use crate::database::models::{Participant, PlacedOption, ScoreRow, NO_PICK_PLACE};

/// Computes the place credits a single participant earns for a round.
///
/// Each pick item that matches a placed option earns one unit of credit at
/// that place; since an option appears at exactly one place, an item can
/// match at most once, and a "pick 2" participant can accumulate credit at
/// two different places. A participant whose items all miss (including every
/// write-in, which can never appear in a result) earns a single credit at
/// the no-pick place instead.
pub fn credit_places(result: &[PlacedOption], picked_option_ids: &[i64]) -> Vec<(i16, i32)> {
    let place_by_option: HashMap<i64, i16> = result
        .iter()
        .map(|placed| (placed.option_id, placed.place))
        .collect();

    let mut credits: HashMap<i16, i32> = HashMap::new();
    for option_id in picked_option_ids {
        if let Some(&place) = place_by_option.get(option_id) {
            *credits.entry(place).or_insert(0) += 1;
        }
    }

    if credits.is_empty() {
        credits.insert(NO_PICK_PLACE, 1);
    }

    let mut credits: Vec<(i16, i32)> = credits.into_iter().collect();
    credits.sort_unstable_by_key(|&(place, _)| place);
    credits
}

/// Produces the full set of score rows for a completed round.
///
/// Every season member gets rows, including members who never submitted a
/// pick (they land at the no-pick place). The output replaces whatever was
/// stored for the round before, so re-running scoring is idempotent.
pub fn score_round(
    round_id: i64,
    members: &[Participant],
    picks_by_user: &HashMap<i64, Vec<i64>>,
    result: &[PlacedOption],
) -> Vec<ScoreRow> {
    let mut rows = Vec::new();
    for member in members {
        let picked = picks_by_user
            .get(&member.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for (place, tally) in credit_places(result, picked) {
            rows.push(ScoreRow {
                round_id,
                user_id: member.id,
                place,
                tally,
            });
        }
    }
    rows
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

    fn placed(place: i16, option_id: i64) -> PlacedOption {
        PlacedOption { place, option_id }
    }

    #[test]
    fn matching_pick_credits_its_place() {
        let result = vec![placed(1, 10), placed(2, 11)];
        assert_eq!(credit_places(&result, &[10]), vec![(1, 1)]);
        assert_eq!(credit_places(&result, &[11]), vec![(2, 1)]);
    }

    #[test]
    fn missed_pick_credits_the_no_pick_place() {
        let result = vec![placed(1, 10)];
        assert_eq!(credit_places(&result, &[99]), vec![(NO_PICK_PLACE, 1)]);
    }

    #[test]
    fn no_pick_at_all_credits_the_no_pick_place() {
        let result = vec![placed(1, 10)];
        assert_eq!(credit_places(&result, &[]), vec![(NO_PICK_PLACE, 1)]);
    }

    #[test]
    fn pick_two_can_credit_two_places() {
        let result = vec![placed(1, 10), placed(2, 11)];
        assert_eq!(credit_places(&result, &[11, 10]), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn one_hit_one_miss_credits_only_the_hit() {
        let result = vec![placed(1, 10), placed(2, 11)];
        assert_eq!(credit_places(&result, &[10, 99]), vec![(1, 1)]);
    }

    // A write-in option gets its own id when created, so it can never equal
    // a result option id no matter how close the text is.
    #[test]
    fn write_in_near_miss_scores_at_no_pick_place() {
        let result = vec![placed(1, 10)];
        let write_in_option_id = 57;
        assert_eq!(
            credit_places(&result, &[write_in_option_id]),
            vec![(NO_PICK_PLACE, 1)]
        );
    }

    #[test]
    fn score_round_covers_members_without_picks() {
        let members = vec![member(1, "p1"), member(2, "p2"), member(3, "p3")];
        let result = vec![placed(1, 10)];
        let mut picks = HashMap::new();
        picks.insert(1, vec![10]); // picked the winner
        picks.insert(2, vec![11]); // picked a loser

        let rows = score_round(7, &members, &picks, &result);
        assert_eq!(
            rows,
            vec![
                ScoreRow {
                    round_id: 7,
                    user_id: 1,
                    place: 1,
                    tally: 1
                },
                ScoreRow {
                    round_id: 7,
                    user_id: 2,
                    place: NO_PICK_PLACE,
                    tally: 1
                },
                ScoreRow {
                    round_id: 7,
                    user_id: 3,
                    place: NO_PICK_PLACE,
                    tally: 1
                },
            ]
        );
    }

    #[test]
    fn rescoring_produces_identical_rows() {
        let members = vec![member(1, "p1"), member(2, "p2")];
        let result = vec![placed(1, 10), placed(2, 11)];
        let mut picks = HashMap::new();
        picks.insert(1, vec![10, 11]);

        let first = score_round(3, &members, &picks, &result);
        let second = score_round(3, &members, &picks, &result);
        assert_eq!(first, second);
    }
}

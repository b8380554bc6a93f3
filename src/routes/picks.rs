use std::collections::HashSet;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::hash_token;
use crate::database::models::{
    MagicLink, Participant, PickItemRow, PickValue, Round, RoundOption,
};
use crate::database::{MagicLinkDatabase, PickDatabase, RoundDatabase};
use crate::error::AppError;
use crate::AppState;

/// Longest accepted write-in text.
const MAX_PICK_LENGTH: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new().route("/:token", get(pick_form).post(submit_pick))
}

/// Resolves a raw magic-link token to its link and round, enforcing that the
/// round still accepts picks. Every failure mode returns the same generic
/// error so tokens cannot be probed.
async fn resolve_link(state: &AppState, token: &str) -> Result<(MagicLink, Round), AppError> {
    let link = state
        .db
        .get_magic_link(&hash_token(token))
        .await?
        .ok_or_else(AppError::invalid_link)?;
    let round = state
        .db
        .get_round(link.round_id)
        .await?
        .ok_or_else(AppError::invalid_link)?;
    if !round.accepts_picks(Utc::now()) {
        return Err(AppError::invalid_link());
    }
    Ok((link, round))
}

#[derive(Serialize)]
struct PickFormResponse {
    round: Round,
    options: Vec<RoundOption>,
    participants: Vec<Participant>,
    current_picks: Vec<PickItemRow>,
}

/// Everything the pick form needs: the round, its options, the participants
/// this link speaks for, and their stored picks so far.
async fn pick_form(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<PickFormResponse>, AppError> {
    let (link, round) = resolve_link(&state, &token).await?;
    let participants = state.db.get_link_participants(&link).await?;
    if participants.is_empty() {
        return Err(AppError::invalid_link());
    }

    let options = state.db.get_round_options(round.id).await?;
    let mut current_picks = Vec::new();
    for participant in &participants {
        let mut items = state.db.get_user_pick_items(round.id, participant.id).await?;
        current_picks.append(&mut items);
    }

    Ok(Json(PickFormResponse {
        round,
        options,
        participants,
        current_picks,
    }))
}

#[derive(Deserialize)]
struct SubmitPickRequest {
    /// Required when the link is shared across several participants.
    user_id: Option<i64>,
    picks: Vec<PickValue>,
}

#[derive(Serialize)]
struct SubmitPickResponse {
    saved: bool,
}

/// Accepts (or replaces) a participant's picks for the round behind a
/// magic link.
async fn submit_pick(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(body): Json<SubmitPickRequest>,
) -> Result<Json<SubmitPickResponse>, AppError> {
    let (link, round) = resolve_link(&state, &token).await?;

    let participants = state.db.get_link_participants(&link).await?;
    let participant = match (link.user_id, body.user_id) {
        // A personal link ignores any user_id the client sends.
        (Some(_), _) => participants.first(),
        (None, Some(user_id)) => participants.iter().find(|p| p.id == user_id),
        (None, None) if participants.len() == 1 => participants.first(),
        (None, None) => {
            return Err(AppError::validation([
                "user_id is required for a shared link",
            ]))
        }
    }
    .ok_or_else(AppError::invalid_link)?;

    let options = state.db.get_round_options(round.id).await?;
    let known_ids: HashSet<i64> = options.iter().map(|option| option.id).collect();
    validate_pick_values(&round, &known_ids, &body.picks)?;

    state
        .db
        .upsert_pick(participant.id, round.id, &body.picks)
        .await?;
    info!(
        "Saved {} pick(s) for user {} in round {}",
        body.picks.len(),
        participant.id,
        round.id
    );

    Ok(Json(SubmitPickResponse { saved: true }))
}

/// Rejects a submission before any write: item count against the round's
/// pick budget, text length, duplicates, and closed-set membership for
/// rounds that do not accept write-ins.
fn validate_pick_values(
    round: &Round,
    known_option_ids: &HashSet<i64>,
    values: &[PickValue],
) -> Result<(), AppError> {
    let mut messages = Vec::new();

    if values.is_empty() {
        messages.push("at least one pick is required".to_string());
    }
    if values.len() > round.pick_count as usize {
        messages.push(format!(
            "this round accepts at most {} pick(s)",
            round.pick_count
        ));
    }

    for value in values {
        match value {
            PickValue::Existing(id) => {
                if !known_option_ids.contains(id) {
                    messages.push(format!("option {id} is not part of this round"));
                }
            }
            PickValue::WriteIn(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    messages.push("picks cannot be blank".to_string());
                } else if trimmed.chars().count() > MAX_PICK_LENGTH {
                    messages.push(format!("picks cannot exceed {MAX_PICK_LENGTH} characters"));
                } else if !round.write_in {
                    messages.push(format!(
                        "\"{trimmed}\" is not one of this round's options"
                    ));
                }
            }
        }
    }

    let distinct: HashSet<&PickValue> = values.iter().collect();
    if distinct.len() != values.len() {
        messages.push("duplicate picks are not allowed".to_string());
    }

    if messages.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::RoundStatus;
    use chrono::Duration;

    fn round(pick_count: i16, write_in: bool) -> Round {
        Round {
            id: 1,
            season_id: 1,
            sport: "NFL".to_string(),
            pick_count,
            write_in,
            lock_time: Utc::now() + Duration::hours(1),
            status: RoundStatus::Active,
            created_at: Utc::now(),
        }
    }

    fn ids(values: &[i64]) -> HashSet<i64> {
        values.iter().copied().collect()
    }

    #[test]
    fn accepts_a_registered_option() {
        let result = validate_pick_values(
            &round(1, false),
            &ids(&[10, 11]),
            &[PickValue::Existing(10)],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_unknown_option_ids() {
        let result = validate_pick_values(
            &round(1, false),
            &ids(&[10, 11]),
            &[PickValue::Existing(99)],
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn rejects_free_text_on_closed_rounds() {
        let result = validate_pick_values(
            &round(1, false),
            &ids(&[10]),
            &[PickValue::WriteIn("Team A".to_string())],
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn accepts_free_text_on_write_in_rounds() {
        let result = validate_pick_values(
            &round(1, true),
            &ids(&[]),
            &[PickValue::WriteIn("Team A".to_string())],
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_too_many_picks() {
        let result = validate_pick_values(
            &round(1, false),
            &ids(&[10, 11]),
            &[PickValue::Existing(10), PickValue::Existing(11)],
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn rejects_over_length_write_ins() {
        let result = validate_pick_values(
            &round(1, true),
            &ids(&[]),
            &[PickValue::WriteIn("x".repeat(MAX_PICK_LENGTH + 1))],
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn length_limit_counts_characters_not_bytes() {
        // 60 two-byte characters: within the limit even though the byte
        // length is 120.
        let result = validate_pick_values(
            &round(1, true),
            &ids(&[]),
            &[PickValue::WriteIn("é".repeat(60))],
        );
        assert!(result.is_ok());

        let result = validate_pick_values(
            &round(1, true),
            &ids(&[]),
            &[PickValue::WriteIn("é".repeat(MAX_PICK_LENGTH + 1))],
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn rejects_duplicates() {
        let result = validate_pick_values(
            &round(2, false),
            &ids(&[10, 11]),
            &[PickValue::Existing(10), PickValue::Existing(10)],
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}

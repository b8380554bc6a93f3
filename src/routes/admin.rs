use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{hash_token, new_link_token, AdminClaims};
use crate::database::models::{
    Participant, PlacedOption, Round, RoundStatus, ScoringPlace, Season, Setting,
};
use crate::database::{
    MagicLinkDatabase, PickDatabase, RoundDatabase, SeasonDatabase, SettingsDatabase,
    UserDatabase,
};
use crate::error::AppError;
use crate::scoring::score_round;
use crate::settings::SettingsProvider;
use crate::standings::{podium, rank_standings, total_points, StandingRow};
use crate::AppState;

/// How many top finishers a season snapshot keeps (ties at the cutoff are
/// kept too, so a podium can hold more rows than this).
const PODIUM_SIZE: i32 = 5;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/seasons", post(create_season).get(list_seasons))
        .route("/seasons/:season_id", delete(delete_season))
        .route("/seasons/:season_id/end", post(end_season))
        .route("/seasons/:season_id/reopen", post(reopen_season))
        .route("/seasons/:season_id/members", post(add_member))
        .route("/seasons/:season_id/rounds", get(list_rounds))
        .route("/users", post(create_user).get(list_users))
        .route("/rounds", post(create_round))
        .route("/rounds/:round_id/activate", post(activate_round))
        .route("/rounds/:round_id/lock", post(lock_round))
        .route("/rounds/:round_id/complete", post(complete_round))
        .route("/rounds/:round_id/send-links", post(send_links))
        .route("/settings", get(get_settings).put(update_settings))
}

/// Groups season members by email, case-insensitively, so members sharing an
/// inbox in any casing land under one lowercase key. The key is what gets
/// stored on the magic link, and the participant lookup folds case the same
/// way.
fn group_members_by_email(members: &[Participant]) -> HashMap<String, Vec<&Participant>> {
    let mut by_email: HashMap<String, Vec<&Participant>> = HashMap::new();
    for member in members {
        by_email
            .entry(member.email.to_lowercase())
            .or_default()
            .push(member);
    }
    by_email
}

/// The gate in front of season finalization: an ended season cannot end
/// again, and every round must be completed first. The error names each
/// offending round and its status.
fn check_finalize_preconditions(season: &Season, unfinished: &[Round]) -> Result<(), AppError> {
    if season.has_ended() {
        return Err(AppError::Precondition(
            "Season has already ended.".to_string(),
        ));
    }
    if !unfinished.is_empty() {
        let names: Vec<String> = unfinished
            .iter()
            .map(|round| format!("{} ({})", round.sport, round.status))
            .collect();
        return Err(AppError::Precondition(format!(
            "All rounds must be completed before ending the season. Still open: {}",
            names.join(", ")
        )));
    }
    Ok(())
}

async fn fetch_live_season(state: &AppState, season_id: i64) -> Result<Season, AppError> {
    state
        .db
        .get_season(season_id)
        .await?
        .filter(|season| !season.deleted)
        .ok_or_else(|| AppError::NotFound("Season not found.".to_string()))
}

async fn fetch_round(state: &AppState, round_id: i64) -> Result<Round, AppError> {
    state
        .db
        .get_round(round_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Round not found.".to_string()))
}

#[derive(Deserialize)]
struct CreateSeasonRequest {
    name: String,
    year_start: i32,
    year_end: i32,
}

async fn create_season(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Json(body): Json<CreateSeasonRequest>,
) -> Result<Json<Season>, AppError> {
    let mut messages = Vec::new();
    if body.name.trim().is_empty() {
        messages.push("name is required".to_string());
    }
    if !(1900..=2100).contains(&body.year_start) {
        messages.push("year_start is out of range".to_string());
    }
    if body.year_end < body.year_start || body.year_end > 2100 {
        messages.push("year_end must not precede year_start".to_string());
    }
    if !messages.is_empty() {
        return Err(AppError::Validation(messages));
    }

    let season = state
        .db
        .create_season(body.name.trim(), body.year_start, body.year_end)
        .await?;
    info!("Created season {} ({})", season.name, season.id);
    Ok(Json(season))
}

async fn list_seasons(
    State(state): State<AppState>,
    _claims: AdminClaims,
) -> Result<Json<Vec<Season>>, AppError> {
    Ok(Json(state.db.get_seasons().await?))
}

#[derive(Deserialize)]
struct DeleteSeasonQuery {
    #[serde(default)]
    hard: bool,
}

/// Soft-deletes a season; `?hard=true` permanently removes an already
/// soft-deleted season and is restricted to super admins.
async fn delete_season(
    State(state): State<AppState>,
    claims: AdminClaims,
    Path(season_id): Path<i64>,
    Query(query): Query<DeleteSeasonQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let season = state
        .db
        .get_season(season_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Season not found.".to_string()))?;

    if query.hard {
        claims.require_super()?;
        if !season.deleted {
            return Err(AppError::Precondition(
                "Only soft-deleted seasons can be permanently removed.".to_string(),
            ));
        }
        state.db.hard_delete_season(season_id).await?;
        info!("Hard-deleted season {season_id}");
    } else {
        state.db.soft_delete_season(season_id).await?;
        info!("Soft-deleted season {season_id}");
    }

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Serialize)]
struct EndSeasonResponse {
    season_id: i64,
    winners: Vec<StandingRow>,
}

/// Closes out a season: verifies every round is completed, snapshots the
/// ranked standings with the point values in effect right now, and stamps
/// the end time. All-or-nothing; a failure leaves the season live.
async fn end_season(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Path(season_id): Path<i64>,
) -> Result<Json<EndSeasonResponse>, AppError> {
    let season = fetch_live_season(&state, season_id).await?;
    let unfinished = state.db.get_unfinished_rounds(season_id).await?;
    check_finalize_preconditions(&season, &unfinished)?;

    // Snapshot the rule table as configured right now, straight from the
    // store rather than the settings cache.
    let mut places = state.db.get_scoring_places().await?;
    if places.is_empty() {
        places = SettingsProvider::default_point_values()
            .into_iter()
            .map(|(place, points)| ScoringPlace { place, points })
            .collect();
        places.sort_unstable_by_key(|place| place.place);
    }
    let point_values: HashMap<i16, i64> = places
        .iter()
        .map(|place| (place.place, place.points))
        .collect();

    let members = state.db.get_members(season_id).await?;
    let scores = state.db.get_season_scores(season_id).await?;
    let totals = total_points(&members, &scores, &point_values);
    let standings = rank_standings(&members, &totals);

    let winners: Vec<(i64, i32, i64)> = podium(&standings, PODIUM_SIZE)
        .into_iter()
        .map(|row| (row.user_id, row.rank, row.total_points))
        .collect();
    let point_values_json = serde_json::to_value(&places).map_err(anyhow::Error::from)?;

    state
        .db
        .finalize_season(season_id, &winners, &point_values_json)
        .await?;
    info!(
        "Ended season {season_id} with {} winner snapshot(s)",
        winners.len()
    );

    Ok(Json(EndSeasonResponse {
        season_id,
        winners: podium(&standings, PODIUM_SIZE).into_iter().cloned().collect(),
    }))
}

/// Returns an ended season to live state, dropping its winner snapshot.
async fn reopen_season(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Path(season_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let season = fetch_live_season(&state, season_id).await?;
    if !season.has_ended() {
        return Err(AppError::Precondition(
            "Season has not ended, so there is nothing to reopen.".to_string(),
        ));
    }

    state.db.reopen_season(season_id).await?;
    info!("Reopened season {season_id}");
    Ok(Json(serde_json::json!({ "reopened": true })))
}

#[derive(Deserialize)]
struct AddMemberRequest {
    user_id: i64,
}

async fn add_member(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Path(season_id): Path<i64>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let season = fetch_live_season(&state, season_id).await?;
    if season.has_ended() {
        return Err(AppError::Precondition(
            "Cannot add members to an ended season.".to_string(),
        ));
    }
    state
        .db
        .get_user(body.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found.".to_string()))?;

    state.db.add_member(season_id, body.user_id).await?;
    Ok(Json(serde_json::json!({ "added": true })))
}

async fn list_rounds(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Path(season_id): Path<i64>,
) -> Result<Json<Vec<Round>>, AppError> {
    fetch_live_season(&state, season_id).await?;
    Ok(Json(state.db.get_rounds_by_season(season_id).await?))
}

#[derive(Deserialize)]
struct CreateUserRequest {
    name: String,
    email: String,
}

async fn create_user(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Json(body): Json<CreateUserRequest>,
) -> Result<Json<Participant>, AppError> {
    let mut messages = Vec::new();
    if body.name.trim().is_empty() {
        messages.push("name is required");
    }
    let email = body.email.trim();
    if email.is_empty() || !email.contains('@') {
        messages.push("a valid email is required");
    }
    if !messages.is_empty() {
        return Err(AppError::validation(messages));
    }

    let user = state.db.create_user(body.name.trim(), email).await?;
    Ok(Json(user))
}

async fn list_users(
    State(state): State<AppState>,
    _claims: AdminClaims,
) -> Result<Json<Vec<Participant>>, AppError> {
    Ok(Json(state.db.get_users().await?))
}

#[derive(Deserialize)]
struct CreateRoundRequest {
    season_id: i64,
    sport: String,
    #[serde(default = "default_pick_count")]
    pick_count: i16,
    #[serde(default)]
    write_in: bool,
    lock_time: DateTime<Utc>,
    #[serde(default)]
    options: Vec<String>,
}

fn default_pick_count() -> i16 {
    1
}

async fn create_round(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Json(body): Json<CreateRoundRequest>,
) -> Result<Json<Round>, AppError> {
    let season = fetch_live_season(&state, body.season_id).await?;
    if season.has_ended() {
        return Err(AppError::Precondition(
            "Cannot add rounds to an ended season.".to_string(),
        ));
    }

    let mut messages = Vec::new();
    if body.sport.trim().is_empty() {
        messages.push("sport is required".to_string());
    }
    if !(1..=2).contains(&body.pick_count) {
        messages.push("pick_count must be 1 or 2".to_string());
    }
    if body.lock_time <= Utc::now() {
        messages.push("lock_time must be in the future".to_string());
    }
    if !body.write_in && body.options.len() < 2 {
        messages.push("a closed round needs at least two options".to_string());
    }
    let mut seen = HashSet::new();
    for label in &body.options {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            messages.push("option labels cannot be blank".to_string());
        } else if !seen.insert(trimmed.to_string()) {
            messages.push(format!("duplicate option \"{trimmed}\""));
        }
    }
    if !messages.is_empty() {
        return Err(AppError::Validation(messages));
    }

    let options: Vec<String> = body
        .options
        .iter()
        .map(|label| label.trim().to_string())
        .collect();
    let round = state
        .db
        .create_round(
            body.season_id,
            body.sport.trim(),
            body.pick_count,
            body.write_in,
            body.lock_time,
            &options,
        )
        .await?;
    info!("Created round {} ({})", round.sport, round.id);
    Ok(Json(round))
}

async fn activate_round(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Path(round_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let round = fetch_round(&state, round_id).await?;
    if round.status != RoundStatus::Draft {
        return Err(AppError::Precondition(format!(
            "Only draft rounds can be activated; this round is {}.",
            round.status
        )));
    }
    state
        .db
        .set_round_status(round_id, RoundStatus::Active)
        .await?;
    info!("Activated round {round_id}");
    Ok(Json(serde_json::json!({ "status": RoundStatus::Active })))
}

async fn lock_round(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Path(round_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let round = fetch_round(&state, round_id).await?;
    if round.status != RoundStatus::Active {
        return Err(AppError::Precondition(format!(
            "Only active rounds can be locked; this round is {}.",
            round.status
        )));
    }
    state
        .db
        .set_round_status(round_id, RoundStatus::Locked)
        .await?;
    info!("Locked round {round_id}");
    Ok(Json(serde_json::json!({ "status": RoundStatus::Locked })))
}

#[derive(Deserialize)]
struct CompleteRoundRequest {
    /// Winning option ids in finishing order; index 0 is first place.
    places: Vec<i64>,
}

/// Records a round's result and scores every season member against it in one
/// transaction. Completing an already-completed round replaces the result
/// and the scores, never duplicates them.
async fn complete_round(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Path(round_id): Path<i64>,
    Json(body): Json<CompleteRoundRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let round = fetch_round(&state, round_id).await?;
    if round.status == RoundStatus::Draft {
        return Err(AppError::Precondition(
            "Draft rounds cannot be completed.".to_string(),
        ));
    }

    let options = state.db.get_round_options(round_id).await?;
    let known_ids: HashSet<i64> = options.iter().map(|option| option.id).collect();

    let mut messages = Vec::new();
    if body.places.is_empty() {
        messages.push("at least one placed option is required".to_string());
    }
    let distinct: HashSet<i64> = body.places.iter().copied().collect();
    if distinct.len() != body.places.len() {
        messages.push("an option cannot finish at two places".to_string());
    }
    for option_id in &body.places {
        if !known_ids.contains(option_id) {
            messages.push(format!("option {option_id} is not part of this round"));
        }
    }
    if !messages.is_empty() {
        return Err(AppError::Validation(messages));
    }

    let result: Vec<PlacedOption> = body
        .places
        .iter()
        .enumerate()
        .map(|(index, &option_id)| PlacedOption {
            place: index as i16 + 1,
            option_id,
        })
        .collect();

    let members = state.db.get_members(round.season_id).await?;
    let pick_items = state.db.get_round_pick_items(round_id).await?;
    let mut picks_by_user: HashMap<i64, Vec<i64>> = HashMap::new();
    for item in pick_items {
        picks_by_user
            .entry(item.user_id)
            .or_default()
            .push(item.option_id);
    }

    let scores = score_round(round_id, &members, &picks_by_user, &result);
    state.db.complete_round(round_id, &result, &scores).await?;
    info!(
        "Completed round {round_id} with {} result place(s), scored {} member(s)",
        result.len(),
        members.len()
    );

    Ok(Json(serde_json::json!({
        "status": RoundStatus::Completed,
        "scored": members.len(),
    })))
}

#[derive(Serialize)]
struct SendLinksResponse {
    links_sent: usize,
}

/// Mints one magic link per distinct member email and fires off the invite
/// emails. Members sharing an inbox get a single shared link.
async fn send_links(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Path(round_id): Path<i64>,
) -> Result<Json<SendLinksResponse>, AppError> {
    let round = fetch_round(&state, round_id).await?;
    if !round.accepts_picks(Utc::now()) {
        return Err(AppError::Precondition(
            "Links can only be sent while the round is open for picks.".to_string(),
        ));
    }

    let members = state.db.get_members(round.season_id).await?;
    let by_email = group_members_by_email(&members);

    let mut links_sent = 0;
    for (email, group) in &by_email {
        let token = new_link_token();
        // A link for a single member is bound to them; a shared inbox gets
        // one link covering the whole group.
        let user_id = match group.as_slice() {
            [only] => Some(only.id),
            _ => None,
        };
        state
            .db
            .store_magic_link(&hash_token(&token), round_id, user_id, email)
            .await?;

        let names: Vec<&str> = group.iter().map(|member| member.name.as_str()).collect();
        let (subject, html) = state
            .mailer
            .pick_invite(&round, &names.join(" & "), &token);
        state.mailer.dispatch(email.clone(), subject, html);
        links_sent += 1;
    }

    info!("Sent {links_sent} magic link(s) for round {round_id}");
    Ok(Json(SendLinksResponse { links_sent }))
}

#[derive(Serialize)]
struct SettingsResponse {
    scoring_places: Vec<ScoringPlace>,
    settings: Vec<Setting>,
}

async fn get_settings(
    State(state): State<AppState>,
    _claims: AdminClaims,
) -> Result<Json<SettingsResponse>, AppError> {
    Ok(Json(SettingsResponse {
        scoring_places: state.db.get_scoring_places().await?,
        settings: state.db.get_settings().await?,
    }))
}

#[derive(Deserialize)]
struct UpdateSettingsRequest {
    #[serde(default)]
    scoring_places: Option<Vec<ScoringPlace>>,
    #[serde(default)]
    settings: Vec<Setting>,
}

/// Updates the place→points table and/or text settings, then drops the
/// settings cache so the next read sees the new values.
async fn update_settings(
    State(state): State<AppState>,
    _claims: AdminClaims,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(places) = &body.scoring_places {
        let mut messages = Vec::new();
        if places.is_empty() {
            messages.push("at least one scoring place is required".to_string());
        }
        let distinct: HashSet<i16> = places.iter().map(|place| place.place).collect();
        if distinct.len() != places.len() {
            messages.push("duplicate places are not allowed".to_string());
        }
        if places.iter().any(|place| place.place < 0) {
            messages.push("places cannot be negative".to_string());
        }
        if !messages.is_empty() {
            return Err(AppError::Validation(messages));
        }

        state.db.set_scoring_places(places).await?;
    }

    for setting in &body.settings {
        if setting.key.trim().is_empty() {
            return Err(AppError::validation(["setting keys cannot be blank"]));
        }
        state.db.set_setting(&setting.key, &setting.value).await?;
    }

    state.settings.invalidate();
    info!("Updated settings and invalidated the settings cache");
    Ok(Json(serde_json::json!({ "updated": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn member(id: i64, name: &str, email: &str) -> Participant {
        Participant {
            id,
            name: name.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        }
    }

    fn season(ended: bool) -> Season {
        Season {
            id: 1,
            name: "2025/26".to_string(),
            year_start: 2025,
            year_end: 2026,
            is_active: true,
            is_default: false,
            ended_at: ended.then(Utc::now),
            deleted: false,
            created_at: Utc::now(),
        }
    }

    fn round(sport: &str, status: RoundStatus) -> Round {
        Round {
            id: 1,
            season_id: 1,
            sport: sport.to_string(),
            pick_count: 1,
            write_in: false,
            lock_time: Utc::now() + Duration::hours(1),
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn members_sharing_an_inbox_group_under_one_lowercase_key() {
        let members = vec![
            member(1, "Mom", "Family@example.com"),
            member(2, "Dad", "family@example.com"),
            member(3, "Kid", "kid@example.com"),
        ];
        let by_email = group_members_by_email(&members);
        assert_eq!(by_email.len(), 2);
        let family: Vec<i64> = by_email["family@example.com"]
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(family, vec![1, 2]);
        assert_eq!(by_email["kid@example.com"].len(), 1);
    }

    #[test]
    fn uppercase_emails_never_produce_their_own_group() {
        let members = vec![member(1, "Mom", "Mom@example.com")];
        let by_email = group_members_by_email(&members);
        assert!(by_email.contains_key("mom@example.com"));
        assert!(!by_email.contains_key("Mom@example.com"));
    }

    #[test]
    fn finalize_passes_when_every_round_is_completed() {
        assert!(check_finalize_preconditions(&season(false), &[]).is_ok());
    }

    #[test]
    fn finalize_rejects_an_already_ended_season() {
        let result = check_finalize_preconditions(&season(true), &[]);
        match result {
            Err(AppError::Precondition(msg)) => assert!(msg.contains("already ended")),
            other => panic!("expected a precondition error, got {other:?}"),
        }
    }

    #[test]
    fn finalize_names_every_unfinished_round_and_its_status() {
        let unfinished = vec![
            round("NFL", RoundStatus::Draft),
            round("NHL", RoundStatus::Active),
            round("MLB", RoundStatus::Locked),
        ];
        let result = check_finalize_preconditions(&season(false), &unfinished);
        match result {
            Err(AppError::Precondition(msg)) => {
                assert!(msg.contains("NFL (Draft)"));
                assert!(msg.contains("NHL (Open for picks)"));
                assert!(msg.contains("MLB (Locked)"));
            }
            other => panic!("expected a precondition error, got {other:?}"),
        }
    }
}

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::database::models::{RoundStatus, Season, SeasonWinner};
use crate::database::{RoundDatabase, SeasonDatabase};
use crate::error::AppError;
use crate::standings::{rank_standings, total_points, StandingRow};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/leaderboard/season/:season_id", get(leaderboard))
        .route("/rounds/:round_id/result", get(round_result))
        .route("/champions", get(champions))
        .route("/settings", get(site_settings))
}

#[derive(Serialize)]
struct LeaderboardResponse {
    season: Season,
    standings: Vec<StandingRow>,
}

/// Live standings for a season, recomputed from stored score tallies and the
/// point values currently in effect.
async fn leaderboard(
    State(state): State<AppState>,
    Path(season_id): Path<i64>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    let season = state
        .db
        .get_season(season_id)
        .await?
        .filter(|season| !season.deleted)
        .ok_or_else(|| AppError::NotFound("Season not found.".to_string()))?;

    let members = state.db.get_members(season_id).await?;
    let scores = state.db.get_season_scores(season_id).await?;
    let point_values = state.settings.point_values().await;

    let totals = total_points(&members, &scores, &point_values);
    let standings = rank_standings(&members, &totals);

    Ok(Json(LeaderboardResponse { season, standings }))
}

#[derive(Serialize)]
struct PlacedOptionView {
    place: i16,
    option_id: i64,
    label: String,
}

/// A completed round's official result, with option labels resolved.
async fn round_result(
    State(state): State<AppState>,
    Path(round_id): Path<i64>,
) -> Result<Json<Vec<PlacedOptionView>>, AppError> {
    let round = state
        .db
        .get_round(round_id)
        .await?
        .filter(|round| round.status == RoundStatus::Completed)
        .ok_or_else(|| AppError::NotFound("No result for this round.".to_string()))?;

    let result = state.db.get_round_result(round.id).await?;
    let options = state.db.get_round_options(round.id).await?;
    let labels: std::collections::HashMap<i64, String> = options
        .into_iter()
        .map(|option| (option.id, option.label))
        .collect();

    let views = result
        .into_iter()
        .map(|placed| PlacedOptionView {
            place: placed.place,
            option_id: placed.option_id,
            label: labels.get(&placed.option_id).cloned().unwrap_or_default(),
        })
        .collect();
    Ok(Json(views))
}

#[derive(Serialize)]
struct ChampionEntry {
    season: Season,
    winners: Vec<SeasonWinner>,
}

/// Ended seasons with their frozen winner snapshots, newest first.
async fn champions(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChampionEntry>>, AppError> {
    let seasons = state.db.get_ended_seasons().await?;
    let mut entries = Vec::with_capacity(seasons.len());
    for season in seasons {
        let winners = state.db.get_season_winners(season.id).await?;
        entries.push(ChampionEntry { season, winners });
    }
    Ok(Json(entries))
}

#[derive(Serialize)]
struct SiteSettings {
    title: String,
    tagline: String,
}

async fn site_settings(State(state): State<AppState>) -> Json<SiteSettings> {
    Json(SiteSettings {
        title: state
            .settings
            .text("site_title", "Go Make Your Picks")
            .await,
        tagline: state.settings.text("site_tagline", "").await,
    })
}

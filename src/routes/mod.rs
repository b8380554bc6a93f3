use axum::Router;

use crate::AppState;

/// Admin endpoints. Every handler takes the bearer-JWT extractor.
pub mod admin;
/// Password login for admins.
pub mod auth;
/// Magic-link pick submission.
pub mod picks;
/// Unauthenticated leaderboard and champions endpoints.
pub mod public;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", auth::router())
        .nest("/api/admin", admin::router())
        .nest("/api/public", public::router())
        .nest("/api/picks", picks::router())
        .with_state(state)
}

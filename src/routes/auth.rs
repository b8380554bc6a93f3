use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{issue_admin_token, verify_password};
use crate::database::AdminDatabase;
use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    is_super: bool,
}

/// Password login. Unknown emails and wrong passwords share one message.
async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let mut messages = Vec::new();
    if body.email.trim().is_empty() {
        messages.push("email is required");
    }
    if body.password.is_empty() {
        messages.push("password is required");
    }
    if !messages.is_empty() {
        return Err(AppError::validation(messages));
    }

    let admin = state
        .db
        .get_admin_by_email(body.email.trim())
        .await?
        .filter(|admin| verify_password(&body.password, &admin.password_hash))
        .ok_or_else(|| AppError::Unauthorized("Invalid email or password.".to_string()))?;

    let token = issue_admin_token(&state.config.jwt_secret, &admin)?;
    info!("Admin {} logged in", admin.email);

    Ok(Json(LoginResponse {
        token,
        is_super: admin.is_super,
    }))
}

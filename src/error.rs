use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// The error type returned by every fallible operation in the service.
///
/// Route handlers never build HTTP responses from raw internal errors; the
/// `IntoResponse` impl below is the single place where errors are mapped to
/// status codes, and anything unrecognized falls through to a bare 500.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad input shape, rejected before any write. Carries one message per
    /// offending field.
    #[error("validation failed")]
    Validation(Vec<String>),

    /// A state precondition was violated (locked round, season not ready to
    /// end, etc.). The message names the violated condition.
    #[error("{0}")]
    Precondition(String),

    /// A unique-key or concurrent-update conflict that survived retrying.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// Missing or invalid credentials. Magic-link failures always use the
    /// same generic message so callers cannot probe for valid tokens.
    #[error("{0}")]
    Unauthorized(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(messages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Validation(messages.into_iter().map(Into::into).collect())
    }

    /// The shared response for any magic-link lookup failure. Expired,
    /// unknown and locked-out tokens are deliberately indistinguishable.
    pub fn invalid_link() -> Self {
        Self::Unauthorized("This link is invalid or has expired.".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(messages) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "validation failed", "messages": messages }),
            ),
            AppError::Precondition(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": msg }))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::Database(e) => {
                error!("Database error while handling request: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Something went wrong. Please try again later." }),
                )
            }
            AppError::Internal(e) => {
                error!("Unexpected error while handling request: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Something went wrong. Please try again later." }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_precondition_map_to_422() {
        let validation = AppError::validation(["name is required"]).into_response();
        assert_eq!(validation.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let precondition =
            AppError::Precondition("Season has already ended.".to_string()).into_response();
        assert_eq!(precondition.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn each_remaining_variant_keeps_its_status() {
        let cases = [
            (
                AppError::Conflict("conflict".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                AppError::NotFound("missing".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (AppError::invalid_link(), StatusCode::UNAUTHORIZED),
            (
                AppError::Database(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}

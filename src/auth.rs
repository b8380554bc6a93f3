use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::database::models::Admin;
use crate::error::AppError;
use crate::AppState;

const TOKEN_LIFETIME_HOURS: i64 = 24;

/// Claims carried in an admin bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminClaims {
    /// The admin's database id.
    pub sub: i64,
    pub email: String,
    pub is_super: bool,
    pub exp: i64,
}

impl AdminClaims {
    pub fn require_super(&self) -> Result<(), AppError> {
        if self.is_super {
            Ok(())
        } else {
            Err(AppError::Unauthorized(
                "This operation requires a super admin.".to_string(),
            ))
        }
    }
}

pub fn issue_admin_token(secret: &str, admin: &Admin) -> Result<String, AppError> {
    let claims = AdminClaims {
        sub: admin.id,
        email: admin.email.clone(),
        is_super: admin.is_super,
        exp: (Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(anyhow::Error::from)?;
    Ok(token)
}

pub fn verify_admin_token(secret: &str, token: &str) -> Result<AdminClaims, AppError> {
    decode::<AdminClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid or expired session.".to_string()))
}

/// Extracts and validates the bearer token on admin routes.
#[async_trait]
impl FromRequestParts<AppState> for AdminClaims {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token.".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token.".to_string()))?;
        verify_admin_token(&state.config.jwt_secret, token)
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| anyhow::Error::from(e).into())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    bcrypt::verify(password, password_hash).unwrap_or(false)
}

/// Mints a fresh magic-link token. 128 random bits, rendered without dashes
/// so it drops cleanly into a URL path segment.
pub fn new_link_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Digest stored in (and compared against) the magic_links table. The raw
/// token only ever exists in the emailed URL.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Admin {
        Admin {
            id: 7,
            email: "admin@example.com".to_string(),
            password_hash: String::new(),
            is_super: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn token_roundtrip_preserves_claims() {
        let token = issue_admin_token("secret", &admin()).unwrap();
        let claims = verify_admin_token("secret", &token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.email, "admin@example.com");
        assert!(claims.is_super);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = issue_admin_token("secret", &admin()).unwrap();
        assert!(verify_admin_token("other", &token).is_err());
    }

    #[test]
    fn hash_token_is_stable_and_hides_the_input() {
        let token = "a3f9";
        assert_eq!(hash_token(token), hash_token(token));
        assert_ne!(hash_token(token), token);
        assert_ne!(hash_token(token), hash_token("a3f8"));
        // sha256 hex
        assert_eq!(hash_token(token).len(), 64);
    }

    #[test]
    fn link_tokens_are_unique_and_url_safe() {
        let a = new_link_token();
        let b = new_link_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

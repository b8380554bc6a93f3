use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

/// Runtime configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Secret used to sign admin JWTs.
    pub jwt_secret: String,
    /// Public base URL of the frontend, used to build magic links.
    pub base_url: String,
    pub mail_api_url: String,
    pub mail_api_key: String,
    pub mail_from: String,
    /// Seed credentials for the first super admin; ignored once any admin
    /// account exists.
    pub admin_email: String,
    pub admin_password: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORT", "3000"),
            database_url: require("DATABASE_URL"),
            jwt_secret: require("JWT_SECRET"),
            base_url: try_load("BASE_URL", "http://localhost:3000"),
            mail_api_url: try_load("MAIL_API_URL", ""),
            mail_api_key: try_load("MAIL_API_KEY", ""),
            mail_from: try_load("MAIL_FROM", "picks@gomakeyourpicks.example"),
            admin_email: try_load("ADMIN_EMAIL", ""),
            admin_password: try_load("ADMIN_PASSWORD", ""),
        }
    }
}

fn require(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("Expected {key} as an environment variable"))
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    env::var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

use std::fs::File;
use std::sync::Arc;

use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use config::Config;
use database::{AdminDatabase, PgDatabase};
use error::AppError;
use mail::Mailer;
use settings::SettingsProvider;

/// Admin JWT handling, password checks and magic-link token hashing.
mod auth;
/// A small TTL cache used by the settings provider.
mod cache;
/// Environment-driven runtime configuration.
mod config;
/// Traits and types used for interacting with the database.
mod database;
/// The error taxonomy and its HTTP status mapping.
mod error;
/// Fire-and-forget transactional email.
mod mail;
/// All the HTTP routes the service exposes.
mod routes;
/// The scoring engine: picks + results → per-round score rows.
mod scoring;
/// Cached access to the place→points table and text settings.
mod settings;
/// The leaderboard aggregator and tie-aware ranking.
mod standings;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub db: PgDatabase,
    pub settings: Arc<SettingsProvider>,
    pub mailer: Mailer,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = setup_tracing() {
        panic!("Error trying to setup tracing: {}", e);
    }

    if let Err(e) = run().await {
        panic!("Error trying to run the server: {}", e);
    }
}

async fn run() -> Result<(), AppError> {
    // Load the .env file only in the development environment (bypassed with the --release flag)
    #[cfg(debug_assertions)]
    dotenv::dotenv().ok();

    let config = Config::load();

    let db = PgDatabase::connect(&config.database_url).await?;
    db.migrate().await?;
    info!("Database migrations are up to date");

    bootstrap_admin(&db, &config).await?;

    let state = AppState {
        settings: Arc::new(SettingsProvider::new(db.clone())),
        mailer: Mailer::new(&config),
        config: Arc::new(config.clone()),
        db,
    };

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .map_err(anyhow::Error::from)?;
    info!("Listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .map_err(anyhow::Error::from)?;

    Ok(())
}

/// Creates the first super admin from the environment so a fresh deployment
/// can log in. Does nothing once any admin account exists.
async fn bootstrap_admin(db: &PgDatabase, config: &Config) -> Result<(), AppError> {
    if config.admin_email.is_empty() || config.admin_password.is_empty() {
        return Ok(());
    }
    if db.count_admins().await? > 0 {
        return Ok(());
    }

    let password_hash = auth::hash_password(&config.admin_password)?;
    db.upsert_admin(&config.admin_email, &password_hash, true)
        .await?;
    info!("Bootstrapped super admin {}", config.admin_email);
    Ok(())
}

/// Sets up the tracing subscriber for the server.
fn setup_tracing() -> anyhow::Result<()> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("go_make_your_picks=info".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create("server.log")?;

    // Only errors are logged in production
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}

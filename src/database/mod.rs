use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::AppError;
use models::*;

/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;

/// How many times a pick submission is retried when the database reports a
/// transient lock conflict, and the base delay between attempts.
const LOCK_RETRY_ATTEMPTS: u32 = 3;
const LOCK_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// The Postgres database used by the picks service.
///
/// All durable state lives here; per-concern traits below group the queries
/// the same way the route handlers consume them. Swapping the implementation
/// of those traits only changes which database backs the service, not the
/// schema.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pub pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPool::connect(database_url).await?;
        info!("Successfully connected to the database.");

        Ok(PgDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }
}

/// Whether an error is a transient serialization/deadlock conflict worth
/// retrying (SQLSTATE 40001 and 40P01).
fn is_lock_conflict(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => {
            matches!(db_error.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

#[allow(async_fn_in_trait)]
pub trait AdminDatabase {
    type Error;

    /// Retrieves an admin account by email for password login.
    async fn get_admin_by_email(&self, email: &str) -> Result<Option<Admin>, Self::Error>;

    /// Creates an admin account, updating the password if the email exists.
    async fn upsert_admin(
        &self,
        email: &str,
        password_hash: &str,
        is_super: bool,
    ) -> Result<(), Self::Error>;

    async fn count_admins(&self) -> Result<i64, Self::Error>;
}

impl AdminDatabase for PgDatabase {
    type Error = AppError;

    async fn get_admin_by_email(&self, email: &str) -> Result<Option<Admin>, Self::Error> {
        let admin = sqlx::query_as::<_, Admin>(
            r#"
            SELECT id, email, password_hash, is_super, created_at
            FROM admins
            WHERE email = $1
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(admin)
    }

    async fn upsert_admin(
        &self,
        email: &str,
        password_hash: &str,
        is_super: bool,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO admins (email, password_hash, is_super)
            VALUES ($1, $2, $3)
            ON CONFLICT (email)
            DO UPDATE SET
                password_hash = EXCLUDED.password_hash,
                is_super = EXCLUDED.is_super
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(is_super)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_admins(&self) -> Result<i64, Self::Error> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM admins")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[allow(async_fn_in_trait)]
pub trait UserDatabase {
    type Error;

    /// Adds a participant to the database.
    async fn create_user(&self, name: &str, email: &str) -> Result<Participant, Self::Error>;

    async fn get_user(&self, user_id: i64) -> Result<Option<Participant>, Self::Error>;

    async fn get_users(&self) -> Result<Vec<Participant>, Self::Error>;
}

impl UserDatabase for PgDatabase {
    type Error = AppError;

    async fn create_user(&self, name: &str, email: &str) -> Result<Participant, Self::Error> {
        let user = sqlx::query_as::<_, Participant>(
            r#"
            INSERT INTO users (name, email)
            VALUES ($1, $2)
            RETURNING id, name, email, created_at
            "#,
        )
        .bind(name)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<Participant>, Self::Error> {
        let user = sqlx::query_as::<_, Participant>(
            r#"
            SELECT id, name, email, created_at
            FROM users
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_users(&self) -> Result<Vec<Participant>, Self::Error> {
        let users = sqlx::query_as::<_, Participant>(
            r#"
            SELECT id, name, email, created_at
            FROM users
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

#[allow(async_fn_in_trait)]
pub trait SeasonDatabase {
    type Error;

    /// Creates a season in the database, returning the full row.
    async fn create_season(
        &self,
        name: &str,
        year_start: i32,
        year_end: i32,
    ) -> Result<Season, Self::Error>;

    async fn get_season(&self, season_id: i64) -> Result<Option<Season>, Self::Error>;

    /// Retrieves all non-deleted seasons, newest first.
    async fn get_seasons(&self) -> Result<Vec<Season>, Self::Error>;

    /// Retrieves ended, non-deleted seasons for the champions display.
    async fn get_ended_seasons(&self) -> Result<Vec<Season>, Self::Error>;

    /// Soft-deletes a season. The row and its history stay in place.
    async fn soft_delete_season(&self, season_id: i64) -> Result<(), Self::Error>;

    /// Permanently removes a previously soft-deleted season and everything
    /// hanging off it. Restricted to super admins at the route level.
    async fn hard_delete_season(&self, season_id: i64) -> Result<(), Self::Error>;

    /// Enters a participant into a season's membership.
    async fn add_member(&self, season_id: i64, user_id: i64) -> Result<(), Self::Error>;

    async fn get_members(&self, season_id: i64) -> Result<Vec<Participant>, Self::Error>;

    /// Retrieves every score row belonging to the season's completed rounds.
    async fn get_season_scores(&self, season_id: i64) -> Result<Vec<ScoreRow>, Self::Error>;

    /// Snapshots final standings and marks the season ended, all in one
    /// transaction. Stale winner rows from an earlier failed attempt are
    /// cleared first so the operation is safe to retry.
    async fn finalize_season(
        &self,
        season_id: i64,
        winners: &[(i64, i32, i64)],
        point_values: &serde_json::Value,
    ) -> Result<(), Self::Error>;

    /// Clears the end timestamp and deletes the winner snapshot, returning
    /// the season to live state. The only supported undo for finalize.
    async fn reopen_season(&self, season_id: i64) -> Result<(), Self::Error>;

    async fn get_season_winners(&self, season_id: i64) -> Result<Vec<SeasonWinner>, Self::Error>;
}

impl SeasonDatabase for PgDatabase {
    type Error = AppError;

    async fn create_season(
        &self,
        name: &str,
        year_start: i32,
        year_end: i32,
    ) -> Result<Season, Self::Error> {
        let season = sqlx::query_as::<_, Season>(
            r#"
            INSERT INTO seasons (name, year_start, year_end)
            VALUES ($1, $2, $3)
            RETURNING id, name, year_start, year_end, is_active, is_default,
                      ended_at, deleted, created_at
            "#,
        )
        .bind(name)
        .bind(year_start)
        .bind(year_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(season)
    }

    async fn get_season(&self, season_id: i64) -> Result<Option<Season>, Self::Error> {
        let season = sqlx::query_as::<_, Season>(
            r#"
            SELECT id, name, year_start, year_end, is_active, is_default,
                   ended_at, deleted, created_at
            FROM seasons
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(season_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(season)
    }

    async fn get_seasons(&self) -> Result<Vec<Season>, Self::Error> {
        let seasons = sqlx::query_as::<_, Season>(
            r#"
            SELECT id, name, year_start, year_end, is_active, is_default,
                   ended_at, deleted, created_at
            FROM seasons
            WHERE deleted = false
            ORDER BY year_start DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(seasons)
    }

    async fn get_ended_seasons(&self) -> Result<Vec<Season>, Self::Error> {
        let seasons = sqlx::query_as::<_, Season>(
            r#"
            SELECT id, name, year_start, year_end, is_active, is_default,
                   ended_at, deleted, created_at
            FROM seasons
            WHERE deleted = false AND ended_at IS NOT NULL
            ORDER BY ended_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(seasons)
    }

    async fn soft_delete_season(&self, season_id: i64) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            UPDATE seasons
            SET deleted = true,
                is_active = false,
                is_default = false
            WHERE id = $1
            "#,
        )
        .bind(season_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn hard_delete_season(&self, season_id: i64) -> Result<(), Self::Error> {
        sqlx::query("DELETE FROM seasons WHERE id = $1 AND deleted = true")
            .bind(season_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_member(&self, season_id: i64, user_id: i64) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO season_members (season_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (season_id, user_id) DO NOTHING
            "#,
        )
        .bind(season_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_members(&self, season_id: i64) -> Result<Vec<Participant>, Self::Error> {
        let members = sqlx::query_as::<_, Participant>(
            r#"
            SELECT u.id, u.name, u.email, u.created_at
            FROM users AS u
            INNER JOIN season_members AS sm
            ON u.id = sm.user_id
            WHERE sm.season_id = $1
            ORDER BY u.name
            "#,
        )
        .bind(season_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    async fn get_season_scores(&self, season_id: i64) -> Result<Vec<ScoreRow>, Self::Error> {
        let scores = sqlx::query_as::<_, ScoreRow>(
            r#"
            SELECT s.round_id, s.user_id, s.place, s.tally
            FROM scores AS s
            INNER JOIN rounds AS r
            ON s.round_id = r.id
            WHERE r.season_id = $1 AND r.status = 'completed'
            "#,
        )
        .bind(season_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(scores)
    }

    async fn finalize_season(
        &self,
        season_id: i64,
        winners: &[(i64, i32, i64)],
        point_values: &serde_json::Value,
    ) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM season_winners WHERE season_id = $1")
            .bind(season_id)
            .execute(&mut *tx)
            .await?;

        for (user_id, rank, total_points) in winners {
            sqlx::query(
                r#"
                INSERT INTO season_winners (season_id, user_id, rank, total_points, point_values)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(season_id)
            .bind(user_id)
            .bind(rank)
            .bind(total_points)
            .bind(point_values)
            .execute(&mut *tx)
            .await?;
        }

        // The ended_at guard makes a lost race surface as a conflict rather
        // than a double snapshot.
        let updated = sqlx::query(
            r#"
            UPDATE seasons
            SET ended_at = now()
            WHERE id = $1 AND ended_at IS NULL AND deleted = false
            "#,
        )
        .bind(season_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            return Err(AppError::Conflict(
                "Season was ended by another request.".to_string(),
            ));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn reopen_season(&self, season_id: i64) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE seasons
            SET ended_at = NULL
            WHERE id = $1 AND ended_at IS NOT NULL
            "#,
        )
        .bind(season_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            return Err(AppError::Precondition(
                "Season has not ended, so there is nothing to reopen.".to_string(),
            ));
        }

        sqlx::query("DELETE FROM season_winners WHERE season_id = $1")
            .bind(season_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_season_winners(&self, season_id: i64) -> Result<Vec<SeasonWinner>, Self::Error> {
        let winners = sqlx::query_as::<_, SeasonWinner>(
            r#"
            SELECT season_id, user_id, rank, total_points, point_values, created_at
            FROM season_winners
            WHERE season_id = $1
            ORDER BY rank, user_id
            "#,
        )
        .bind(season_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(winners)
    }
}

#[allow(async_fn_in_trait)]
pub trait RoundDatabase {
    type Error;

    /// Creates a round together with its registered options.
    async fn create_round(
        &self,
        season_id: i64,
        sport: &str,
        pick_count: i16,
        write_in: bool,
        lock_time: DateTime<Utc>,
        options: &[String],
    ) -> Result<Round, Self::Error>;

    async fn get_round(&self, round_id: i64) -> Result<Option<Round>, Self::Error>;

    async fn get_rounds_by_season(&self, season_id: i64) -> Result<Vec<Round>, Self::Error>;

    /// Updates the status of a round.
    async fn set_round_status(
        &self,
        round_id: i64,
        new_status: RoundStatus,
    ) -> Result<(), Self::Error>;

    async fn get_round_options(&self, round_id: i64) -> Result<Vec<RoundOption>, Self::Error>;

    async fn get_round_result(&self, round_id: i64) -> Result<Vec<PlacedOption>, Self::Error>;

    /// Retrieves the season's rounds that are not yet completed. Used to
    /// report finalize-precondition failures by name.
    async fn get_unfinished_rounds(&self, season_id: i64) -> Result<Vec<Round>, Self::Error>;

    /// Stores a round's result and its freshly computed score rows and marks
    /// the round completed, all in one transaction. Prior results and scores
    /// for the round are overwritten, never duplicated.
    async fn complete_round(
        &self,
        round_id: i64,
        result: &[PlacedOption],
        scores: &[ScoreRow],
    ) -> Result<(), Self::Error>;
}

impl RoundDatabase for PgDatabase {
    type Error = AppError;

    async fn create_round(
        &self,
        season_id: i64,
        sport: &str,
        pick_count: i16,
        write_in: bool,
        lock_time: DateTime<Utc>,
        options: &[String],
    ) -> Result<Round, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let round = sqlx::query_as::<_, Round>(
            r#"
            INSERT INTO rounds (season_id, sport, pick_count, write_in, lock_time)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, season_id, sport, pick_count, write_in, lock_time, status, created_at
            "#,
        )
        .bind(season_id)
        .bind(sport)
        .bind(pick_count)
        .bind(write_in)
        .bind(lock_time)
        .fetch_one(&mut *tx)
        .await?;

        for label in options {
            sqlx::query("INSERT INTO round_options (round_id, label) VALUES ($1, $2)")
                .bind(round.id)
                .bind(label)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(round)
    }

    async fn get_round(&self, round_id: i64) -> Result<Option<Round>, Self::Error> {
        let round = sqlx::query_as::<_, Round>(
            r#"
            SELECT id, season_id, sport, pick_count, write_in, lock_time, status, created_at
            FROM rounds
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(round)
    }

    async fn get_rounds_by_season(&self, season_id: i64) -> Result<Vec<Round>, Self::Error> {
        let rounds = sqlx::query_as::<_, Round>(
            r#"
            SELECT id, season_id, sport, pick_count, write_in, lock_time, status, created_at
            FROM rounds
            WHERE season_id = $1
            ORDER BY lock_time, id
            "#,
        )
        .bind(season_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rounds)
    }

    async fn set_round_status(
        &self,
        round_id: i64,
        new_status: RoundStatus,
    ) -> Result<(), Self::Error> {
        sqlx::query("UPDATE rounds SET status = $1 WHERE id = $2")
            .bind(new_status)
            .bind(round_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_round_options(&self, round_id: i64) -> Result<Vec<RoundOption>, Self::Error> {
        let options = sqlx::query_as::<_, RoundOption>(
            r#"
            SELECT id, round_id, label
            FROM round_options
            WHERE round_id = $1
            ORDER BY label
            "#,
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(options)
    }

    async fn get_round_result(&self, round_id: i64) -> Result<Vec<PlacedOption>, Self::Error> {
        let result = sqlx::query_as::<_, PlacedOption>(
            r#"
            SELECT place, option_id
            FROM round_results
            WHERE round_id = $1
            ORDER BY place
            "#,
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    async fn get_unfinished_rounds(&self, season_id: i64) -> Result<Vec<Round>, Self::Error> {
        let rounds = sqlx::query_as::<_, Round>(
            r#"
            SELECT id, season_id, sport, pick_count, write_in, lock_time, status, created_at
            FROM rounds
            WHERE season_id = $1 AND status != 'completed'
            ORDER BY lock_time, id
            "#,
        )
        .bind(season_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rounds)
    }

    async fn complete_round(
        &self,
        round_id: i64,
        result: &[PlacedOption],
        scores: &[ScoreRow],
    ) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM round_results WHERE round_id = $1")
            .bind(round_id)
            .execute(&mut *tx)
            .await?;

        for placed in result {
            sqlx::query(
                r#"
                INSERT INTO round_results (round_id, place, option_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(round_id)
            .bind(placed.place)
            .bind(placed.option_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM scores WHERE round_id = $1")
            .bind(round_id)
            .execute(&mut *tx)
            .await?;

        for score in scores {
            sqlx::query(
                r#"
                INSERT INTO scores (round_id, user_id, place, tally)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(score.round_id)
            .bind(score.user_id)
            .bind(score.place)
            .bind(score.tally)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE rounds SET status = 'completed' WHERE id = $1")
            .bind(round_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[allow(async_fn_in_trait)]
pub trait PickDatabase {
    type Error;

    /// Retrieves every stored pick item for a round, joined to option labels.
    async fn get_round_pick_items(&self, round_id: i64) -> Result<Vec<PickItemRow>, Self::Error>;

    /// Retrieves one participant's stored pick items for a round.
    async fn get_user_pick_items(
        &self,
        round_id: i64,
        user_id: i64,
    ) -> Result<Vec<PickItemRow>, Self::Error>;

    /// Replaces a participant's pick for a round with the given values.
    ///
    /// Write-in values are resolved to option rows on the fly inside the
    /// same transaction. A second submission replaces all prior items rather
    /// than appending. Transient lock conflicts between concurrent
    /// submissions are retried with exponential backoff; the last
    /// transaction to commit wins.
    async fn upsert_pick(
        &self,
        user_id: i64,
        round_id: i64,
        values: &[PickValue],
    ) -> Result<(), Self::Error>;
}

impl PickDatabase for PgDatabase {
    type Error = AppError;

    async fn get_round_pick_items(&self, round_id: i64) -> Result<Vec<PickItemRow>, Self::Error> {
        let items = sqlx::query_as::<_, PickItemRow>(
            r#"
            SELECT p.user_id, p.round_id, pi.slot, pi.option_id, ro.label
            FROM picks AS p
            INNER JOIN pick_items AS pi
            ON p.id = pi.pick_id
            INNER JOIN round_options AS ro
            ON pi.option_id = ro.id
            WHERE p.round_id = $1
            ORDER BY p.user_id, pi.slot
            "#,
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn get_user_pick_items(
        &self,
        round_id: i64,
        user_id: i64,
    ) -> Result<Vec<PickItemRow>, Self::Error> {
        let items = sqlx::query_as::<_, PickItemRow>(
            r#"
            SELECT p.user_id, p.round_id, pi.slot, pi.option_id, ro.label
            FROM picks AS p
            INNER JOIN pick_items AS pi
            ON p.id = pi.pick_id
            INNER JOIN round_options AS ro
            ON pi.option_id = ro.id
            WHERE p.round_id = $1 AND p.user_id = $2
            ORDER BY pi.slot
            "#,
        )
        .bind(round_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn upsert_pick(
        &self,
        user_id: i64,
        round_id: i64,
        values: &[PickValue],
    ) -> Result<(), Self::Error> {
        let mut attempt = 0;
        loop {
            match self.try_upsert_pick(user_id, round_id, values).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < LOCK_RETRY_ATTEMPTS && is_lock_conflict(&e) => {
                    attempt += 1;
                    let delay = LOCK_RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    warn!(
                        "Lock conflict upserting pick for user {user_id} in round {round_id}, \
                         retrying in {delay:?} (attempt {attempt}/{LOCK_RETRY_ATTEMPTS})"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if is_lock_conflict(&e) {
                        return Err(AppError::Conflict(
                            "Your pick could not be saved due to a conflicting submission. \
                             Please try again."
                                .to_string(),
                        ));
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

impl PgDatabase {
    async fn try_upsert_pick(
        &self,
        user_id: i64,
        round_id: i64,
        values: &[PickValue],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut option_ids = Vec::with_capacity(values.len());
        for value in values {
            let option_id = match value {
                PickValue::Existing(id) => *id,
                PickValue::WriteIn(label) => {
                    // The no-op DO UPDATE makes RETURNING yield the existing
                    // row when the label is already registered.
                    sqlx::query_scalar::<_, i64>(
                        r#"
                        INSERT INTO round_options (round_id, label)
                        VALUES ($1, $2)
                        ON CONFLICT (round_id, label)
                        DO UPDATE SET label = EXCLUDED.label
                        RETURNING id
                        "#,
                    )
                    .bind(round_id)
                    .bind(label)
                    .fetch_one(&mut *tx)
                    .await?
                }
            };
            option_ids.push(option_id);
        }

        let pick_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO picks (user_id, round_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, round_id)
            DO UPDATE SET updated_at = now()
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(round_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pick_items WHERE pick_id = $1")
            .bind(pick_id)
            .execute(&mut *tx)
            .await?;

        for (slot, option_id) in option_ids.iter().enumerate() {
            sqlx::query("INSERT INTO pick_items (pick_id, slot, option_id) VALUES ($1, $2, $3)")
                .bind(pick_id)
                .bind(slot as i16)
                .bind(option_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[allow(async_fn_in_trait)]
pub trait SettingsDatabase {
    type Error;

    async fn get_scoring_places(&self) -> Result<Vec<ScoringPlace>, Self::Error>;

    /// Replaces the whole place→points table.
    async fn set_scoring_places(&self, places: &[ScoringPlace]) -> Result<(), Self::Error>;

    async fn get_settings(&self) -> Result<Vec<Setting>, Self::Error>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), Self::Error>;
}

impl SettingsDatabase for PgDatabase {
    type Error = AppError;

    async fn get_scoring_places(&self) -> Result<Vec<ScoringPlace>, Self::Error> {
        let places = sqlx::query_as::<_, ScoringPlace>(
            "SELECT place, points FROM scoring_places ORDER BY place",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(places)
    }

    async fn set_scoring_places(&self, places: &[ScoringPlace]) -> Result<(), Self::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM scoring_places")
            .execute(&mut *tx)
            .await?;

        for place in places {
            sqlx::query("INSERT INTO scoring_places (place, points) VALUES ($1, $2)")
                .bind(place.place)
                .bind(place.points)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_settings(&self) -> Result<Vec<Setting>, Self::Error> {
        let settings =
            sqlx::query_as::<_, Setting>("SELECT key, value FROM settings ORDER BY key")
                .fetch_all(&self.pool)
                .await?;
        Ok(settings)
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[allow(async_fn_in_trait)]
pub trait MagicLinkDatabase {
    type Error;

    /// Stores the hash of a freshly minted magic-link token.
    async fn store_magic_link(
        &self,
        token_hash: &str,
        round_id: i64,
        user_id: Option<i64>,
        email: &str,
    ) -> Result<(), Self::Error>;

    /// Looks a link up by token hash. The caller is responsible for checking
    /// the round's lock time; expired links are not distinguishable here.
    async fn get_magic_link(&self, token_hash: &str) -> Result<Option<MagicLink>, Self::Error>;

    /// Resolves the participants a link speaks for: the bound participant,
    /// or every member of the round's season sharing the link's email.
    async fn get_link_participants(
        &self,
        link: &MagicLink,
    ) -> Result<Vec<Participant>, Self::Error>;
}

impl MagicLinkDatabase for PgDatabase {
    type Error = AppError;

    async fn store_magic_link(
        &self,
        token_hash: &str,
        round_id: i64,
        user_id: Option<i64>,
        email: &str,
    ) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO magic_links (token_hash, round_id, user_id, email)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(token_hash)
        .bind(round_id)
        .bind(user_id)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_magic_link(&self, token_hash: &str) -> Result<Option<MagicLink>, Self::Error> {
        let link = sqlx::query_as::<_, MagicLink>(
            r#"
            SELECT id, token_hash, round_id, user_id, email, created_at
            FROM magic_links
            WHERE token_hash = $1
            LIMIT 1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    async fn get_link_participants(
        &self,
        link: &MagicLink,
    ) -> Result<Vec<Participant>, Self::Error> {
        if let Some(user_id) = link.user_id {
            return Ok(self.get_user(user_id).await?.into_iter().collect());
        }

        let members = sqlx::query_as::<_, Participant>(
            r#"
            SELECT u.id, u.name, u.email, u.created_at
            FROM users AS u
            INNER JOIN season_members AS sm
            ON u.id = sm.user_id
            INNER JOIN rounds AS r
            ON sm.season_id = r.season_id
            WHERE r.id = $1 AND LOWER(u.email) = LOWER($2)
            ORDER BY u.name
            "#,
        )
        .bind(link.round_id)
        .bind(&link.email)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }
}

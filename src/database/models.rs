use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// The place that records "no matching pick" (or no pick at all) for a round.
///
/// Its point value lives in `scoring_places` like any real place and may be
/// zero or negative depending on how the pool is configured.
pub const NO_PICK_PLACE: i16 = 0;

/// The lifecycle of a round. Picks are only accepted while a round is active
/// and its lock time has not passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize, Display, Default)]
#[sqlx(type_name = "round_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    #[default]
    #[strum(to_string = "Draft")]
    Draft,
    #[strum(to_string = "Open for picks")]
    Active,
    #[strum(to_string = "Locked")]
    Locked,
    #[strum(to_string = "Completed")]
    Completed,
}

/// A season within the database. Owns rounds and a membership list.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Season {
    pub id: i64,
    pub name: String,
    pub year_start: i32,
    pub year_end: i32,
    pub is_active: bool,
    pub is_default: bool,
    pub ended_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Season {
    /// An ended season is terminal until an admin explicitly reopens it.
    pub fn has_ended(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// A round within the database, associated with a particular season.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Round {
    pub id: i64,
    pub season_id: i64,
    pub sport: String,
    /// How many pick items a participant may submit (1 or 2).
    pub pick_count: i16,
    /// Whether unrecognized free-text values create options on the fly.
    pub write_in: bool,
    pub lock_time: DateTime<Utc>,
    pub status: RoundStatus,
    pub created_at: DateTime<Utc>,
}

impl Round {
    pub fn accepts_picks(&self, now: DateTime<Utc>) -> bool {
        self.status == RoundStatus::Active && now < self.lock_time
    }
}

/// A selectable option (team) registered for a round.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RoundOption {
    pub id: i64,
    pub round_id: i64,
    pub label: String,
}

/// A person who can be added to season memberships and submit picks.
///
/// Emails are not unique: several participants may share one inbox and
/// receive a single shared magic link per round.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Participant {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// One row of a round's official result: which option finished at which
/// place. Places are unique per round, as is each option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlacedOption {
    pub place: i16,
    pub option_id: i64,
}

/// A participant's stored pick item for a round, joined to its option label.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PickItemRow {
    pub user_id: i64,
    pub round_id: i64,
    pub slot: i16,
    pub option_id: i64,
    pub label: String,
}

/// Derived per-round scoring data: how many of a participant's picks matched
/// at a given place. Point values are applied when reading, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScoreRow {
    pub round_id: i64,
    pub user_id: i64,
    pub place: i16,
    pub tally: i32,
}

/// One row of the current place→points table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScoringPlace {
    pub place: i16,
    pub points: i64,
}

/// A frozen snapshot of a participant's final standing in an ended season.
///
/// `point_values` captures the place→points table in effect at finalize time
/// so later rule edits never rewrite history.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct SeasonWinner {
    pub season_id: i64,
    pub user_id: i64,
    pub rank: i32,
    pub total_points: i64,
    pub point_values: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A magic-link credential within the database. The raw token is never
/// stored; lookups compare SHA-256 digests. A null `user_id` marks a
/// shared-email link covering every member on that address.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct MagicLink {
    pub id: i64,
    pub token_hash: String,
    pub round_id: i64,
    pub user_id: Option<i64>,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// An administrator account within the database.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Admin {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_super: bool,
    pub created_at: DateTime<Utc>,
}

/// A short text setting (title, tagline) keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// A submitted pick value: either a registered option id or free text that a
/// write-in round resolves to an option on the fly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PickValue {
    Existing(i64),
    WriteIn(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pick_value_parses_ids_and_text() {
        let values: Vec<PickValue> = serde_json::from_str(r#"[42, "Team A"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                PickValue::Existing(42),
                PickValue::WriteIn("Team A".to_string())
            ]
        );
    }

    #[test]
    fn rounds_only_accept_picks_while_active_and_unlocked() {
        let now = Utc::now();
        let mut round = Round {
            id: 1,
            season_id: 1,
            sport: "NFL".to_string(),
            pick_count: 1,
            write_in: false,
            lock_time: now + Duration::hours(1),
            status: RoundStatus::Active,
            created_at: now,
        };
        assert!(round.accepts_picks(now));

        round.status = RoundStatus::Locked;
        assert!(!round.accepts_picks(now));

        round.status = RoundStatus::Active;
        round.lock_time = now - Duration::minutes(1);
        assert!(!round.accepts_picks(now));
    }
}

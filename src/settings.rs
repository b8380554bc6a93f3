use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::cache::TtlCache;
use crate::database::{PgDatabase, SettingsDatabase};

const SETTINGS_TTL: Duration = Duration::from_secs(60);
const POINTS_KEY: &str = "points";
const TEXT_PREFIX: &str = "text:";

/// Read-through provider for the place→points table and short text settings.
///
/// Scoring and leaderboard requests hit this on every call, so values are
/// cached for a minute and the whole cache is dropped when an admin updates
/// settings. If the store is unreadable the hardcoded defaults are served
/// instead of failing the request.
pub struct SettingsProvider {
    db: PgDatabase,
    points: TtlCache<HashMap<i16, i64>>,
    texts: TtlCache<String>,
}

impl SettingsProvider {
    pub fn new(db: PgDatabase) -> Self {
        Self {
            db,
            points: TtlCache::new(SETTINGS_TTL),
            texts: TtlCache::new(SETTINGS_TTL),
        }
    }

    /// The values used when the database has never been seeded or cannot be
    /// read: winner 6, runner-up 3, nothing for a missed pick.
    pub fn default_point_values() -> HashMap<i16, i64> {
        HashMap::from([(0, 0), (1, 6), (2, 3)])
    }

    pub async fn point_values(&self) -> HashMap<i16, i64> {
        if let Some(values) = self.points.get(POINTS_KEY) {
            return values;
        }

        let values = match self.db.get_scoring_places().await {
            Ok(places) if !places.is_empty() => places
                .into_iter()
                .map(|place| (place.place, place.points))
                .collect(),
            Ok(_) => Self::default_point_values(),
            Err(e) => {
                warn!("Failed to load scoring places, serving defaults: {e}");
                Self::default_point_values()
            }
        };

        self.points.set(POINTS_KEY, values.clone());
        values
    }

    pub async fn text(&self, key: &str, default: &str) -> String {
        let cache_key = format!("{TEXT_PREFIX}{key}");
        if let Some(value) = self.texts.get(&cache_key) {
            return value;
        }

        let value = match self.db.get_settings().await {
            Ok(settings) => settings
                .into_iter()
                .find(|setting| setting.key == key)
                .map(|setting| setting.value)
                .unwrap_or_else(|| default.to_string()),
            Err(e) => {
                warn!("Failed to load setting {key}, serving default: {e}");
                default.to_string()
            }
        };

        self.texts.set(cache_key, value.clone());
        value
    }

    /// Wholesale invalidation, called whenever an admin updates settings.
    pub fn invalidate(&self) {
        self.points.clear();
        self.texts.invalidate_prefix(TEXT_PREFIX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_sentinel_place() {
        let defaults = SettingsProvider::default_point_values();
        assert_eq!(defaults.get(&0), Some(&0));
        assert_eq!(defaults.get(&1), Some(&6));
        assert_eq!(defaults.get(&2), Some(&3));
    }
}

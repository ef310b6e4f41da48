//! Game-side records: the raw game catalog row and its projections.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One catalog entry as ingested from the games dataset
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GameRecord {
    pub game_id: i64,
    pub name: String,
    /// Comma-separated genre tags
    pub genres: String,
    /// Free-form date, e.g. `"Oct 21, 2008"`
    pub release_date: String,
    pub avg_playtime: i64,
    pub windows: bool,
    pub linux: bool,
    pub mac: bool,
}

impl GameRecord {
    /// Whether one of the comma-separated genre tags matches exactly.
    pub fn has_genre(&self, genre: &str) -> bool {
        self.genres.split(',').any(|g| g == genre)
    }
}

/// Minimal projection used by joins and counting
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GameName {
    pub game_id: i64,
    pub game_name: String,
}

/// A game that passed the release-date window, with its average playtime
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlaytimeRelease {
    pub game_id: i64,
    pub game_name: String,
    pub avg_playtime: i64,
}

/// Per-platform support tally for one client session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlatformTally {
    pub windows: u64,
    pub linux: u64,
    pub mac: u64,
}

impl PlatformTally {
    /// Count one game's platform flags.
    pub fn observe(&mut self, game: &GameRecord) {
        self.windows += u64::from(game.windows);
        self.linux += u64::from(game.linux);
        self.mac += u64::from(game.mac);
    }

    /// Merge another tally, e.g. a shard partial.
    pub fn merge(&mut self, other: &PlatformTally) {
        self.windows += other.windows;
        self.linux += other.linux;
        self.mac += other.mac;
    }

    pub fn is_empty(&self) -> bool {
        self.windows == 0 && self.linux == 0 && self.mac == 0
    }
}

/// Project the games of a batch that carry the genre onto name records.
pub fn to_game_names(games: &[GameRecord], genre: &str) -> Vec<GameName> {
    games
        .iter()
        .filter(|g| g.has_genre(genre))
        .map(|g| GameName {
            game_id: g.game_id,
            game_name: g.name.clone(),
        })
        .collect()
}

/// Project the games released within the inclusive year window onto playtime
/// releases. Returns the projections and how many dates failed to parse.
pub fn to_playtime_releases(
    games: &[GameRecord],
    start_year: i32,
    end_year: i32,
) -> (Vec<PlaytimeRelease>, usize) {
    let mut skipped = 0;
    let releases = games
        .iter()
        .filter_map(|g| match release_year(&g.release_date) {
            Some(year) if year >= start_year && year <= end_year => Some(PlaytimeRelease {
                game_id: g.game_id,
                game_name: g.name.clone(),
                avg_playtime: g.avg_playtime,
            }),
            Some(_) => None,
            None => {
                skipped += 1;
                None
            }
        })
        .collect();
    (releases, skipped)
}

/// Year of a `"Mon D, YYYY"` date; `None` when it does not parse.
fn release_year(date: &str) -> Option<i32> {
    use chrono::Datelike;
    NaiveDate::parse_from_str(date.trim(), "%b %e, %Y")
        .ok()
        .map(|d| d.year())
}

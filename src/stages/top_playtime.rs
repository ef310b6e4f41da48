//! Top games by average playtime: the [`TopN`] state machine ranked over
//! date-filtered release records.

use crate::heap::Ranked;
use crate::models::game::PlaytimeRelease;
use crate::stages::top_n::TopN;

impl Ranked for PlaytimeRelease {
    type Rank = i64;

    fn rank(&self) -> i64 {
        self.avg_playtime
    }

    fn id(&self) -> i64 {
        self.game_id
    }
}

/// Top selector over per-game average playtime.
pub fn top_playtime(capacity: usize) -> TopN<PlaytimeRelease> {
    TopN::new(capacity)
}

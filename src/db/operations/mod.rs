pub mod analytics;
pub mod leaderboard;
pub mod mastery;
pub mod progress;
pub mod streaks;

use chrono::{DateTime, NaiveDateTime, Utc};

pub(crate) fn to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

pub(crate) fn to_utc_opt(naive: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    naive.map(to_utc)
}

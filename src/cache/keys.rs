use std::time::Duration;

pub const USER_PROGRESS_TTL: Duration = Duration::from_secs(60 * 60);
pub const USER_LEVEL_TTL: Duration = Duration::from_secs(60 * 60);
pub const MASTERY_TTL: Duration = Duration::from_secs(60 * 60);
pub const STREAKS_TTL: Duration = Duration::from_secs(60 * 60);
pub const ANALYTICS_TTL: Duration = Duration::from_secs(60 * 60);
pub const INSIGHTS_TTL: Duration = Duration::from_secs(60 * 60);

pub fn user_progress_key(user_id: &str) -> String {
    format!("user_progress:{user_id}")
}

pub fn user_level_key(user_id: &str) -> String {
    format!("user_level:{user_id}")
}

pub fn character_mastery_key(user_id: &str, character_id: &str) -> String {
    format!("character_mastery:{user_id}:{character_id}")
}

pub fn user_masteries_key(user_id: &str, type_filter: &str) -> String {
    format!("user_masteries:{user_id}:{type_filter}")
}

pub fn user_masteries_prefix(user_id: &str) -> String {
    format!("user_masteries:{user_id}:")
}

pub fn user_streaks_key(user_id: &str, type_filter: &str) -> String {
    format!("user_streaks:{user_id}:{type_filter}")
}

pub fn user_streaks_prefix(user_id: &str) -> String {
    format!("user_streaks:{user_id}:")
}

/// Leaderboard pages and ranks are keyed period-first so that a period
/// refresh can invalidate them with a single prefix scan.
pub fn leaderboard_key(period: &str, limit: i64, offset: i64) -> String {
    format!("leaderboard:{period}:{limit}:{offset}")
}

pub fn leaderboard_prefix(period: &str) -> String {
    format!("leaderboard:{period}:")
}

pub fn user_rank_key(period: &str, user_id: &str) -> String {
    format!("user_rank:{period}:{user_id}")
}

pub fn user_rank_prefix(period: &str) -> String {
    format!("user_rank:{period}:")
}

pub fn user_analytics_key(user_id: &str, window: &str) -> String {
    format!("user_analytics:{user_id}:{window}")
}

pub fn user_analytics_prefix(user_id: &str) -> String {
    format!("user_analytics:{user_id}:")
}

pub fn learning_insights_key(user_id: &str, window: &str) -> String {
    format!("learning_insights:{user_id}:{window}")
}

pub fn learning_insights_prefix(user_id: &str) -> String {
    format!("learning_insights:{user_id}:")
}

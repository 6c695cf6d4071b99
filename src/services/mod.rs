pub mod analytics;
pub mod leaderboard;
pub mod mastery;
pub mod streak;
pub mod xp;

use std::str::FromStr;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

/// Tunables for XP awards and the level curve.
#[derive(Debug, Clone)]
pub struct XpTuning {
    pub base_multiplier: f64,
    pub streak_multiplier: f64,
    pub achievement_multiplier: f64,
    pub level_up_xp_base: i64,
    pub level_up_xp_multiplier: f64,
}

impl Default for XpTuning {
    fn default() -> Self {
        Self {
            base_multiplier: 1.0,
            streak_multiplier: 1.5,
            achievement_multiplier: 2.0,
            level_up_xp_base: 100,
            level_up_xp_multiplier: 1.2,
        }
    }
}

impl XpTuning {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_multiplier: env_parse("XP_BASE_MULTIPLIER", defaults.base_multiplier),
            streak_multiplier: env_parse("XP_STREAK_MULTIPLIER", defaults.streak_multiplier),
            achievement_multiplier: env_parse(
                "XP_ACHIEVEMENT_MULTIPLIER",
                defaults.achievement_multiplier,
            ),
            level_up_xp_base: env_parse("LEVEL_UP_XP_BASE", defaults.level_up_xp_base).max(1),
            level_up_xp_multiplier: env_parse(
                "LEVEL_UP_XP_MULTIPLIER",
                defaults.level_up_xp_multiplier,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreakTuning {
    pub freeze_limit: i32,
    pub reset_hour: u32,
}

impl Default for StreakTuning {
    fn default() -> Self {
        Self {
            freeze_limit: 3,
            reset_hour: 0,
        }
    }
}

impl StreakTuning {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            freeze_limit: env_parse("STREAK_FREEZE_LIMIT", defaults.freeze_limit).max(0),
            reset_hour: env_parse("STREAK_RESET_HOUR", defaults.reset_hour).min(23),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeaderboardTuning {
    pub top_count: i64,
    pub cache_ttl_secs: u64,
}

impl Default for LeaderboardTuning {
    fn default() -> Self {
        Self {
            top_count: 100,
            cache_ttl_secs: 300,
        }
    }
}

impl LeaderboardTuning {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            top_count: env_parse("LEADERBOARD_TOP_COUNT", defaults.top_count).max(1),
            cache_ttl_secs: env_parse("LEADERBOARD_CACHE_TTL", defaults.cache_ttl_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionTuning {
    pub retention_days: i64,
}

impl Default for RetentionTuning {
    fn default() -> Self {
        Self { retention_days: 365 }
    }
}

impl RetentionTuning {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retention_days: env_parse("ANALYTICS_RETENTION_DAYS", defaults.retention_days).max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub xp: XpTuning,
    pub streak: StreakTuning,
    pub leaderboard: LeaderboardTuning,
    pub retention: RetentionTuning,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            log_level,
            xp: XpTuning::from_env(),
            streak: StreakTuning::from_env(),
            leaderboard: LeaderboardTuning::from_env(),
            retention: RetentionTuning::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            xp: XpTuning::default(),
            streak: StreakTuning::default(),
            leaderboard: LeaderboardTuning::default(),
            retention: RetentionTuning::default(),
        }
    }
}

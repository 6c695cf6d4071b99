use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::cache::{keys, RedisCache};
use crate::config::XpTuning;
use crate::db::operations::progress::{self, SourceTotal, UserProgress, XpSource, XpTransaction};
use crate::db::DatabaseProxy;
use crate::response::EngineError;

/// Ceiling on the level walk. Keeps a pathological multiplier (or a totalXp
/// poked in by hand) from turning the threshold loop into a spin.
pub const MAX_LEVEL: i32 = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XpCalculation {
    pub base_xp: i64,
    pub multiplier: f64,
    pub bonus_xp: i64,
    pub total_xp: i64,
    pub source: XpSource,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelInfo {
    pub level: i32,
    pub name: String,
    pub xp_required: i64,
    pub xp_to_next: i64,
    pub total_xp: i64,
    pub multiplier: f64,
    pub rewards: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XpAward {
    pub transaction: XpTransaction,
    pub progress: UserProgress,
    pub level: LevelInfo,
    pub leveled_up: bool,
    pub calculation: XpCalculation,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XpHistoryPage {
    pub transactions: Vec<XpTransaction>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XpStatistics {
    pub total_xp: i64,
    pub today_xp: i64,
    pub week_xp: i64,
    pub month_xp: i64,
    pub source_stats: Vec<SourceTotal>,
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn meta_flag(metadata: Option<&Value>, key: &str) -> bool {
    metadata
        .and_then(|m| m.get(key))
        .map(is_truthy)
        .unwrap_or(false)
}

fn meta_i64(metadata: Option<&Value>, key: &str) -> Option<i64> {
    metadata.and_then(|m| m.get(key)).and_then(Value::as_i64)
}

fn meta_str<'a>(metadata: Option<&'a Value>, key: &str) -> Option<&'a str> {
    metadata.and_then(|m| m.get(key)).and_then(Value::as_str)
}

fn base_award(source: XpSource, metadata: Option<&Value>) -> (i64, String) {
    match source {
        XpSource::CharacterPractice => (10, "Character practice completed".to_string()),
        XpSource::PerfectStroke => (20, "Perfect stroke achieved".to_string()),
        XpSource::DailyStreak => (50, "Daily streak maintained".to_string()),
        XpSource::AchievementUnlock => {
            let reward = meta_i64(metadata, "xpReward").filter(|xp| *xp > 0).unwrap_or(100);
            let name = meta_str(metadata, "name").unwrap_or("Unknown");
            (reward, format!("Achievement unlocked: {name}"))
        }
        XpSource::LessonCompletion => (30, "Lesson completed".to_string()),
        XpSource::VocabularyLearned => (15, "Vocabulary word learned".to_string()),
        XpSource::StreakMilestone => {
            let days = meta_i64(metadata, "streakCount").unwrap_or(0);
            let reward = if days > 0 { days * 10 } else { 100 };
            (reward, format!("Streak milestone: {days} days"))
        }
        XpSource::PerfectScore => (25, "Perfect score achieved".to_string()),
        XpSource::DailyLogin => (5, "Daily login bonus".to_string()),
        XpSource::WeeklyChallenge => (200, "Weekly challenge completed".to_string()),
        XpSource::MonthlyChallenge => (500, "Monthly challenge completed".to_string()),
        XpSource::SocialShare => (10, "Achievement shared".to_string()),
        XpSource::ReviewSession => (15, "Review session completed".to_string()),
        XpSource::MistakeCorrection => (5, "Mistake corrected".to_string()),
        XpSource::SpeedChallenge => (40, "Speed challenge completed".to_string()),
    }
}

/// Pure award computation. Same `(source, metadata)` always yields the same
/// numbers for a given tuning.
pub fn calculate_xp(
    source: XpSource,
    metadata: Option<&Value>,
    tuning: &XpTuning,
) -> XpCalculation {
    let (base_xp, description) = base_award(source, metadata);

    let mut multiplier = tuning.base_multiplier;
    if meta_flag(metadata, "streakMultiplier") {
        multiplier *= tuning.streak_multiplier;
    }
    if meta_flag(metadata, "achievementMultiplier") {
        multiplier *= tuning.achievement_multiplier;
    }

    let bonus_xp = (base_xp as f64 * (multiplier - 1.0)).floor() as i64;
    let total_xp = (base_xp as f64 * multiplier).floor() as i64;

    XpCalculation {
        base_xp,
        multiplier,
        bonus_xp,
        total_xp,
        source,
        description,
    }
}

/// XP required to reach `level` from the one below it (level >= 2).
fn level_step(tuning: &XpTuning, level: i32) -> i64 {
    (tuning.level_up_xp_base as f64 * tuning.level_up_xp_multiplier.powi(level - 2)).floor() as i64
}

fn level_name(level: i32) -> &'static str {
    if level >= 20 {
        "Platinum"
    } else if level >= 15 {
        "Gold"
    } else if level >= 10 {
        "Silver"
    } else {
        "Bronze"
    }
}

fn level_rewards(level: i32) -> Vec<String> {
    let mut rewards = Vec::new();
    if level % 5 == 0 {
        rewards.push("Achievement Badge".to_string());
    }
    if level % 10 == 0 {
        rewards.push("Special Avatar".to_string());
    }
    if level % 20 == 0 {
        rewards.push("Exclusive Theme".to_string());
    }
    if level % 50 == 0 {
        rewards.push("Legendary Title".to_string());
    }
    rewards
}

/// Walks the cumulative thresholds: the current level is the last one whose
/// requirement fits inside `total_xp`.
pub fn level_from_total_xp(total_xp: i64, tuning: &XpTuning) -> LevelInfo {
    let total_xp = total_xp.max(0);

    let mut level: i32 = 1;
    let mut xp_required: i64 = 0;
    let mut next_threshold: i64 = level_step(tuning, 2);

    while next_threshold <= total_xp && level < MAX_LEVEL {
        level += 1;
        xp_required = next_threshold;
        next_threshold = next_threshold.saturating_add(level_step(tuning, level + 1));
    }

    let xp_to_next = if level >= MAX_LEVEL {
        0
    } else {
        next_threshold - total_xp
    };

    LevelInfo {
        level,
        name: level_name(level).to_string(),
        xp_required,
        xp_to_next,
        total_xp,
        multiplier: 1.0 + (level - 1) as f64 * 0.1,
        rewards: level_rewards(level),
    }
}

/// The single write path for XP. Ledger append and progress update commit
/// together or not at all.
pub async fn add_xp(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    tuning: &XpTuning,
    user_id: &str,
    source: XpSource,
    metadata: Option<Value>,
    now: DateTime<Utc>,
) -> Result<XpAward, EngineError> {
    let calculation = calculate_xp(source, metadata.as_ref(), tuning);

    let mut tx = proxy.pool().begin().await?;

    let Some(current) = progress::get_user_progress_for_update(&mut tx, user_id).await? else {
        return Err(EngineError::UserNotFound);
    };

    let new_total = current.total_xp + calculation.total_xp;
    let new_current = current.current_xp + calculation.total_xp;
    let level = level_from_total_xp(new_total, tuning);
    let leveled_up = level.level > current.current_level;

    let stored_metadata = metadata.unwrap_or_else(|| serde_json::json!({}));
    let transaction = progress::insert_xp_transaction(
        &mut tx,
        user_id,
        calculation.total_xp,
        source,
        &calculation.description,
        &stored_metadata,
        now,
    )
    .await?;

    progress::apply_xp_award(
        &mut tx,
        user_id,
        new_total,
        new_current,
        level.level,
        &level.name,
        level.xp_to_next,
        now,
    )
    .await?;

    tx.commit().await?;

    if let Some(cache) = cache {
        cache
            .del_many(&[keys::user_progress_key(user_id), keys::user_level_key(user_id)])
            .await;
    }

    info!(
        user_id,
        amount = calculation.total_xp,
        source = source.as_str(),
        new_level = level.level,
        leveled_up,
        "XP added"
    );

    let progress = UserProgress {
        total_xp: new_total,
        current_xp: new_current,
        current_level: level.level,
        level_name: level.name.clone(),
        xp_to_next_level: level.xp_to_next,
        last_activity_date: Some(now),
        updated_at: now,
        ..current
    };

    Ok(XpAward {
        transaction,
        progress,
        level,
        leveled_up,
        calculation,
    })
}

pub async fn get_user_progress(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
) -> Result<UserProgress, EngineError> {
    let key = keys::user_progress_key(user_id);
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<UserProgress>(&key).await {
            return Ok(hit);
        }
    }

    let row = progress::get_user_progress(proxy.pool(), user_id)
        .await?
        .ok_or(EngineError::UserNotFound)?;

    if let Some(cache) = cache {
        cache.set(&key, &row, keys::USER_PROGRESS_TTL).await;
    }
    Ok(row)
}

pub async fn get_user_level(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    tuning: &XpTuning,
    user_id: &str,
) -> Result<LevelInfo, EngineError> {
    let key = keys::user_level_key(user_id);
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<LevelInfo>(&key).await {
            return Ok(hit);
        }
    }

    let row = progress::get_user_progress(proxy.pool(), user_id)
        .await?
        .ok_or(EngineError::UserNotFound)?;

    let level = level_from_total_xp(row.total_xp, tuning);
    if let Some(cache) = cache {
        cache.set(&key, &level, keys::USER_LEVEL_TTL).await;
    }
    Ok(level)
}

pub async fn get_xp_history(
    proxy: &DatabaseProxy,
    user_id: &str,
    page: i64,
    limit: i64,
) -> Result<XpHistoryPage, EngineError> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let offset = (page - 1) * limit;

    let transactions = progress::list_xp_transactions(proxy.pool(), user_id, limit, offset).await?;
    let total = progress::count_xp_transactions(proxy.pool(), user_id).await?;
    let total_pages = (total + limit - 1) / limit;

    Ok(XpHistoryPage {
        transactions,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        },
    })
}

pub async fn get_xp_statistics(
    proxy: &DatabaseProxy,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<XpStatistics, EngineError> {
    let pool = proxy.pool();

    let today_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|n| n.and_utc())
        .unwrap_or(now);
    let week_start = now - Duration::days(7);
    let month_start = now
        .date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
        .unwrap_or(now);

    let total_xp = progress::sum_xp_since(pool, user_id, None).await?;
    let today_xp = progress::sum_xp_since(pool, user_id, Some(today_start)).await?;
    let week_xp = progress::sum_xp_since(pool, user_id, Some(week_start)).await?;
    let month_xp = progress::sum_xp_since(pool, user_id, Some(month_start)).await?;
    let source_stats = progress::xp_totals_by_source(pool, user_id).await?;

    Ok(XpStatistics {
        total_xp,
        today_xp,
        week_xp,
        month_xp,
        source_stats,
    })
}

/// Admin reset: wipes the ledger and zeroes the progress row together.
pub async fn reset_user_xp(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let mut tx = proxy.pool().begin().await?;

    if progress::get_user_progress_for_update(&mut tx, user_id).await?.is_none() {
        return Err(EngineError::UserNotFound);
    }

    progress::delete_xp_transactions(&mut tx, user_id).await?;
    progress::reset_progress(&mut tx, user_id, now).await?;
    tx.commit().await?;

    if let Some(cache) = cache {
        cache
            .del_many(&[keys::user_progress_key(user_id), keys::user_level_key(user_id)])
            .await;
    }

    info!(user_id, "user XP reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> XpTuning {
        XpTuning::default()
    }

    #[test]
    fn base_awards_match_source_table() {
        let t = tuning();
        assert_eq!(calculate_xp(XpSource::CharacterPractice, None, &t).total_xp, 10);
        assert_eq!(calculate_xp(XpSource::PerfectStroke, None, &t).total_xp, 20);
        assert_eq!(calculate_xp(XpSource::DailyStreak, None, &t).total_xp, 50);
        assert_eq!(calculate_xp(XpSource::WeeklyChallenge, None, &t).total_xp, 200);
        assert_eq!(calculate_xp(XpSource::MonthlyChallenge, None, &t).total_xp, 500);
    }

    #[test]
    fn achievement_unlock_uses_metadata_reward() {
        let t = tuning();
        let meta = serde_json::json!({"xpReward": 250, "name": "First Kanji"});
        let calc = calculate_xp(XpSource::AchievementUnlock, Some(&meta), &t);
        assert_eq!(calc.base_xp, 250);
        assert_eq!(calc.description, "Achievement unlocked: First Kanji");

        let fallback = calculate_xp(XpSource::AchievementUnlock, None, &t);
        assert_eq!(fallback.base_xp, 100);
    }

    #[test]
    fn streak_milestone_scales_with_days() {
        let t = tuning();
        let meta = serde_json::json!({"streakCount": 30});
        assert_eq!(calculate_xp(XpSource::StreakMilestone, Some(&meta), &t).base_xp, 300);
        assert_eq!(calculate_xp(XpSource::StreakMilestone, None, &t).base_xp, 100);
    }

    #[test]
    fn multiplier_chain_floors_total() {
        let t = tuning();
        let meta = serde_json::json!({"streakMultiplier": true, "achievementMultiplier": true});
        let calc = calculate_xp(XpSource::CharacterPractice, Some(&meta), &t);
        // 10 * 1.0 * 1.5 * 2.0 = 30
        assert_eq!(calc.total_xp, 30);
        assert_eq!(calc.bonus_xp, 20);
    }

    #[test]
    fn level_walk_matches_thresholds() {
        let t = tuning();
        assert_eq!(level_from_total_xp(0, &t).level, 1);
        assert_eq!(level_from_total_xp(99, &t).level, 1);
        assert_eq!(level_from_total_xp(100, &t).level, 2);
        // level 3 needs 100 + floor(100 * 1.2) = 220
        assert_eq!(level_from_total_xp(219, &t).level, 2);
        assert_eq!(level_from_total_xp(220, &t).level, 3);
    }

    #[test]
    fn xp_to_next_closes_the_gap() {
        let t = tuning();
        let info = level_from_total_xp(150, &t);
        assert_eq!(info.level, 2);
        assert_eq!(info.xp_to_next, 70);
        assert_eq!(info.xp_required, 100);
    }

    #[test]
    fn level_names_are_banded() {
        let t = tuning();
        assert_eq!(level_from_total_xp(0, &t).name, "Bronze");
        assert_eq!(level_name(9), "Bronze");
        assert_eq!(level_name(10), "Silver");
        assert_eq!(level_name(15), "Gold");
        assert_eq!(level_name(20), "Platinum");
    }

    #[test]
    fn rewards_fire_on_level_multiples() {
        assert!(level_rewards(7).is_empty());
        assert_eq!(level_rewards(5), vec!["Achievement Badge".to_string()]);
        let at_20 = level_rewards(20);
        assert!(at_20.contains(&"Achievement Badge".to_string()));
        assert!(at_20.contains(&"Special Avatar".to_string()));
        assert!(at_20.contains(&"Exclusive Theme".to_string()));
        let at_100 = level_rewards(100);
        assert!(at_100.contains(&"Legendary Title".to_string()));
    }

    #[test]
    fn pathological_tuning_stays_bounded() {
        let t = XpTuning {
            level_up_xp_multiplier: 0.0,
            ..XpTuning::default()
        };
        // Steps collapse to 0 after level 2; the walk must still terminate.
        let info = level_from_total_xp(i64::MAX, &t);
        assert_eq!(info.level, MAX_LEVEL);
        assert_eq!(info.xp_to_next, 0);
    }
}

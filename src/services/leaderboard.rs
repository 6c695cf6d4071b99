use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cache::{keys, RedisCache};
use crate::config::LeaderboardTuning;
use crate::db::operations::leaderboard::{
    self, LeaderboardEntry, LeaderboardPeriod, PeriodStats, UserPeriodSnapshot,
};
use crate::db::DatabaseProxy;
use crate::response::EngineError;

const XP_WEIGHT: f64 = 1.0;
const LEVEL_WEIGHT: f64 = 100.0;
const STREAK_WEIGHT: f64 = 50.0;
const MASTERED_WEIGHT: f64 = 200.0;
const ACHIEVEMENT_WEIGHT: f64 = 150.0;
const PRACTICE_DAY_WEIGHT: f64 = 25.0;
const ACCURACY_WEIGHT: f64 = 2.0;

pub fn period_multiplier(period: LeaderboardPeriod) -> f64 {
    match period {
        LeaderboardPeriod::Daily => 1.0,
        LeaderboardPeriod::Weekly => 1.2,
        LeaderboardPeriod::Monthly => 1.5,
        LeaderboardPeriod::AllTime => 2.0,
    }
}

/// Start of the period's date window; None means unbounded (all-time).
pub fn window_start(period: LeaderboardPeriod, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let midnight = |date: chrono::NaiveDate| {
        date.and_hms_opt(0, 0, 0)
            .map(|n| n.and_utc())
            .unwrap_or(now)
    };

    match period {
        LeaderboardPeriod::Daily => Some(midnight(now.date_naive())),
        LeaderboardPeriod::Weekly => {
            let days_into_week = now.date_naive().weekday().num_days_from_monday() as i64;
            Some(midnight(now.date_naive() - chrono::Duration::days(days_into_week)))
        }
        LeaderboardPeriod::Monthly => {
            let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
            Some(midnight(first))
        }
        LeaderboardPeriod::AllTime => None,
    }
}

/// Additive composite scaled by the period multiplier, rounded to integer.
pub fn composite_score(snapshot: &UserPeriodSnapshot, period: LeaderboardPeriod) -> i64 {
    let raw = snapshot.period_xp as f64 * XP_WEIGHT
        + snapshot.current_level as f64 * LEVEL_WEIGHT
        + snapshot.streak_count as f64 * STREAK_WEIGHT
        + snapshot.mastered_characters as f64 * MASTERED_WEIGHT
        + snapshot.unlocked_achievements as f64 * ACHIEVEMENT_WEIGHT
        + snapshot.practice_days as f64 * PRACTICE_DAY_WEIGHT
        + snapshot.average_accuracy * ACCURACY_WEIGHT;

    (raw * period_multiplier(period)).round() as i64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub user_id: String,
    pub rank: i32,
    pub score: i64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub period: LeaderboardPeriod,
    pub entries: Vec<RankedEntry>,
    pub pagination: PageInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRank {
    pub user_id: String,
    pub period: LeaderboardPeriod,
    pub rank: i32,
    pub score: i64,
    pub percentile: f64,
    pub total_users: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    pub period: LeaderboardPeriod,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub refreshed: Vec<RefreshSummary>,
    pub failures: Vec<String>,
}

fn snapshot_metadata(snapshot: &UserPeriodSnapshot) -> serde_json::Value {
    serde_json::json!({
        "periodXp": snapshot.period_xp,
        "currentLevel": snapshot.current_level,
        "streakCount": snapshot.streak_count,
        "masteredCharacters": snapshot.mastered_characters,
        "unlockedAchievements": snapshot.unlocked_achievements,
        "practiceDays": snapshot.practice_days,
        "averageAccuracy": snapshot.average_accuracy,
    })
}

/// Scores and ranks every snapshot. Ties share a rank; the next distinct
/// score resumes at its ordinal position (1,1,3). Equal scores order by
/// userId so reruns are byte-stable.
pub fn rank_snapshots(
    snapshots: Vec<UserPeriodSnapshot>,
    period: LeaderboardPeriod,
) -> Vec<RankedEntry> {
    let mut scored: Vec<(i64, UserPeriodSnapshot)> = snapshots
        .into_iter()
        .map(|s| (composite_score(&s, period), s))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.user_id.cmp(&b.1.user_id)));

    let mut entries = Vec::with_capacity(scored.len());
    let mut rank = 1;
    for (index, (score, snapshot)) in scored.iter().enumerate() {
        if index > 0 && *score < scored[index - 1].0 {
            rank = index as i32 + 1;
        }
        entries.push(RankedEntry {
            user_id: snapshot.user_id.clone(),
            rank,
            score: *score,
            metadata: snapshot_metadata(snapshot),
        });
    }
    entries
}

async fn ranked_for_period(
    proxy: &DatabaseProxy,
    period: LeaderboardPeriod,
    now: DateTime<Utc>,
) -> Result<Vec<RankedEntry>, EngineError> {
    let snapshots = leaderboard::load_user_snapshots(proxy.pool(), window_start(period, now)).await?;
    Ok(rank_snapshots(snapshots, period))
}

pub async fn get_leaderboard(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    tuning: &LeaderboardTuning,
    period: LeaderboardPeriod,
    limit: i64,
    offset: i64,
    now: DateTime<Utc>,
) -> Result<LeaderboardPage, EngineError> {
    let limit = limit.clamp(1, tuning.top_count.max(1));
    let offset = offset.max(0);

    let key = keys::leaderboard_key(period.as_str(), limit, offset);
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<LeaderboardPage>(&key).await {
            return Ok(hit);
        }
    }

    let ranked = ranked_for_period(proxy, period, now).await?;
    let total = ranked.len() as i64;

    let entries: Vec<RankedEntry> = ranked
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();

    let page = LeaderboardPage {
        period,
        entries,
        pagination: PageInfo {
            limit,
            offset,
            total,
            has_next: offset + limit < total,
            has_prev: offset > 0,
        },
    };

    if let Some(cache) = cache {
        cache
            .set(&key, &page, StdDuration::from_secs(tuning.cache_ttl_secs))
            .await;
    }
    Ok(page)
}

pub async fn get_user_rank(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    tuning: &LeaderboardTuning,
    user_id: &str,
    period: LeaderboardPeriod,
    now: DateTime<Utc>,
) -> Result<UserRank, EngineError> {
    let key = keys::user_rank_key(period.as_str(), user_id);
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<UserRank>(&key).await {
            return Ok(hit);
        }
    }

    let ranked = ranked_for_period(proxy, period, now).await?;
    let total_users = ranked.len() as i64;

    let entry = ranked
        .iter()
        .find(|e| e.user_id == user_id)
        .ok_or(EngineError::UserNotFound)?;

    let rank = UserRank {
        user_id: user_id.to_string(),
        period,
        rank: entry.rank,
        score: entry.score,
        percentile: (total_users - entry.rank as i64 + 1) as f64 / total_users as f64 * 100.0,
        total_users,
    };

    if let Some(cache) = cache {
        cache
            .set(&key, &rank, StdDuration::from_secs(tuning.cache_ttl_secs))
            .await;
    }
    Ok(rank)
}

/// Batch recompute: the persisted entries for the period are fully replaced
/// in one transaction, then the period's caches are dropped.
pub async fn update_leaderboard(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    period: LeaderboardPeriod,
    now: DateTime<Utc>,
) -> Result<RefreshSummary, EngineError> {
    let ranked = ranked_for_period(proxy, period, now).await?;

    let rows: Vec<(String, i32, i64, serde_json::Value)> = ranked
        .iter()
        .map(|e| (e.user_id.clone(), e.rank, e.score, e.metadata.clone()))
        .collect();

    let mut tx = proxy.pool().begin().await?;
    leaderboard::replace_period_entries(&mut tx, period, &rows, now).await?;
    tx.commit().await?;

    if let Some(cache) = cache {
        cache.del_prefix(&keys::leaderboard_prefix(period.as_str())).await;
        cache.del_prefix(&keys::user_rank_prefix(period.as_str())).await;
    }

    info!(
        period = period.as_str(),
        entries = ranked.len(),
        "leaderboard updated"
    );

    Ok(RefreshSummary {
        period,
        entries: ranked.len(),
    })
}

/// Recomputes every period. Idempotent; a failing period is recorded and the
/// rest still refresh.
pub async fn update_all_leaderboards(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    now: DateTime<Utc>,
) -> RefreshReport {
    let mut refreshed = Vec::new();
    let mut failures = Vec::new();

    for period in LeaderboardPeriod::ALL {
        match update_leaderboard(proxy, cache, period, now).await {
            Ok(summary) => refreshed.push(summary),
            Err(err) => {
                error!(period = period.as_str(), error = %err, "leaderboard refresh failed");
                failures.push(format!("{}: {err}", period.as_str()));
            }
        }
    }

    RefreshReport { refreshed, failures }
}

pub async fn get_leaderboard_statistics(
    proxy: &DatabaseProxy,
    period: LeaderboardPeriod,
) -> Result<PeriodStats, EngineError> {
    Ok(leaderboard::period_stats(proxy.pool(), period).await?)
}

pub async fn get_user_leaderboard_history(
    proxy: &DatabaseProxy,
    user_id: &str,
    limit: i64,
) -> Result<Vec<LeaderboardEntry>, EngineError> {
    Ok(leaderboard::user_history(proxy.pool(), user_id, limit.clamp(1, 100)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(user_id: &str, period_xp: i64) -> UserPeriodSnapshot {
        UserPeriodSnapshot {
            user_id: user_id.to_string(),
            period_xp,
            current_level: 1,
            streak_count: 0,
            mastered_characters: 0,
            unlocked_achievements: 0,
            practice_days: 0,
            average_accuracy: 0.0,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn score_weights_add_up() {
        let s = UserPeriodSnapshot {
            user_id: "u1".to_string(),
            period_xp: 100,
            current_level: 3,
            streak_count: 4,
            mastered_characters: 2,
            unlocked_achievements: 1,
            practice_days: 5,
            average_accuracy: 90.0,
        };
        // 100 + 300 + 200 + 400 + 150 + 125 + 180 = 1455
        assert_eq!(composite_score(&s, LeaderboardPeriod::Daily), 1455);
        assert_eq!(composite_score(&s, LeaderboardPeriod::Weekly), 1746);
        assert_eq!(composite_score(&s, LeaderboardPeriod::Monthly), 2183);
        assert_eq!(composite_score(&s, LeaderboardPeriod::AllTime), 2910);
    }

    #[test]
    fn ties_share_rank_and_next_score_skips() {
        let ranked = rank_snapshots(
            vec![snapshot("a", 1000), snapshot("b", 1000), snapshot("c", 900)],
            LeaderboardPeriod::Weekly,
        );
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 1);
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn tie_order_is_deterministic_by_user_id() {
        let ranked = rank_snapshots(
            vec![snapshot("zed", 500), snapshot("amy", 500)],
            LeaderboardPeriod::Daily,
        );
        assert_eq!(ranked[0].user_id, "amy");
        assert_eq!(ranked[1].user_id, "zed");
    }

    #[test]
    fn ranks_are_gap_free_over_distinct_scores() {
        let ranked = rank_snapshots(
            (0..10).map(|i| snapshot(&format!("u{i}"), i * 10)).collect(),
            LeaderboardPeriod::Daily,
        );
        let ranks: Vec<i32> = ranked.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, (1..=10).collect::<Vec<i32>>());
    }

    #[test]
    fn window_starts_follow_the_calendar() {
        let now = at("2024-03-14T15:30:00Z"); // a Thursday
        assert_eq!(
            window_start(LeaderboardPeriod::Daily, now).unwrap(),
            at("2024-03-14T00:00:00Z")
        );
        assert_eq!(
            window_start(LeaderboardPeriod::Weekly, now).unwrap(),
            at("2024-03-11T00:00:00Z") // Monday
        );
        assert_eq!(
            window_start(LeaderboardPeriod::Monthly, now).unwrap(),
            at("2024-03-01T00:00:00Z")
        );
        assert!(window_start(LeaderboardPeriod::AllTime, now).is_none());
    }

    #[test]
    fn period_multipliers_are_fixed() {
        assert_eq!(period_multiplier(LeaderboardPeriod::Daily), 1.0);
        assert_eq!(period_multiplier(LeaderboardPeriod::Weekly), 1.2);
        assert_eq!(period_multiplier(LeaderboardPeriod::Monthly), 1.5);
        assert_eq!(period_multiplier(LeaderboardPeriod::AllTime), 2.0);
    }
}

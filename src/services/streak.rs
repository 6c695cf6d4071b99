use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{keys, RedisCache};
use crate::config::StreakTuning;
use crate::db::operations::streaks::{self, Streak, StreakAggregates, StreakType};
use crate::db::operations::progress;
use crate::db::DatabaseProxy;
use crate::response::EngineError;

pub const MILESTONE_DAYS: [i32; 8] = [3, 7, 14, 30, 60, 100, 200, 365];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneReward {
    pub xp: i64,
    pub badge: &'static str,
}

/// What a single activity did to the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdvanceOutcome {
    Started,
    SameDay,
    Extended,
    FreezeConsumed,
    Restarted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakAdvance {
    pub streak: Streak,
    pub outcome: AdvanceOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub days: i32,
    pub achieved: bool,
    pub progress: f64,
    pub reward: MilestoneReward,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextMilestone {
    pub days: i32,
    pub days_remaining: i32,
    pub progress: f64,
    pub reward: MilestoneReward,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakMilestones {
    pub current_streak: i32,
    pub longest_streak: i32,
    pub milestones: Vec<Milestone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_milestone: Option<NextMilestone>,
    pub freeze_count: i32,
    pub freeze_limit: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakStatistics {
    pub total_streaks: i64,
    pub average_streak: f64,
    pub longest_streak: i32,
    pub breakdown: Vec<Streak>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub failures: Vec<String>,
}

fn days_between_start_of_day(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (later.date_naive() - earlier.date_naive()).num_days()
}

/// The streak transition function. Start-of-day calendar arithmetic; every
/// branch refreshes `lastActivity`.
pub fn advance(existing: Option<&Streak>, user_id: &str, streak_type: StreakType, at: DateTime<Utc>) -> StreakAdvance {
    let Some(prev) = existing else {
        return StreakAdvance {
            streak: Streak {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                streak_type,
                current_count: 1,
                longest_count: 1,
                last_activity: Some(at),
                freeze_count: 0,
                is_active: true,
                created_at: at,
                updated_at: at,
            },
            outcome: AdvanceOutcome::Started,
        };
    };

    let mut next = prev.clone();
    next.last_activity = Some(at);
    next.updated_at = at;

    // An expired row (count zeroed by the sweep) restarts regardless of gap.
    let outcome = if !prev.is_active {
        next.current_count = 1;
        next.longest_count = prev.longest_count.max(1);
        next.is_active = true;
        AdvanceOutcome::Restarted
    } else {
        let gap = prev
            .last_activity
            .map(|last| days_between_start_of_day(last, at))
            .unwrap_or(i64::MAX);

        if gap == 0 {
            AdvanceOutcome::SameDay
        } else if gap == 1 {
            next.current_count = prev.current_count + 1;
            next.longest_count = prev.longest_count.max(next.current_count);
            AdvanceOutcome::Extended
        } else if gap <= prev.freeze_count as i64 + 1 {
            next.freeze_count = (prev.freeze_count - (gap - 1) as i32).max(0);
            AdvanceOutcome::FreezeConsumed
        } else {
            next.current_count = 1;
            next.longest_count = prev.longest_count.max(1);
            AdvanceOutcome::Restarted
        }
    };

    StreakAdvance { streak: next, outcome }
}

pub fn milestone_reward(streak_type: StreakType, days: i32) -> MilestoneReward {
    let (xp, badge) = match streak_type {
        StreakType::DailyLogin => match days {
            3 => (50, "Early Bird"),
            7 => (100, "Week Warrior"),
            14 => (200, "Fortnight Fighter"),
            30 => (500, "Monthly Master"),
            60 => (1000, "Bi-Monthly Boss"),
            100 => (2000, "Century Champion"),
            200 => (5000, "Double Century"),
            365 => (10000, "Yearly Legend"),
            _ => (0, "Unknown"),
        },
        StreakType::DailyPractice => match days {
            3 => (75, "Practice Starter"),
            7 => (150, "Weekly Worker"),
            14 => (300, "Fortnight Focus"),
            30 => (750, "Monthly Master"),
            60 => (1500, "Bi-Monthly Boss"),
            100 => (3000, "Century Champion"),
            200 => (7500, "Double Century"),
            365 => (15000, "Yearly Legend"),
            _ => (0, "Unknown"),
        },
        StreakType::PerfectScore => match days {
            3 => (100, "Perfect Start"),
            7 => (200, "Perfect Week"),
            14 => (400, "Perfect Fortnight"),
            30 => (1000, "Perfect Month"),
            60 => (2000, "Perfect Bi-Month"),
            100 => (4000, "Perfect Century"),
            200 => (10000, "Perfect Double"),
            365 => (20000, "Perfect Year"),
            _ => (0, "Unknown"),
        },
        StreakType::WeeklyStudy => match days {
            3 => (60, "Study Spark"),
            7 => (120, "Study Streak"),
            14 => (250, "Study Stamina"),
            30 => (600, "Study Month"),
            60 => (1200, "Study Marathon"),
            100 => (2500, "Study Century"),
            200 => (6000, "Study Double"),
            365 => (12000, "Study Year"),
            _ => (0, "Unknown"),
        },
        StreakType::MonthlyGoal => match days {
            3 => (80, "Goal Getter"),
            7 => (160, "Goal Keeper"),
            14 => (320, "Goal Driven"),
            30 => (800, "Goal Month"),
            60 => (1600, "Goal Crusher"),
            100 => (3200, "Goal Century"),
            200 => (8000, "Goal Double"),
            365 => (16000, "Goal Year"),
            _ => (0, "Unknown"),
        },
    };
    MilestoneReward { xp, badge }
}

pub fn next_milestone(current_count: i32, streak_type: StreakType) -> Option<NextMilestone> {
    MILESTONE_DAYS
        .iter()
        .find(|days| **days > current_count)
        .map(|&days| NextMilestone {
            days,
            days_remaining: days - current_count,
            progress: current_count as f64 / days as f64 * 100.0,
            reward: milestone_reward(streak_type, days),
        })
}

fn milestones_for(current_count: i32, streak_type: StreakType) -> Vec<Milestone> {
    MILESTONE_DAYS
        .iter()
        .map(|&days| Milestone {
            days,
            achieved: current_count >= days,
            progress: (current_count as f64 / days as f64 * 100.0).min(100.0),
            reward: milestone_reward(streak_type, days),
        })
        .collect()
}

/// Applies one qualifying activity. The DAILY_PRACTICE streak is mirrored
/// onto the user's progress row inside the same transaction.
pub async fn update_streak(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    streak_type: StreakType,
    at: DateTime<Utc>,
) -> Result<StreakAdvance, EngineError> {
    let mut tx = proxy.pool().begin().await?;

    let existing = streaks::get_streak_for_update(&mut tx, user_id, streak_type).await?;
    let advanced = advance(existing.as_ref(), user_id, streak_type, at);
    streaks::upsert_streak(&mut tx, &advanced.streak).await?;

    if streak_type == StreakType::DailyPractice {
        progress::update_progress_streak(
            &mut tx,
            user_id,
            advanced.streak.current_count,
            advanced.streak.longest_count,
            at,
        )
        .await?;
    }

    tx.commit().await?;

    if let Some(cache) = cache {
        cache.del_prefix(&keys::user_streaks_prefix(user_id)).await;
        if streak_type == StreakType::DailyPractice {
            cache.del(&keys::user_progress_key(user_id)).await;
        }
    }

    info!(
        user_id,
        streak_type = streak_type.as_str(),
        current = advanced.streak.current_count,
        outcome = ?advanced.outcome,
        "streak updated"
    );

    Ok(advanced)
}

/// Banks one freeze unit. Does not extend the count.
pub async fn freeze_streak(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    tuning: &StreakTuning,
    user_id: &str,
    streak_type: StreakType,
    now: DateTime<Utc>,
) -> Result<Streak, EngineError> {
    let streak = streaks::get_streak(proxy.pool(), user_id, streak_type)
        .await?
        .ok_or(EngineError::StreakNotFound)?;

    if streak.freeze_count >= tuning.freeze_limit {
        return Err(EngineError::FreezeLimitReached);
    }

    let new_count = streak.freeze_count + 1;
    streaks::set_freeze_count(proxy.pool(), &streak.id, new_count, now).await?;

    if let Some(cache) = cache {
        cache.del_prefix(&keys::user_streaks_prefix(user_id)).await;
    }

    info!(
        user_id,
        streak_type = streak_type.as_str(),
        freeze_count = new_count,
        "streak frozen"
    );

    Ok(Streak {
        freeze_count: new_count,
        updated_at: now,
        ..streak
    })
}

pub async fn get_user_streaks(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    streak_type: Option<StreakType>,
) -> Result<Vec<Streak>, EngineError> {
    let qualifier = streak_type.map(|t| t.as_str()).unwrap_or("all");
    let key = keys::user_streaks_key(user_id, qualifier);
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<Vec<Streak>>(&key).await {
            return Ok(hit);
        }
    }

    let rows = streaks::list_user_streaks(proxy.pool(), user_id, streak_type).await?;

    if let Some(cache) = cache {
        cache.set(&key, &rows, keys::STREAKS_TTL).await;
    }
    Ok(rows)
}

pub async fn get_streak_milestones(
    proxy: &DatabaseProxy,
    tuning: &StreakTuning,
    user_id: &str,
    streak_type: StreakType,
) -> Result<StreakMilestones, EngineError> {
    let streak = streaks::get_streak(proxy.pool(), user_id, streak_type)
        .await?
        .ok_or(EngineError::StreakNotFound)?;

    Ok(StreakMilestones {
        current_streak: streak.current_count,
        longest_streak: streak.longest_count,
        milestones: milestones_for(streak.current_count, streak_type),
        next_milestone: next_milestone(streak.current_count, streak_type),
        freeze_count: streak.freeze_count,
        freeze_limit: tuning.freeze_limit,
    })
}

pub async fn get_streak_statistics(
    proxy: &DatabaseProxy,
    user_id: &str,
) -> Result<StreakStatistics, EngineError> {
    let breakdown = streaks::list_user_streaks(proxy.pool(), user_id, None).await?;
    let StreakAggregates {
        total_streaks,
        average_streak,
        longest_streak,
    } = streaks::streak_aggregates(proxy.pool(), user_id).await?;

    Ok(StreakStatistics {
        total_streaks,
        average_streak,
        longest_streak,
        breakdown,
    })
}

/// Admin reset: drops the row entirely; the next activity starts fresh.
pub async fn reset_streak(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    streak_type: StreakType,
) -> Result<(), EngineError> {
    streaks::delete_streak(proxy.pool(), user_id, streak_type).await?;

    if let Some(cache) = cache {
        cache.del_prefix(&keys::user_streaks_prefix(user_id)).await;
    }

    info!(user_id, streak_type = streak_type.as_str(), "streak reset");
    Ok(())
}

/// The authoritative expiry path, run once a day independent of activity.
/// Individual failures are collected, never fatal to the sweep.
pub async fn expire_streaks(proxy: &DatabaseProxy, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
    let active = streaks::list_active_streaks(proxy.pool()).await?;
    let examined = active.len();
    let mut expired = 0usize;
    let mut failures = Vec::new();

    for streak in active {
        let gap = streak
            .last_activity
            .map(|last| days_between_start_of_day(last, now))
            .unwrap_or(i64::MAX);

        if gap > streak.freeze_count as i64 + 1 {
            match streaks::expire_streak(proxy.pool(), &streak.id, now).await {
                Ok(()) => expired += 1,
                Err(err) => {
                    warn!(
                        streak_id = %streak.id,
                        error = %err,
                        "failed to expire streak"
                    );
                    failures.push(format!("{}: {err}", streak.id));
                }
            }
        }
    }

    info!(examined, expired, failed = failures.len(), "streak expiry sweep finished");

    Ok(SweepReport {
        examined,
        expired,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn active_streak(count: i32, freeze: i32, last: DateTime<Utc>) -> Streak {
        Streak {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            streak_type: StreakType::DailyPractice,
            current_count: count,
            longest_count: count,
            last_activity: Some(last),
            freeze_count: freeze,
            is_active: true,
            created_at: last,
            updated_at: last,
        }
    }

    #[test]
    fn fresh_start_creates_active_streak() {
        let adv = advance(None, "u1", StreakType::DailyPractice, at("2024-03-01T09:00:00Z"));
        assert_eq!(adv.outcome, AdvanceOutcome::Started);
        assert_eq!(adv.streak.current_count, 1);
        assert!(adv.streak.is_active);
    }

    #[test]
    fn same_day_is_idempotent() {
        let t0 = at("2024-03-01T09:00:00Z");
        let prev = active_streak(4, 0, t0);
        let adv = advance(Some(&prev), "u1", StreakType::DailyPractice, at("2024-03-01T22:00:00Z"));
        assert_eq!(adv.outcome, AdvanceOutcome::SameDay);
        assert_eq!(adv.streak.current_count, 4);

        let again = advance(Some(&adv.streak), "u1", StreakType::DailyPractice, at("2024-03-01T23:00:00Z"));
        assert_eq!(again.streak.current_count, 4);
    }

    #[test]
    fn next_day_extends_and_bumps_longest() {
        let prev = active_streak(4, 0, at("2024-03-01T09:00:00Z"));
        let adv = advance(Some(&prev), "u1", StreakType::DailyPractice, at("2024-03-02T05:00:00Z"));
        assert_eq!(adv.outcome, AdvanceOutcome::Extended);
        assert_eq!(adv.streak.current_count, 5);
        assert_eq!(adv.streak.longest_count, 5);
    }

    #[test]
    fn freeze_protects_short_gaps() {
        // count=5 with one banked freeze, 2-day gap: protected, freeze spent.
        let prev = active_streak(5, 1, at("2024-03-01T09:00:00Z"));
        let adv = advance(Some(&prev), "u1", StreakType::DailyPractice, at("2024-03-03T09:00:00Z"));
        assert_eq!(adv.outcome, AdvanceOutcome::FreezeConsumed);
        assert_eq!(adv.streak.current_count, 5);
        assert_eq!(adv.streak.freeze_count, 0);
    }

    #[test]
    fn gap_beyond_freeze_restarts() {
        let prev = active_streak(5, 0, at("2024-03-01T09:00:00Z"));
        // freeze_count + 2 days later: no protection left.
        let adv = advance(Some(&prev), "u1", StreakType::DailyPractice, at("2024-03-03T09:00:00Z"));
        assert_eq!(adv.outcome, AdvanceOutcome::Restarted);
        assert_eq!(adv.streak.current_count, 1);
        assert_eq!(adv.streak.longest_count, 5);
    }

    #[test]
    fn expired_row_restarts_on_activity() {
        let mut prev = active_streak(0, 2, at("2024-03-01T09:00:00Z"));
        prev.is_active = false;
        prev.longest_count = 9;
        let adv = advance(Some(&prev), "u1", StreakType::DailyPractice, at("2024-03-01T10:00:00Z"));
        assert_eq!(adv.outcome, AdvanceOutcome::Restarted);
        assert_eq!(adv.streak.current_count, 1);
        assert!(adv.streak.is_active);
        assert_eq!(adv.streak.longest_count, 9);
    }

    #[test]
    fn freeze_consumption_scales_with_gap() {
        let prev = active_streak(10, 3, at("2024-03-01T09:00:00Z"));
        // 4-day gap, within freeze_count + 1 = 4: consumes 3 units.
        let adv = advance(Some(&prev), "u1", StreakType::DailyPractice, at("2024-03-05T09:00:00Z"));
        assert_eq!(adv.outcome, AdvanceOutcome::FreezeConsumed);
        assert_eq!(adv.streak.current_count, 10);
        assert_eq!(adv.streak.freeze_count, 0);

        // 5-day gap exceeds protection.
        let broken = advance(Some(&prev), "u1", StreakType::DailyPractice, at("2024-03-06T09:00:00Z"));
        assert_eq!(broken.outcome, AdvanceOutcome::Restarted);
        assert_eq!(broken.streak.current_count, 1);
    }

    #[test]
    fn calendar_days_not_elapsed_hours() {
        // 23:30 -> 00:30 next day is a 1-day gap even though only an hour passed.
        let prev = active_streak(2, 0, at("2024-03-01T23:30:00Z"));
        let adv = advance(Some(&prev), "u1", StreakType::DailyPractice, at("2024-03-02T00:30:00Z"));
        assert_eq!(adv.outcome, AdvanceOutcome::Extended);
        assert_eq!(adv.streak.current_count, 3);
    }

    #[test]
    fn milestone_lookup_and_next() {
        let reward = milestone_reward(StreakType::DailyPractice, 7);
        assert_eq!(reward.xp, 150);
        assert_eq!(reward.badge, "Weekly Worker");

        let next = next_milestone(10, StreakType::DailyLogin).unwrap();
        assert_eq!(next.days, 14);
        assert_eq!(next.days_remaining, 4);
        assert_eq!(next.reward.badge, "Fortnight Fighter");

        assert!(next_milestone(365, StreakType::DailyLogin).is_none());
    }

    #[test]
    fn milestones_report_progress() {
        let list = milestones_for(30, StreakType::PerfectScore);
        assert_eq!(list.len(), MILESTONE_DAYS.len());
        assert!(list[0].achieved && list[3].achieved);
        assert!(!list[4].achieved);
        assert!((list[4].progress - 50.0).abs() < 1e-9);
    }

    #[test]
    fn last_activity_always_refreshes() {
        let t0 = at("2024-03-01T09:00:00Z");
        let prev = active_streak(3, 1, t0);
        for offset in [0i64, 1, 2, 10] {
            let later = t0 + Duration::days(offset);
            let adv = advance(Some(&prev), "u1", StreakType::DailyPractice, later);
            assert_eq!(adv.streak.last_activity, Some(later));
        }
    }
}

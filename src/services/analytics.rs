use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{keys, RedisCache};
use crate::db::operations::analytics::{self, DailyAnalyticsInput, UserAnalytics};
use crate::db::operations::mastery::{CharacterMastery, MasteryLevel};
use crate::db::operations::{mastery as mastery_ops, progress};
use crate::db::DatabaseProxy;
use crate::response::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyticsWindow {
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "30d")]
    Days30,
    #[serde(rename = "90d")]
    Days90,
    #[serde(rename = "1y")]
    Year,
}

impl AnalyticsWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Days7 => "7d",
            Self::Days30 => "30d",
            Self::Days90 => "90d",
            Self::Year => "1y",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            Self::Days7 => 7,
            Self::Days30 => 30,
            Self::Days90 => 90,
            Self::Year => 365,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "7d" => Self::Days7,
            "90d" => Self::Days90,
            "1y" => Self::Year,
            _ => Self::Days30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predictions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_to_next_level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_level_date: Option<NaiveDate>,
    pub mastery_projection: f64,
    pub recommended_focus: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningInsights {
    pub user_id: String,
    pub window: AnalyticsWindow,
    pub study_time_minutes: i64,
    pub characters_practiced: i64,
    pub accuracy_trend: Vec<f64>,
    pub weak_areas: Vec<String>,
    pub strong_areas: Vec<String>,
    pub improvement_rate: f64,
    pub predictions: Predictions,
}

/// Mean accuracy of the later half of the series minus the earlier half.
/// Series shorter than two points have no trend.
pub fn improvement_rate(series: &[f64]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let mid = series.len() / 2;
    let (earlier, later) = series.split_at(mid);
    let earlier_avg = earlier.iter().sum::<f64>() / earlier.len() as f64;
    let later_avg = later.iter().sum::<f64>() / later.len() as f64;
    later_avg - earlier_avg
}

/// Rule-based labels mirroring the mastery thresholds.
pub fn weak_area_labels(masteries: &[CharacterMastery], now: DateTime<Utc>) -> Vec<String> {
    let mut labels = Vec::new();

    let low_accuracy = masteries.iter().filter(|m| m.accuracy_score < 70.0).count();
    if low_accuracy > 0 {
        labels.push(format!("Low accuracy: {low_accuracy} characters"));
    }

    let few_practices = masteries.iter().filter(|m| m.practice_count < 3).count();
    if few_practices > 0 {
        labels.push(format!("Insufficient practice: {few_practices} characters"));
    }

    let due = masteries
        .iter()
        .filter(|m| m.next_review_date.map(|d| d <= now).unwrap_or(false))
        .count();
    if due > 0 {
        labels.push(format!("Due for review: {due} characters"));
    }

    let stroke_issues = masteries
        .iter()
        .filter(|m| m.stroke_order_score < 80.0)
        .count();
    if stroke_issues > 0 {
        labels.push(format!("Stroke order issues: {stroke_issues} characters"));
    }

    labels
}

pub fn strong_area_labels(masteries: &[CharacterMastery]) -> Vec<String> {
    let mut labels = Vec::new();

    let high_accuracy = masteries.iter().filter(|m| m.accuracy_score >= 90.0).count();
    if high_accuracy > 0 {
        labels.push(format!("High accuracy: {high_accuracy} characters"));
    }

    let mastered = masteries
        .iter()
        .filter(|m| m.mastery_level >= MasteryLevel::Mastered)
        .count();
    if mastered > 0 {
        labels.push(format!("Mastered: {mastered} characters"));
    }

    let consistent = masteries.iter().filter(|m| m.practice_count >= 10).count();
    if consistent > 0 {
        labels.push(format!("Consistent practice: {consistent} characters"));
    }

    let long_streaks = masteries.iter().filter(|m| m.streak_count >= 5).count();
    if long_streaks > 0 {
        labels.push(format!("Long streaks: {long_streaks} characters"));
    }

    labels
}

pub fn recommended_focus(masteries: &[CharacterMastery], now: DateTime<Utc>) -> Vec<String> {
    let mut recommendations = Vec::new();

    if masteries.iter().any(|m| m.accuracy_score < 70.0) {
        recommendations.push("Focus on characters with low accuracy scores".to_string());
    }
    if masteries
        .iter()
        .any(|m| m.next_review_date.map(|d| d <= now).unwrap_or(false))
    {
        recommendations.push("Review characters that are due for practice".to_string());
    }
    if masteries.iter().any(|m| m.practice_count < 3) {
        recommendations.push("Practice characters you haven't worked on much".to_string());
    }
    if masteries.iter().any(|m| m.stroke_order_score < 80.0) {
        recommendations.push("Improve stroke order for characters with low scores".to_string());
    }

    recommendations
}

fn build_predictions(
    xp_to_next_level: i64,
    analytics: &[UserAnalytics],
    masteries: &[CharacterMastery],
    now: DateTime<Utc>,
) -> Predictions {
    let total_xp: i64 = analytics.iter().map(|a| a.xp_earned).sum();
    let days = analytics.len().max(1) as f64;
    let average_daily_xp = total_xp as f64 / days;

    let days_to_next_level = if average_daily_xp > 0.0 {
        Some((xp_to_next_level as f64 / average_daily_xp).ceil() as i64)
    } else {
        None
    };
    let next_level_date = days_to_next_level.map(|d| (now + Duration::days(d)).date_naive());

    let total_characters = masteries.len();
    let mastered = masteries
        .iter()
        .filter(|m| m.mastery_level >= MasteryLevel::Mastered)
        .count();
    let mastery_rate = if total_characters > 0 {
        mastered as f64 / total_characters as f64
    } else {
        0.0
    };
    let mastery_projection = (mastery_rate * 100.0 + average_daily_xp * 0.1).min(100.0);

    Predictions {
        days_to_next_level,
        next_level_date,
        mastery_projection,
        recommended_focus: recommended_focus(masteries, now),
    }
}

/// Upserts the (user, day) rollup and drops the derived caches.
pub async fn record_daily_analytics(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    input: DailyAnalyticsInput,
    now: DateTime<Utc>,
) -> Result<UserAnalytics, EngineError> {
    let user_id = input.user_id.clone();
    let row = analytics::upsert_user_analytics(proxy.pool(), &input, now).await?;

    if let Some(cache) = cache {
        cache.del_prefix(&keys::user_analytics_prefix(&user_id)).await;
        cache
            .del_prefix(&keys::learning_insights_prefix(&user_id))
            .await;
    }

    info!(user_id = %user_id, date = %row.date, "daily analytics recorded");
    Ok(row)
}

pub async fn get_user_analytics(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    window: AnalyticsWindow,
    now: DateTime<Utc>,
) -> Result<Vec<UserAnalytics>, EngineError> {
    let key = keys::user_analytics_key(user_id, window.as_str());
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<Vec<UserAnalytics>>(&key).await {
            return Ok(hit);
        }
    }

    let end = now.date_naive();
    let start = end - Duration::days(window.days());
    let rows = analytics::list_user_analytics(proxy.pool(), user_id, start, end).await?;

    if let Some(cache) = cache {
        cache.set(&key, &rows, keys::ANALYTICS_TTL).await;
    }
    Ok(rows)
}

/// Read-only derivation over the daily rollups and the mastery table.
pub async fn generate_learning_insights(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    window: AnalyticsWindow,
    now: DateTime<Utc>,
) -> Result<LearningInsights, EngineError> {
    let key = keys::learning_insights_key(user_id, window.as_str());
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<LearningInsights>(&key).await {
            return Ok(hit);
        }
    }

    let user = progress::get_user_progress(proxy.pool(), user_id)
        .await?
        .ok_or(EngineError::UserNotFound)?;

    let rows = get_user_analytics(proxy, None, user_id, window, now).await?;
    let masteries = mastery_ops::list_user_masteries(proxy.pool(), user_id, None).await?;

    let accuracy_trend: Vec<f64> = rows.iter().map(|a| a.accuracy_average).collect();

    let insights = LearningInsights {
        user_id: user_id.to_string(),
        window,
        study_time_minutes: rows.iter().map(|a| a.study_time_minutes).sum(),
        characters_practiced: rows.iter().map(|a| a.characters_practiced).sum(),
        improvement_rate: improvement_rate(&accuracy_trend),
        weak_areas: weak_area_labels(&masteries, now),
        strong_areas: strong_area_labels(&masteries),
        predictions: build_predictions(user.xp_to_next_level, &rows, &masteries, now),
        accuracy_trend,
    };

    if let Some(cache) = cache {
        cache.set(&key, &insights, keys::INSIGHTS_TTL).await;
    }
    Ok(insights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operations::mastery::CharacterType;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn mastery(accuracy: f64, level: MasteryLevel, practice_count: i32) -> CharacterMastery {
        let now = at("2024-03-01T00:00:00Z");
        CharacterMastery {
            id: "m1".to_string(),
            user_id: "u1".to_string(),
            character_id: "c1".to_string(),
            character_type: CharacterType::Hiragana,
            mastery_level: level,
            accuracy_score: accuracy,
            practice_count,
            correct_count: 0,
            total_time_spent: 0,
            streak_count: 0,
            stroke_order_score: 90.0,
            recognition_score: accuracy,
            last_practiced: Some(now),
            next_review_date: Some(now + Duration::days(30)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn improvement_rate_compares_halves_chronologically() {
        assert_eq!(improvement_rate(&[]), 0.0);
        assert_eq!(improvement_rate(&[80.0]), 0.0);
        // Earlier half averages 70, later half 90.
        assert!((improvement_rate(&[70.0, 70.0, 90.0, 90.0]) - 20.0).abs() < 1e-9);
        // Declining accuracy goes negative.
        assert!(improvement_rate(&[90.0, 90.0, 70.0, 70.0]) < 0.0);
    }

    #[test]
    fn weak_and_strong_labels_follow_bands() {
        let now = at("2024-03-01T00:00:00Z");
        let set = vec![
            mastery(60.0, MasteryLevel::Learning, 2),
            mastery(96.0, MasteryLevel::Expert, 15),
            mastery(92.0, MasteryLevel::Mastered, 8),
        ];

        let weak = weak_area_labels(&set, now);
        assert!(weak.iter().any(|l| l.starts_with("Low accuracy: 1")));
        assert!(weak.iter().any(|l| l.starts_with("Insufficient practice: 1")));

        let strong = strong_area_labels(&set);
        assert!(strong.iter().any(|l| l.starts_with("High accuracy: 2")));
        assert!(strong.iter().any(|l| l.starts_with("Mastered: 2")));
    }

    #[test]
    fn empty_windows_stay_neutral() {
        let now = at("2024-03-01T00:00:00Z");
        let predictions = build_predictions(100, &[], &[], now);
        assert!(predictions.days_to_next_level.is_none());
        assert!(predictions.next_level_date.is_none());
        assert_eq!(predictions.mastery_projection, 0.0);
    }

    #[test]
    fn projection_caps_at_one_hundred() {
        let now = at("2024-03-01T00:00:00Z");
        let rows: Vec<UserAnalytics> = (0..3)
            .map(|i| UserAnalytics {
                id: format!("a{i}"),
                user_id: "u1".to_string(),
                date: now.date_naive() - Duration::days(i),
                study_time_minutes: 30,
                characters_practiced: 5,
                accuracy_average: 90.0,
                xp_earned: 10_000,
                achievements_unlocked: 0,
                streak_maintained: true,
                created_at: now,
            })
            .collect();
        let set = vec![mastery(96.0, MasteryLevel::Expert, 20)];
        let predictions = build_predictions(500, &rows, &set, now);
        assert_eq!(predictions.mastery_projection, 100.0);
        assert_eq!(predictions.days_to_next_level, Some(1));
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::cache::{keys, RedisCache};
use crate::db::operations::mastery::{
    self, CharacterMastery, CharacterType, MasteryLevel, PracticeSession,
};
use crate::db::DatabaseProxy;
use crate::response::EngineError;

const TREND_WINDOW_DAYS: i64 = 30;
const TREND_SESSION_LIMIT: i64 = 100;

/// A single graded practice attempt, as reported by the client.
#[derive(Debug, Clone)]
pub struct PracticeObservation {
    pub character_type: CharacterType,
    pub accuracy: f64,
    pub time_spent_secs: i64,
    pub is_perfect: bool,
    pub strokes_correct: i32,
    pub strokes_total: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryUpdate {
    pub mastery: CharacterMastery,
    pub practice_session: PracticeSession,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCount {
    pub level: MasteryLevel,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStat {
    pub character_type: CharacterType,
    pub count: i64,
    pub average_accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressTrends {
    pub average_accuracy: f64,
    pub improvement_rate: f64,
    pub practice_frequency: f64,
    pub streak_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryStatistics {
    pub total_masteries: i64,
    pub mastery_by_level: Vec<LevelCount>,
    pub mastery_by_type: Vec<TypeStat>,
    pub progress_trends: ProgressTrends,
}

fn validate(obs: &PracticeObservation) -> Result<(), EngineError> {
    if !(0.0..=100.0).contains(&obs.accuracy) {
        return Err(EngineError::validation("accuracy must be within 0-100"));
    }
    if obs.strokes_total < 1 {
        return Err(EngineError::validation("strokesTotal must be at least 1"));
    }
    if obs.strokes_correct < 0 || obs.strokes_correct > obs.strokes_total {
        return Err(EngineError::validation(
            "strokesCorrect must be within 0..=strokesTotal",
        ));
    }
    if obs.time_spent_secs < 0 {
        return Err(EngineError::validation("timeSpent must be non-negative"));
    }
    Ok(())
}

fn weighted_mean(old_value: f64, old_count: i32, observation: f64) -> f64 {
    (old_value * old_count as f64 + observation) / (old_count + 1) as f64
}

/// Thresholds evaluated highest bar first; the result never drops below the
/// level already held.
pub fn promoted_level(current: MasteryLevel, accuracy: f64, practice_count: i32) -> MasteryLevel {
    let earned = if accuracy >= 95.0 && practice_count >= 10 {
        MasteryLevel::Expert
    } else if accuracy >= 90.0 && practice_count >= 5 {
        MasteryLevel::Mastered
    } else if accuracy >= 80.0 && practice_count >= 3 {
        MasteryLevel::Practicing
    } else {
        MasteryLevel::Learning
    };
    earned.max(current)
}

/// Spaced-repetition interval in days.
pub fn review_interval_days(level: MasteryLevel, accuracy: f64, streak_count: i32) -> i64 {
    let mut days: i64 = match level {
        MasteryLevel::Learning => 1,
        MasteryLevel::Practicing => 3,
        MasteryLevel::Mastered => 7,
        MasteryLevel::Expert => 14,
    };

    if accuracy >= 95.0 {
        days *= 2;
    } else if accuracy < 70.0 {
        days = (days / 2).max(1);
    }

    if streak_count >= 5 {
        days = days * 3 / 2;
    }

    days
}

/// XP value recorded on the practice session. The ledger write happens
/// separately through the XP engine.
pub fn session_xp(accuracy: f64, time_spent_secs: i64, is_perfect: bool) -> i64 {
    let mut xp: i64 = 10;

    if accuracy >= 95.0 {
        xp += 20;
    } else if accuracy >= 90.0 {
        xp += 15;
    } else if accuracy >= 80.0 {
        xp += 10;
    } else if accuracy >= 70.0 {
        xp += 5;
    }

    if is_perfect {
        xp += 25;
    }

    if time_spent_secs < 30 {
        xp += 10;
    } else if time_spent_secs > 120 {
        xp += 5;
    }

    xp
}

/// Computes the full post-practice mastery state. First practice seeds the
/// row with raw observations; later practices fold them into running means.
pub fn apply_practice(
    existing: Option<&CharacterMastery>,
    user_id: &str,
    character_id: &str,
    obs: &PracticeObservation,
    now: DateTime<Utc>,
) -> CharacterMastery {
    let stroke_observation = obs.strokes_correct as f64 / obs.strokes_total as f64 * 100.0;

    match existing {
        None => {
            let next_review =
                now + Duration::days(review_interval_days(MasteryLevel::Learning, obs.accuracy, 1));
            CharacterMastery {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                character_id: character_id.to_string(),
                character_type: obs.character_type,
                mastery_level: MasteryLevel::Learning,
                accuracy_score: obs.accuracy,
                practice_count: 1,
                correct_count: if obs.is_perfect { 1 } else { 0 },
                total_time_spent: obs.time_spent_secs,
                streak_count: 1,
                stroke_order_score: stroke_observation,
                recognition_score: obs.accuracy,
                last_practiced: Some(now),
                next_review_date: Some(next_review),
                created_at: now,
                updated_at: now,
            }
        }
        Some(prev) => {
            let old_count = prev.practice_count;
            let practice_count = old_count + 1;

            let accuracy_score = weighted_mean(prev.accuracy_score, old_count, obs.accuracy);
            let stroke_order_score =
                weighted_mean(prev.stroke_order_score, old_count, stroke_observation);
            let recognition_score = weighted_mean(prev.recognition_score, old_count, obs.accuracy);

            let streak_count = match prev.last_practiced {
                Some(last) => {
                    let gap = (now.date_naive() - last.date_naive()).num_days();
                    if gap == 1 {
                        prev.streak_count + 1
                    } else if gap > 1 {
                        1
                    } else {
                        prev.streak_count
                    }
                }
                None => 1,
            };

            let mastery_level = promoted_level(prev.mastery_level, accuracy_score, practice_count);
            let next_review = now
                + Duration::days(review_interval_days(
                    mastery_level,
                    accuracy_score,
                    streak_count,
                ));

            CharacterMastery {
                id: prev.id.clone(),
                user_id: prev.user_id.clone(),
                character_id: prev.character_id.clone(),
                character_type: prev.character_type,
                mastery_level,
                accuracy_score,
                practice_count,
                correct_count: prev.correct_count + if obs.is_perfect { 1 } else { 0 },
                total_time_spent: prev.total_time_spent + obs.time_spent_secs,
                streak_count,
                stroke_order_score,
                recognition_score,
                last_practiced: Some(now),
                next_review_date: Some(next_review),
                created_at: prev.created_at,
                updated_at: now,
            }
        }
    }
}

/// Mastery mutation and the paired session insert commit as one unit.
pub async fn update_character_mastery(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    character_id: &str,
    obs: PracticeObservation,
    now: DateTime<Utc>,
) -> Result<MasteryUpdate, EngineError> {
    validate(&obs)?;

    let mut tx = proxy.pool().begin().await?;

    let existing = mastery::get_character_mastery_for_update(&mut tx, user_id, character_id).await?;
    let updated = apply_practice(existing.as_ref(), user_id, character_id, &obs, now);
    mastery::upsert_character_mastery(&mut tx, &updated).await?;

    let session = PracticeSession {
        id: uuid::Uuid::new_v4().to_string(),
        character_mastery_id: updated.id.clone(),
        user_id: user_id.to_string(),
        character_id: character_id.to_string(),
        start_time: now - Duration::seconds(obs.time_spent_secs),
        end_time: now,
        duration: obs.time_spent_secs,
        accuracy: obs.accuracy,
        strokes_correct: obs.strokes_correct,
        strokes_total: obs.strokes_total,
        xp_earned: session_xp(obs.accuracy, obs.time_spent_secs, obs.is_perfect),
        is_perfect: obs.is_perfect,
        notes: obs
            .is_perfect
            .then(|| "Perfect practice session".to_string()),
        created_at: now,
    };
    mastery::insert_practice_session(&mut tx, &session).await?;

    tx.commit().await?;

    if let Some(cache) = cache {
        cache
            .del(&keys::character_mastery_key(user_id, character_id))
            .await;
        cache.del_prefix(&keys::user_masteries_prefix(user_id)).await;
    }

    info!(
        user_id,
        character_id,
        accuracy = obs.accuracy,
        mastery_level = updated.mastery_level.as_str(),
        "character mastery updated"
    );

    Ok(MasteryUpdate {
        mastery: updated,
        practice_session: session,
    })
}

pub async fn get_character_mastery(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    character_id: &str,
) -> Result<CharacterMastery, EngineError> {
    let key = keys::character_mastery_key(user_id, character_id);
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<CharacterMastery>(&key).await {
            return Ok(hit);
        }
    }

    let row = mastery::get_character_mastery(proxy.pool(), user_id, character_id)
        .await?
        .ok_or(EngineError::MasteryNotFound)?;

    if let Some(cache) = cache {
        cache.set(&key, &row, keys::MASTERY_TTL).await;
    }
    Ok(row)
}

pub async fn get_user_character_masteries(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    character_type: Option<CharacterType>,
) -> Result<Vec<CharacterMastery>, EngineError> {
    let qualifier = character_type.map(|t| t.as_str()).unwrap_or("all");
    let key = keys::user_masteries_key(user_id, qualifier);
    if let Some(cache) = cache {
        if let Some(hit) = cache.get::<Vec<CharacterMastery>>(&key).await {
            return Ok(hit);
        }
    }

    let rows = mastery::list_user_masteries(proxy.pool(), user_id, character_type).await?;

    if let Some(cache) = cache {
        cache.set(&key, &rows, keys::MASTERY_TTL).await;
    }
    Ok(rows)
}

pub async fn get_characters_for_review(
    proxy: &DatabaseProxy,
    user_id: &str,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<Vec<CharacterMastery>, EngineError> {
    let rows = mastery::list_due_for_review(proxy.pool(), user_id, now, limit.clamp(1, 100)).await?;
    Ok(rows)
}

pub async fn get_weak_areas(
    proxy: &DatabaseProxy,
    user_id: &str,
    limit: i64,
) -> Result<Vec<CharacterMastery>, EngineError> {
    let rows = mastery::list_weak_areas(proxy.pool(), user_id, limit.clamp(1, 100)).await?;
    Ok(rows)
}

pub async fn get_mastery_statistics(
    proxy: &DatabaseProxy,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<MasteryStatistics, EngineError> {
    let pool = proxy.pool();

    let level_counts = mastery::mastery_level_counts(pool, user_id).await?;
    let type_stats = mastery::mastery_type_stats(pool, user_id).await?;
    let sessions = mastery::recent_sessions(
        pool,
        user_id,
        now - Duration::days(TREND_WINDOW_DAYS),
        TREND_SESSION_LIMIT,
    )
    .await?;

    let total_masteries = level_counts.iter().map(|(_, count)| count).sum();

    Ok(MasteryStatistics {
        total_masteries,
        mastery_by_level: level_counts
            .into_iter()
            .map(|(level, count)| LevelCount { level, count })
            .collect(),
        mastery_by_type: type_stats
            .into_iter()
            .map(|(character_type, count, average_accuracy)| TypeStat {
                character_type,
                count,
                average_accuracy,
            })
            .collect(),
        progress_trends: progress_trends(&sessions, now),
    })
}

/// Trends over the recent session window. Sessions arrive newest-first from
/// the store; the improvement comparison is chronological.
fn progress_trends(sessions: &[PracticeSession], now: DateTime<Utc>) -> ProgressTrends {
    if sessions.is_empty() {
        return ProgressTrends {
            average_accuracy: 0.0,
            improvement_rate: 0.0,
            practice_frequency: 0.0,
            streak_count: 0,
        };
    }

    let average_accuracy =
        sessions.iter().map(|s| s.accuracy).sum::<f64>() / sessions.len() as f64;

    let mut chronological: Vec<f64> = sessions.iter().rev().map(|s| s.accuracy).collect();
    let improvement_rate = if chronological.len() < 2 {
        0.0
    } else {
        let mid = chronological.len() / 2;
        let later = chronological.split_off(mid);
        let earlier_avg = chronological.iter().sum::<f64>() / chronological.len() as f64;
        let later_avg = later.iter().sum::<f64>() / later.len() as f64;
        later_avg - earlier_avg
    };

    let oldest = sessions
        .last()
        .map(|s| s.created_at)
        .unwrap_or(now);
    let span_days = ((now - oldest).num_days()).max(1);
    let practice_frequency = sessions.len() as f64 / span_days as f64;

    let mut streak_count: i64 = 0;
    let today = now.date_naive();
    let mut dates: Vec<chrono::NaiveDate> = sessions.iter().map(|s| s.created_at.date_naive()).collect();
    dates.dedup();
    for date in dates {
        if date == today - Duration::days(streak_count) {
            streak_count += 1;
        } else {
            break;
        }
    }

    ProgressTrends {
        average_accuracy,
        improvement_rate,
        practice_frequency,
        streak_count,
    }
}

/// Admin reset: practice history and the mastery row go together.
pub async fn reset_character_mastery(
    proxy: &DatabaseProxy,
    cache: Option<&RedisCache>,
    user_id: &str,
    character_id: &str,
) -> Result<(), EngineError> {
    let mut tx = proxy.pool().begin().await?;
    mastery::delete_practice_sessions(&mut tx, user_id, character_id).await?;
    mastery::delete_character_mastery(&mut tx, user_id, character_id).await?;
    tx.commit().await?;

    if let Some(cache) = cache {
        cache
            .del(&keys::character_mastery_key(user_id, character_id))
            .await;
        cache.del_prefix(&keys::user_masteries_prefix(user_id)).await;
    }

    info!(user_id, character_id, "character mastery reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(accuracy: f64, time: i64, perfect: bool, correct: i32, total: i32) -> PracticeObservation {
        PracticeObservation {
            character_type: CharacterType::Hiragana,
            accuracy,
            time_spent_secs: time,
            is_perfect: perfect,
            strokes_correct: correct,
            strokes_total: total,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn first_practice_seeds_learning_row() {
        let now = at("2024-03-01T10:00:00Z");
        let m = apply_practice(None, "u1", "c1", &obs(96.0, 25, true, 3, 3), now);
        assert_eq!(m.mastery_level, MasteryLevel::Learning);
        assert_eq!(m.accuracy_score, 96.0);
        assert_eq!(m.practice_count, 1);
        assert_eq!(m.correct_count, 1);
        assert_eq!(m.streak_count, 1);
        assert_eq!(m.stroke_order_score, 100.0);
        assert!(m.next_review_date.unwrap() >= m.last_practiced.unwrap());
        // LEARNING base 1 day, doubled by the >=95 accuracy band.
        assert_eq!(m.next_review_date.unwrap(), now + Duration::days(2));
    }

    #[test]
    fn session_xp_bands_stack() {
        assert_eq!(session_xp(96.0, 25, true), 10 + 20 + 25 + 10);
        assert_eq!(session_xp(92.0, 60, false), 10 + 15);
        assert_eq!(session_xp(85.0, 130, false), 10 + 10 + 5);
        assert_eq!(session_xp(50.0, 60, false), 10);
    }

    #[test]
    fn weighted_means_fold_incrementally() {
        let now = at("2024-03-01T10:00:00Z");
        let first = apply_practice(None, "u1", "c1", &obs(80.0, 30, false, 2, 4), now);
        let second = apply_practice(
            Some(&first),
            "u1",
            "c1",
            &obs(100.0, 30, true, 4, 4),
            now + Duration::hours(1),
        );
        assert_eq!(second.practice_count, 2);
        assert!((second.accuracy_score - 90.0).abs() < 1e-9);
        assert!((second.stroke_order_score - 75.0).abs() < 1e-9);
        assert!((second.recognition_score - 90.0).abs() < 1e-9);
        assert_eq!(second.total_time_spent, 60);
    }

    #[test]
    fn promotion_respects_priority_order() {
        assert_eq!(promoted_level(MasteryLevel::Learning, 96.0, 12), MasteryLevel::Expert);
        assert_eq!(promoted_level(MasteryLevel::Learning, 92.0, 6), MasteryLevel::Mastered);
        assert_eq!(promoted_level(MasteryLevel::Learning, 85.0, 3), MasteryLevel::Practicing);
        assert_eq!(promoted_level(MasteryLevel::Learning, 85.0, 2), MasteryLevel::Learning);
    }

    #[test]
    fn promotion_never_demotes() {
        // Accuracy slipped below the MASTERED bar, held level stays.
        assert_eq!(promoted_level(MasteryLevel::Mastered, 85.0, 6), MasteryLevel::Mastered);
        assert_eq!(promoted_level(MasteryLevel::Expert, 50.0, 100), MasteryLevel::Expert);
    }

    #[test]
    fn review_interval_scales_with_level() {
        for accuracy in [75.0, 92.0, 97.0] {
            let days: Vec<i64> = [
                MasteryLevel::Learning,
                MasteryLevel::Practicing,
                MasteryLevel::Mastered,
                MasteryLevel::Expert,
            ]
            .iter()
            .map(|level| review_interval_days(*level, accuracy, 1))
            .collect();
            assert!(days.windows(2).all(|w| w[0] < w[1]), "accuracy {accuracy}: {days:?}");
        }
    }

    #[test]
    fn review_interval_adjustments() {
        assert_eq!(review_interval_days(MasteryLevel::Mastered, 96.0, 1), 14);
        assert_eq!(review_interval_days(MasteryLevel::Mastered, 60.0, 1), 3);
        assert_eq!(review_interval_days(MasteryLevel::Learning, 60.0, 1), 1);
        // Streak factor applies after the accuracy adjustment.
        assert_eq!(review_interval_days(MasteryLevel::Mastered, 85.0, 5), 10);
        assert_eq!(review_interval_days(MasteryLevel::Expert, 96.0, 5), 42);
    }

    #[test]
    fn character_streak_follows_calendar_days() {
        let day1 = at("2024-03-01T22:00:00Z");
        let first = apply_practice(None, "u1", "c1", &obs(90.0, 30, false, 3, 3), day1);
        assert_eq!(first.streak_count, 1);

        // Next calendar day, even if fewer than 24 hours elapsed.
        let day2 = at("2024-03-02T06:00:00Z");
        let second = apply_practice(Some(&first), "u1", "c1", &obs(90.0, 30, false, 3, 3), day2);
        assert_eq!(second.streak_count, 2);

        let same_day = apply_practice(
            Some(&second),
            "u1",
            "c1",
            &obs(90.0, 30, false, 3, 3),
            at("2024-03-02T20:00:00Z"),
        );
        assert_eq!(same_day.streak_count, 2);

        let after_gap = apply_practice(
            Some(&same_day),
            "u1",
            "c1",
            &obs(90.0, 30, false, 3, 3),
            at("2024-03-05T10:00:00Z"),
        );
        assert_eq!(after_gap.streak_count, 1);
    }

    #[test]
    fn validation_rejects_bad_observations() {
        assert!(validate(&obs(101.0, 10, false, 1, 1)).is_err());
        assert!(validate(&obs(-1.0, 10, false, 1, 1)).is_err());
        assert!(validate(&obs(90.0, 10, false, 1, 0)).is_err());
        assert!(validate(&obs(90.0, 10, false, 5, 3)).is_err());
        assert!(validate(&obs(90.0, -5, false, 1, 1)).is_err());
        assert!(validate(&obs(90.0, 10, false, 1, 1)).is_ok());
    }
}

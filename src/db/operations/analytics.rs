use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::to_utc;

/// One row per (user, day), upserted as activity lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnalytics {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub study_time_minutes: i64,
    pub characters_practiced: i64,
    pub accuracy_average: f64,
    pub xp_earned: i64,
    pub achievements_unlocked: i64,
    pub streak_maintained: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DailyAnalyticsInput {
    pub user_id: String,
    pub date: NaiveDate,
    pub study_time_minutes: i64,
    pub characters_practiced: i64,
    pub accuracy_average: f64,
    pub xp_earned: i64,
    pub achievements_unlocked: i64,
    pub streak_maintained: bool,
}

fn map_analytics(row: &PgRow) -> UserAnalytics {
    UserAnalytics {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        date: row.try_get("date").unwrap_or_default(),
        study_time_minutes: row.try_get("studyTimeMinutes").unwrap_or(0),
        characters_practiced: row.try_get("charactersPracticed").unwrap_or(0),
        accuracy_average: row.try_get("accuracyAverage").unwrap_or(0.0),
        xp_earned: row.try_get("xpEarned").unwrap_or(0),
        achievements_unlocked: row.try_get("achievementsUnlocked").unwrap_or(0),
        streak_maintained: row.try_get("streakMaintained").unwrap_or(false),
        created_at: to_utc(row.try_get("createdAt").unwrap_or_default()),
    }
}

pub async fn upsert_user_analytics(
    pool: &PgPool,
    input: &DailyAnalyticsInput,
    now: DateTime<Utc>,
) -> Result<UserAnalytics, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO "user_analytics"
           ("id","userId","date","studyTimeMinutes","charactersPracticed","accuracyAverage",
            "xpEarned","achievementsUnlocked","streakMaintained","createdAt")
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
           ON CONFLICT ("userId","date") DO UPDATE SET
             "studyTimeMinutes" = EXCLUDED."studyTimeMinutes",
             "charactersPracticed" = EXCLUDED."charactersPracticed",
             "accuracyAverage" = EXCLUDED."accuracyAverage",
             "xpEarned" = EXCLUDED."xpEarned",
             "achievementsUnlocked" = EXCLUDED."achievementsUnlocked",
             "streakMaintained" = EXCLUDED."streakMaintained"
           RETURNING *"#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&input.user_id)
    .bind(input.date)
    .bind(input.study_time_minutes)
    .bind(input.characters_practiced)
    .bind(input.accuracy_average)
    .bind(input.xp_earned)
    .bind(input.achievements_unlocked)
    .bind(input.streak_maintained)
    .bind(now.naive_utc())
    .fetch_one(pool)
    .await?;
    Ok(map_analytics(&row))
}

pub async fn list_user_analytics(
    pool: &PgPool,
    user_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<UserAnalytics>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "user_analytics"
           WHERE "userId" = $1 AND "date" >= $2 AND "date" <= $3
           ORDER BY "date" ASC"#,
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_analytics).collect())
}

pub async fn delete_analytics_before(
    pool: &PgPool,
    cutoff: NaiveDate,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "user_analytics" WHERE "date" < $1"#)
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

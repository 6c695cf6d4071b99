use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{to_utc, to_utc_opt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreakType {
    DailyLogin,
    DailyPractice,
    PerfectScore,
    WeeklyStudy,
    MonthlyGoal,
}

impl StreakType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyLogin => "DAILY_LOGIN",
            Self::DailyPractice => "DAILY_PRACTICE",
            Self::PerfectScore => "PERFECT_SCORE",
            Self::WeeklyStudy => "WEEKLY_STUDY",
            Self::MonthlyGoal => "MONTHLY_GOAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "DAILY_LOGIN" => Self::DailyLogin,
            "PERFECT_SCORE" => Self::PerfectScore,
            "WEEKLY_STUDY" => Self::WeeklyStudy,
            "MONTHLY_GOAL" => Self::MonthlyGoal,
            _ => Self::DailyPractice,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub streak_type: StreakType,
    pub current_count: i32,
    pub longest_count: i32,
    pub last_activity: Option<DateTime<Utc>>,
    pub freeze_count: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakAggregates {
    pub total_streaks: i64,
    pub average_streak: f64,
    pub longest_streak: i32,
}

fn map_streak(row: &PgRow) -> Streak {
    let streak_type: String = row.try_get("type").unwrap_or_default();
    Streak {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        streak_type: StreakType::parse(&streak_type),
        current_count: row.try_get("currentCount").unwrap_or(0),
        longest_count: row.try_get("longestCount").unwrap_or(0),
        last_activity: to_utc_opt(row.try_get("lastActivity").ok()),
        freeze_count: row.try_get("freezeCount").unwrap_or(0),
        is_active: row.try_get("isActive").unwrap_or(false),
        created_at: to_utc(row.try_get("createdAt").unwrap_or_default()),
        updated_at: to_utc(row.try_get("updatedAt").unwrap_or_default()),
    }
}

pub async fn get_streak(
    pool: &PgPool,
    user_id: &str,
    streak_type: StreakType,
) -> Result<Option<Streak>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "streaks" WHERE "userId" = $1 AND "type" = $2 LIMIT 1"#)
        .bind(user_id)
        .bind(streak_type.as_str())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| map_streak(&r)))
}

pub async fn get_streak_for_update(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    streak_type: StreakType,
) -> Result<Option<Streak>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "streaks" WHERE "userId" = $1 AND "type" = $2 FOR UPDATE"#)
        .bind(user_id)
        .bind(streak_type.as_str())
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map(|r| map_streak(&r)))
}

pub async fn upsert_streak(
    tx: &mut Transaction<'_, Postgres>,
    streak: &Streak,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "streaks"
           ("id","userId","type","currentCount","longestCount","lastActivity","freezeCount",
            "isActive","createdAt","updatedAt")
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
           ON CONFLICT ("userId","type") DO UPDATE SET
             "currentCount" = EXCLUDED."currentCount",
             "longestCount" = EXCLUDED."longestCount",
             "lastActivity" = EXCLUDED."lastActivity",
             "freezeCount" = EXCLUDED."freezeCount",
             "isActive" = EXCLUDED."isActive",
             "updatedAt" = EXCLUDED."updatedAt""#,
    )
    .bind(&streak.id)
    .bind(&streak.user_id)
    .bind(streak.streak_type.as_str())
    .bind(streak.current_count)
    .bind(streak.longest_count)
    .bind(streak.last_activity.map(|d| d.naive_utc()))
    .bind(streak.freeze_count)
    .bind(streak.is_active)
    .bind(streak.created_at.naive_utc())
    .bind(streak.updated_at.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn set_freeze_count(
    pool: &PgPool,
    streak_id: &str,
    freeze_count: i32,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE "streaks" SET "freezeCount" = $2, "updatedAt" = $3 WHERE "id" = $1"#)
        .bind(streak_id)
        .bind(freeze_count)
        .bind(now.naive_utc())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_user_streaks(
    pool: &PgPool,
    user_id: &str,
    streak_type: Option<StreakType>,
) -> Result<Vec<Streak>, sqlx::Error> {
    let rows = match streak_type {
        Some(kind) => {
            sqlx::query(
                r#"SELECT * FROM "streaks" WHERE "userId" = $1 AND "isActive" AND "type" = $2
                   ORDER BY "type" ASC"#,
            )
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"SELECT * FROM "streaks" WHERE "userId" = $1 AND "isActive" ORDER BY "type" ASC"#,
            )
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.iter().map(map_streak).collect())
}

/// Every active streak, for the daily expiry sweep.
pub async fn list_active_streaks(pool: &PgPool) -> Result<Vec<Streak>, sqlx::Error> {
    let rows = sqlx::query(r#"SELECT * FROM "streaks" WHERE "isActive""#)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(map_streak).collect())
}

pub async fn expire_streak(
    pool: &PgPool,
    streak_id: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "streaks" SET "currentCount" = 0, "isActive" = FALSE, "updatedAt" = $2
           WHERE "id" = $1"#,
    )
    .bind(streak_id)
    .bind(now.naive_utc())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_streak(
    pool: &PgPool,
    user_id: &str,
    streak_type: StreakType,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "streaks" WHERE "userId" = $1 AND "type" = $2"#)
        .bind(user_id)
        .bind(streak_type.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn streak_aggregates(pool: &PgPool, user_id: &str) -> Result<StreakAggregates, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT COUNT(*) AS "total", COALESCE(AVG("currentCount"), 0)::FLOAT8 AS "avg",
                  COALESCE(MAX("longestCount"), 0) AS "longest"
           FROM "streaks" WHERE "userId" = $1 AND "isActive""#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(StreakAggregates {
        total_streaks: row.try_get("total").unwrap_or(0),
        average_streak: row.try_get("avg").unwrap_or(0.0),
        longest_streak: row.try_get("longest").unwrap_or(0),
    })
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{to_utc, to_utc_opt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaderboardPeriod {
    Daily,
    Weekly,
    Monthly,
    AllTime,
}

impl LeaderboardPeriod {
    pub const ALL: [LeaderboardPeriod; 4] =
        [Self::Daily, Self::Weekly, Self::Monthly, Self::AllTime];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::AllTime => "ALL_TIME",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "WEEKLY" => Self::Weekly,
            "MONTHLY" => Self::Monthly,
            "ALL_TIME" => Self::AllTime,
            _ => Self::Daily,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: String,
    pub user_id: String,
    pub period: LeaderboardPeriod,
    pub rank: i32,
    pub score: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Windowed per-user activity rollup the scorer consumes. Everything except
/// level and streak is restricted to the period window by the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPeriodSnapshot {
    pub user_id: String,
    pub period_xp: i64,
    pub current_level: i32,
    pub streak_count: i32,
    pub mastered_characters: i64,
    pub unlocked_achievements: i64,
    pub practice_days: i64,
    pub average_accuracy: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub total_users: i64,
    pub average_score: f64,
    pub top_score: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

fn map_entry(row: &PgRow) -> LeaderboardEntry {
    let period: String = row.try_get("period").unwrap_or_default();
    LeaderboardEntry {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        period: LeaderboardPeriod::parse(&period),
        rank: row.try_get("rank").unwrap_or(0),
        score: row.try_get("score").unwrap_or(0),
        metadata: row.try_get("metadata").unwrap_or(serde_json::Value::Null),
        created_at: to_utc(row.try_get("createdAt").unwrap_or_default()),
        updated_at: to_utc(row.try_get("updatedAt").unwrap_or_default()),
    }
}

fn map_snapshot(row: &PgRow) -> UserPeriodSnapshot {
    UserPeriodSnapshot {
        user_id: row.try_get("userId").unwrap_or_default(),
        period_xp: row.try_get("periodXp").unwrap_or(0),
        current_level: row.try_get("currentLevel").unwrap_or(1),
        streak_count: row.try_get("streakCount").unwrap_or(0),
        mastered_characters: row.try_get("masteredCharacters").unwrap_or(0),
        unlocked_achievements: row.try_get("unlockedAchievements").unwrap_or(0),
        practice_days: row.try_get("practiceDays").unwrap_or(0),
        average_accuracy: row.try_get("averageAccuracy").unwrap_or(0.0),
    }
}

/// One pass over every user with a progress row, with the windowed aggregates
/// joined in. `window_start` of None means all-time.
pub async fn load_user_snapshots(
    pool: &PgPool,
    window_start: Option<DateTime<Utc>>,
) -> Result<Vec<UserPeriodSnapshot>, sqlx::Error> {
    let cutoff = window_start
        .map(|d| d.naive_utc())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH.naive_utc());

    let rows = sqlx::query(
        r#"SELECT up."userId",
                  up."currentLevel",
                  up."streakCount",
                  COALESCE(x."periodXp", 0) AS "periodXp",
                  COALESCE(m."masteredCharacters", 0) AS "masteredCharacters",
                  COALESCE(m."practiceDays", 0) AS "practiceDays",
                  COALESCE(m."averageAccuracy", 0) AS "averageAccuracy",
                  COALESCE(a."unlockedAchievements", 0) AS "unlockedAchievements"
           FROM "user_progress" up
           LEFT JOIN (
             SELECT "userId", SUM("amount")::BIGINT AS "periodXp"
             FROM "xp_transactions" WHERE "createdAt" >= $1 GROUP BY "userId"
           ) x ON x."userId" = up."userId"
           LEFT JOIN (
             SELECT "userId",
                    COUNT(*) FILTER (WHERE "masteryLevel" IN ('MASTERED','EXPERT')) AS "masteredCharacters",
                    COUNT(DISTINCT DATE("lastPracticed")) AS "practiceDays",
                    COALESCE(AVG("accuracyScore"), 0)::FLOAT8 AS "averageAccuracy"
             FROM "character_masteries" WHERE "lastPracticed" >= $1 GROUP BY "userId"
           ) m ON m."userId" = up."userId"
           LEFT JOIN (
             SELECT "userId", COUNT(*) AS "unlockedAchievements"
             FROM "user_achievements" WHERE "isUnlocked" AND "unlockedAt" >= $1 GROUP BY "userId"
           ) a ON a."userId" = up."userId""#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(map_snapshot).collect())
}

/// Full replace for a period: delete everything, reinsert the ranked list.
/// Runs inside the caller's transaction so a partial write is never visible.
pub async fn replace_period_entries(
    tx: &mut Transaction<'_, Postgres>,
    period: LeaderboardPeriod,
    entries: &[(String, i32, i64, serde_json::Value)],
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"DELETE FROM "leaderboard_entries" WHERE "period" = $1"#)
        .bind(period.as_str())
        .execute(&mut **tx)
        .await?;

    for (user_id, rank, score, metadata) in entries {
        sqlx::query(
            r#"INSERT INTO "leaderboard_entries"
               ("id","userId","period","rank","score","metadata","createdAt","updatedAt")
               VALUES ($1,$2,$3,$4,$5,$6,$7,$7)"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(period.as_str())
        .bind(rank)
        .bind(score)
        .bind(metadata)
        .bind(now.naive_utc())
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

pub async fn period_stats(
    pool: &PgPool,
    period: LeaderboardPeriod,
) -> Result<PeriodStats, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT COUNT(*) AS "total", COALESCE(AVG("score"), 0)::FLOAT8 AS "avg",
                  COALESCE(MAX("score"), 0)::BIGINT AS "top", MAX("updatedAt") AS "lastUpdated"
           FROM "leaderboard_entries" WHERE "period" = $1"#,
    )
    .bind(period.as_str())
    .fetch_one(pool)
    .await?;

    Ok(PeriodStats {
        total_users: row.try_get("total").unwrap_or(0),
        average_score: row.try_get("avg").unwrap_or(0.0),
        top_score: row.try_get("top").unwrap_or(0),
        last_updated: to_utc_opt(row.try_get("lastUpdated").ok()),
    })
}

pub async fn user_history(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "leaderboard_entries" WHERE "userId" = $1
           ORDER BY "updatedAt" DESC LIMIT $2"#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_entry).collect())
}

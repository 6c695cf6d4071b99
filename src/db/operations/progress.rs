use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{to_utc, to_utc_opt};

/// Activity kinds that can mint XP. Stored as text in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum XpSource {
    CharacterPractice,
    PerfectStroke,
    DailyStreak,
    AchievementUnlock,
    LessonCompletion,
    VocabularyLearned,
    StreakMilestone,
    PerfectScore,
    DailyLogin,
    WeeklyChallenge,
    MonthlyChallenge,
    SocialShare,
    ReviewSession,
    MistakeCorrection,
    SpeedChallenge,
}

impl XpSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CharacterPractice => "CHARACTER_PRACTICE",
            Self::PerfectStroke => "PERFECT_STROKE",
            Self::DailyStreak => "DAILY_STREAK",
            Self::AchievementUnlock => "ACHIEVEMENT_UNLOCK",
            Self::LessonCompletion => "LESSON_COMPLETION",
            Self::VocabularyLearned => "VOCABULARY_LEARNED",
            Self::StreakMilestone => "STREAK_MILESTONE",
            Self::PerfectScore => "PERFECT_SCORE",
            Self::DailyLogin => "DAILY_LOGIN",
            Self::WeeklyChallenge => "WEEKLY_CHALLENGE",
            Self::MonthlyChallenge => "MONTHLY_CHALLENGE",
            Self::SocialShare => "SOCIAL_SHARE",
            Self::ReviewSession => "REVIEW_SESSION",
            Self::MistakeCorrection => "MISTAKE_CORRECTION",
            Self::SpeedChallenge => "SPEED_CHALLENGE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PERFECT_STROKE" => Self::PerfectStroke,
            "DAILY_STREAK" => Self::DailyStreak,
            "ACHIEVEMENT_UNLOCK" => Self::AchievementUnlock,
            "LESSON_COMPLETION" => Self::LessonCompletion,
            "VOCABULARY_LEARNED" => Self::VocabularyLearned,
            "STREAK_MILESTONE" => Self::StreakMilestone,
            "PERFECT_SCORE" => Self::PerfectScore,
            "DAILY_LOGIN" => Self::DailyLogin,
            "WEEKLY_CHALLENGE" => Self::WeeklyChallenge,
            "MONTHLY_CHALLENGE" => Self::MonthlyChallenge,
            "SOCIAL_SHARE" => Self::SocialShare,
            "REVIEW_SESSION" => Self::ReviewSession,
            "MISTAKE_CORRECTION" => Self::MistakeCorrection,
            "SPEED_CHALLENGE" => Self::SpeedChallenge,
            _ => Self::CharacterPractice,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub id: String,
    pub user_id: String,
    pub current_level: i32,
    pub total_xp: i64,
    pub current_xp: i64,
    pub xp_to_next_level: i64,
    pub level_name: String,
    pub streak_count: i32,
    pub longest_streak: i32,
    pub last_activity_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpTransaction {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub source: XpSource,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTotal {
    pub source: XpSource,
    pub total_xp: i64,
    pub count: i64,
}

fn map_user_progress(row: &PgRow) -> UserProgress {
    UserProgress {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        current_level: row.try_get("currentLevel").unwrap_or(1),
        total_xp: row.try_get("totalXp").unwrap_or(0),
        current_xp: row.try_get("currentXp").unwrap_or(0),
        xp_to_next_level: row.try_get("xpToNextLevel").unwrap_or(0),
        level_name: row
            .try_get("levelName")
            .unwrap_or_else(|_| "Bronze".to_string()),
        streak_count: row.try_get("streakCount").unwrap_or(0),
        longest_streak: row.try_get("longestStreak").unwrap_or(0),
        last_activity_date: to_utc_opt(row.try_get("lastActivityDate").ok()),
        created_at: to_utc(row.try_get("createdAt").unwrap_or_default()),
        updated_at: to_utc(row.try_get("updatedAt").unwrap_or_default()),
    }
}

fn map_xp_transaction(row: &PgRow) -> XpTransaction {
    let source: String = row.try_get("source").unwrap_or_default();
    XpTransaction {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        amount: row.try_get("amount").unwrap_or(0),
        source: XpSource::parse(&source),
        description: row.try_get("description").unwrap_or_default(),
        metadata: row
            .try_get("metadata")
            .unwrap_or(serde_json::Value::Null),
        created_at: to_utc(row.try_get("createdAt").unwrap_or_default()),
    }
}

pub async fn get_user_progress(
    pool: &PgPool,
    user_id: &str,
) -> Result<Option<UserProgress>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "user_progress" WHERE "userId" = $1 LIMIT 1"#)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| map_user_progress(&r)))
}

/// Row-locked read used inside XP/streak transactions so concurrent awards
/// for the same user serialize instead of interleaving.
pub async fn get_user_progress_for_update(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
) -> Result<Option<UserProgress>, sqlx::Error> {
    let row = sqlx::query(r#"SELECT * FROM "user_progress" WHERE "userId" = $1 FOR UPDATE"#)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map(|r| map_user_progress(&r)))
}

pub async fn create_user_progress(
    pool: &PgPool,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<UserProgress, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO "user_progress"
           ("id","userId","currentLevel","totalXp","currentXp","xpToNextLevel","levelName",
            "streakCount","longestStreak","createdAt","updatedAt")
           VALUES ($1,$2,1,0,0,100,'Bronze',0,0,$3,$3)
           ON CONFLICT ("userId") DO UPDATE SET "updatedAt" = "user_progress"."updatedAt"
           RETURNING *"#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(now.naive_utc())
    .fetch_one(pool)
    .await?;
    Ok(map_user_progress(&row))
}

pub async fn apply_xp_award(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    total_xp: i64,
    current_xp: i64,
    level: i32,
    level_name: &str,
    xp_to_next: i64,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "user_progress"
           SET "totalXp" = $2, "currentXp" = $3, "currentLevel" = $4, "levelName" = $5,
               "xpToNextLevel" = $6, "lastActivityDate" = $7, "updatedAt" = $7
           WHERE "userId" = $1"#,
    )
    .bind(user_id)
    .bind(total_xp)
    .bind(current_xp)
    .bind(level)
    .bind(level_name)
    .bind(xp_to_next)
    .bind(now.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Denormalized mirror of the DAILY_PRACTICE streak on the progress row.
pub async fn update_progress_streak(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    streak_count: i32,
    longest_streak: i32,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "user_progress"
           SET "streakCount" = $2, "longestStreak" = GREATEST("longestStreak", $3), "updatedAt" = $4
           WHERE "userId" = $1"#,
    )
    .bind(user_id)
    .bind(streak_count)
    .bind(longest_streak)
    .bind(now.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn reset_progress(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE "user_progress"
           SET "totalXp" = 0, "currentXp" = 0, "currentLevel" = 1, "levelName" = 'Bronze',
               "xpToNextLevel" = 100, "updatedAt" = $2
           WHERE "userId" = $1"#,
    )
    .bind(user_id)
    .bind(now.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn insert_xp_transaction(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    amount: i64,
    source: XpSource,
    description: &str,
    metadata: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<XpTransaction, sqlx::Error> {
    let row = sqlx::query(
        r#"INSERT INTO "xp_transactions" ("id","userId","amount","source","description","metadata","createdAt")
           VALUES ($1,$2,$3,$4,$5,$6,$7)
           RETURNING *"#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(amount)
    .bind(source.as_str())
    .bind(description)
    .bind(metadata)
    .bind(now.naive_utc())
    .fetch_one(&mut **tx)
    .await?;
    Ok(map_xp_transaction(&row))
}

pub async fn list_xp_transactions(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<XpTransaction>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "xp_transactions" WHERE "userId" = $1
           ORDER BY "createdAt" DESC LIMIT $2 OFFSET $3"#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_xp_transaction).collect())
}

pub async fn count_xp_transactions(pool: &PgPool, user_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT COUNT(*) FROM "xp_transactions" WHERE "userId" = $1"#)
        .bind(user_id)
        .fetch_one(pool)
        .await
}

pub async fn sum_xp_since(
    pool: &PgPool,
    user_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<i64, sqlx::Error> {
    match since {
        Some(cutoff) => {
            sqlx::query_scalar(
                r#"SELECT COALESCE(SUM("amount"), 0)::BIGINT FROM "xp_transactions"
                   WHERE "userId" = $1 AND "createdAt" >= $2"#,
            )
            .bind(user_id)
            .bind(cutoff.naive_utc())
            .fetch_one(pool)
            .await
        }
        None => {
            sqlx::query_scalar(
                r#"SELECT COALESCE(SUM("amount"), 0)::BIGINT FROM "xp_transactions" WHERE "userId" = $1"#,
            )
            .bind(user_id)
            .fetch_one(pool)
            .await
        }
    }
}

pub async fn xp_totals_by_source(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<SourceTotal>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "source", COALESCE(SUM("amount"), 0)::BIGINT AS "totalXp", COUNT(*) AS "count"
           FROM "xp_transactions" WHERE "userId" = $1
           GROUP BY "source" ORDER BY "totalXp" DESC"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let source: String = row.try_get("source").unwrap_or_default();
            SourceTotal {
                source: XpSource::parse(&source),
                total_xp: row.try_get("totalXp").unwrap_or(0),
                count: row.try_get("count").unwrap_or(0),
            }
        })
        .collect())
}

pub async fn delete_xp_transactions(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "xp_transactions" WHERE "userId" = $1"#)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected())
}

/// Bulk retention cleanup, the only delete path for ledger rows.
pub async fn delete_xp_transactions_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(r#"DELETE FROM "xp_transactions" WHERE "createdAt" < $1"#)
        .bind(cutoff.naive_utc())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{to_utc, to_utc_opt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CharacterType {
    Hiragana,
    Katakana,
    Kanji,
}

impl CharacterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hiragana => "HIRAGANA",
            Self::Katakana => "KATAKANA",
            Self::Kanji => "KANJI",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "KATAKANA" => Self::Katakana,
            "KANJI" => Self::Kanji,
            _ => Self::Hiragana,
        }
    }
}

/// Competence bands, ordered so promotion can be expressed as `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasteryLevel {
    Learning,
    Practicing,
    Mastered,
    Expert,
}

impl MasteryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learning => "LEARNING",
            Self::Practicing => "PRACTICING",
            Self::Mastered => "MASTERED",
            Self::Expert => "EXPERT",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PRACTICING" => Self::Practicing,
            "MASTERED" => Self::Mastered,
            "EXPERT" => Self::Expert,
            _ => Self::Learning,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterMastery {
    pub id: String,
    pub user_id: String,
    pub character_id: String,
    pub character_type: CharacterType,
    pub mastery_level: MasteryLevel,
    pub accuracy_score: f64,
    pub practice_count: i32,
    pub correct_count: i32,
    pub total_time_spent: i64,
    pub streak_count: i32,
    pub stroke_order_score: f64,
    pub recognition_score: f64,
    pub last_practiced: Option<DateTime<Utc>>,
    pub next_review_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub id: String,
    pub character_mastery_id: String,
    pub user_id: String,
    pub character_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: i64,
    pub accuracy: f64,
    pub strokes_correct: i32,
    pub strokes_total: i32,
    pub xp_earned: i64,
    pub is_perfect: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn map_mastery(row: &PgRow) -> CharacterMastery {
    let character_type: String = row.try_get("characterType").unwrap_or_default();
    let mastery_level: String = row.try_get("masteryLevel").unwrap_or_default();
    CharacterMastery {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        character_id: row.try_get("characterId").unwrap_or_default(),
        character_type: CharacterType::parse(&character_type),
        mastery_level: MasteryLevel::parse(&mastery_level),
        accuracy_score: row.try_get("accuracyScore").unwrap_or(0.0),
        practice_count: row.try_get("practiceCount").unwrap_or(0),
        correct_count: row.try_get("correctCount").unwrap_or(0),
        total_time_spent: row.try_get("totalTimeSpent").unwrap_or(0),
        streak_count: row.try_get("streakCount").unwrap_or(0),
        stroke_order_score: row.try_get("strokeOrderScore").unwrap_or(0.0),
        recognition_score: row.try_get("recognitionScore").unwrap_or(0.0),
        last_practiced: to_utc_opt(row.try_get("lastPracticed").ok()),
        next_review_date: to_utc_opt(row.try_get("nextReviewDate").ok()),
        created_at: to_utc(row.try_get("createdAt").unwrap_or_default()),
        updated_at: to_utc(row.try_get("updatedAt").unwrap_or_default()),
    }
}

fn map_session(row: &PgRow) -> PracticeSession {
    PracticeSession {
        id: row.try_get("id").unwrap_or_default(),
        character_mastery_id: row.try_get("characterMasteryId").unwrap_or_default(),
        user_id: row.try_get("userId").unwrap_or_default(),
        character_id: row.try_get("characterId").unwrap_or_default(),
        start_time: to_utc(row.try_get("startTime").unwrap_or_default()),
        end_time: to_utc(row.try_get("endTime").unwrap_or_default()),
        duration: row.try_get("duration").unwrap_or(0),
        accuracy: row.try_get("accuracy").unwrap_or(0.0),
        strokes_correct: row.try_get("strokesCorrect").unwrap_or(0),
        strokes_total: row.try_get("strokesTotal").unwrap_or(0),
        xp_earned: row.try_get("xpEarned").unwrap_or(0),
        is_perfect: row.try_get("isPerfect").unwrap_or(false),
        notes: row.try_get("notes").ok(),
        created_at: to_utc(row.try_get("createdAt").unwrap_or_default()),
    }
}

pub async fn get_character_mastery(
    pool: &PgPool,
    user_id: &str,
    character_id: &str,
) -> Result<Option<CharacterMastery>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT * FROM "character_masteries" WHERE "userId" = $1 AND "characterId" = $2 LIMIT 1"#,
    )
    .bind(user_id)
    .bind(character_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| map_mastery(&r)))
}

pub async fn get_character_mastery_for_update(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    character_id: &str,
) -> Result<Option<CharacterMastery>, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT * FROM "character_masteries" WHERE "userId" = $1 AND "characterId" = $2 FOR UPDATE"#,
    )
    .bind(user_id)
    .bind(character_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|r| map_mastery(&r)))
}

/// Writes the full recomputed mastery state. Create and update share one
/// statement keyed on (userId, characterId).
pub async fn upsert_character_mastery(
    tx: &mut Transaction<'_, Postgres>,
    mastery: &CharacterMastery,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "character_masteries"
           ("id","userId","characterId","characterType","masteryLevel","accuracyScore",
            "practiceCount","correctCount","totalTimeSpent","streakCount","strokeOrderScore",
            "recognitionScore","lastPracticed","nextReviewDate","createdAt","updatedAt")
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
           ON CONFLICT ("userId","characterId") DO UPDATE SET
             "masteryLevel" = EXCLUDED."masteryLevel",
             "accuracyScore" = EXCLUDED."accuracyScore",
             "practiceCount" = EXCLUDED."practiceCount",
             "correctCount" = EXCLUDED."correctCount",
             "totalTimeSpent" = EXCLUDED."totalTimeSpent",
             "streakCount" = EXCLUDED."streakCount",
             "strokeOrderScore" = EXCLUDED."strokeOrderScore",
             "recognitionScore" = EXCLUDED."recognitionScore",
             "lastPracticed" = EXCLUDED."lastPracticed",
             "nextReviewDate" = EXCLUDED."nextReviewDate",
             "updatedAt" = EXCLUDED."updatedAt""#,
    )
    .bind(&mastery.id)
    .bind(&mastery.user_id)
    .bind(&mastery.character_id)
    .bind(mastery.character_type.as_str())
    .bind(mastery.mastery_level.as_str())
    .bind(mastery.accuracy_score)
    .bind(mastery.practice_count)
    .bind(mastery.correct_count)
    .bind(mastery.total_time_spent)
    .bind(mastery.streak_count)
    .bind(mastery.stroke_order_score)
    .bind(mastery.recognition_score)
    .bind(mastery.last_practiced.map(|d| d.naive_utc()))
    .bind(mastery.next_review_date.map(|d| d.naive_utc()))
    .bind(mastery.created_at.naive_utc())
    .bind(mastery.updated_at.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn insert_practice_session(
    tx: &mut Transaction<'_, Postgres>,
    session: &PracticeSession,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO "practice_sessions"
           ("id","characterMasteryId","userId","characterId","startTime","endTime","duration",
            "accuracy","strokesCorrect","strokesTotal","xpEarned","isPerfect","notes","createdAt")
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)"#,
    )
    .bind(&session.id)
    .bind(&session.character_mastery_id)
    .bind(&session.user_id)
    .bind(&session.character_id)
    .bind(session.start_time.naive_utc())
    .bind(session.end_time.naive_utc())
    .bind(session.duration)
    .bind(session.accuracy)
    .bind(session.strokes_correct)
    .bind(session.strokes_total)
    .bind(session.xp_earned)
    .bind(session.is_perfect)
    .bind(session.notes.as_deref())
    .bind(session.created_at.naive_utc())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn list_user_masteries(
    pool: &PgPool,
    user_id: &str,
    character_type: Option<CharacterType>,
) -> Result<Vec<CharacterMastery>, sqlx::Error> {
    let rows = match character_type {
        Some(kind) => {
            sqlx::query(
                r#"SELECT * FROM "character_masteries"
                   WHERE "userId" = $1 AND "characterType" = $2
                   ORDER BY CASE "masteryLevel"
                              WHEN 'EXPERT' THEN 3 WHEN 'MASTERED' THEN 2
                              WHEN 'PRACTICING' THEN 1 ELSE 0
                            END DESC,
                            "accuracyScore" DESC, "lastPracticed" DESC"#,
            )
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"SELECT * FROM "character_masteries"
                   WHERE "userId" = $1
                   ORDER BY CASE "masteryLevel"
                              WHEN 'EXPERT' THEN 3 WHEN 'MASTERED' THEN 2
                              WHEN 'PRACTICING' THEN 1 ELSE 0
                            END DESC,
                            "accuracyScore" DESC, "lastPracticed" DESC"#,
            )
            .bind(user_id)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.iter().map(map_mastery).collect())
}

/// Most overdue and weakest first.
pub async fn list_due_for_review(
    pool: &PgPool,
    user_id: &str,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<CharacterMastery>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "character_masteries"
           WHERE "userId" = $1 AND "nextReviewDate" <= $2
           ORDER BY "nextReviewDate" ASC, "accuracyScore" ASC
           LIMIT $3"#,
    )
    .bind(user_id)
    .bind(now.naive_utc())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_mastery).collect())
}

pub async fn list_weak_areas(
    pool: &PgPool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<CharacterMastery>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "character_masteries"
           WHERE "userId" = $1 AND ("accuracyScore" < 70 OR "masteryLevel" = 'LEARNING')
           ORDER BY "accuracyScore" ASC, "practiceCount" DESC
           LIMIT $2"#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_mastery).collect())
}

pub async fn mastery_level_counts(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<(MasteryLevel, i64)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "masteryLevel", COUNT(*) AS "count" FROM "character_masteries"
           WHERE "userId" = $1 GROUP BY "masteryLevel""#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let level: String = row.try_get("masteryLevel").unwrap_or_default();
            (MasteryLevel::parse(&level), row.try_get("count").unwrap_or(0))
        })
        .collect())
}

pub async fn mastery_type_stats(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<(CharacterType, i64, f64)>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "characterType", COUNT(*) AS "count", COALESCE(AVG("accuracyScore"), 0) AS "avgAccuracy"
           FROM "character_masteries" WHERE "userId" = $1 GROUP BY "characterType""#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let kind: String = row.try_get("characterType").unwrap_or_default();
            (
                CharacterType::parse(&kind),
                row.try_get("count").unwrap_or(0),
                row.try_get("avgAccuracy").unwrap_or(0.0),
            )
        })
        .collect())
}

pub async fn recent_sessions(
    pool: &PgPool,
    user_id: &str,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<PracticeSession>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT * FROM "practice_sessions"
           WHERE "userId" = $1 AND "createdAt" >= $2
           ORDER BY "createdAt" DESC LIMIT $3"#,
    )
    .bind(user_id)
    .bind(since.naive_utc())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_session).collect())
}

pub async fn delete_practice_sessions(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    character_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"DELETE FROM "practice_sessions" WHERE "userId" = $1 AND "characterId" = $2"#,
    )
    .bind(user_id)
    .bind(character_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

pub async fn delete_character_mastery(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &str,
    character_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"DELETE FROM "character_masteries" WHERE "userId" = $1 AND "characterId" = $2"#,
    )
    .bind(user_id)
    .bind(character_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

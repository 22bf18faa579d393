use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqlitePool};

use crate::db::operations::mastery::from_millis;
use crate::mastery::types::{Attempt, Difficulty, EntityType, Score};

/// One scored binary observation, newest first when listed.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeSample {
    pub attempt_id: String,
    pub is_correct: bool,
    pub completed_at: DateTime<Utc>,
}

pub async fn insert_attempt(pool: &SqlitePool, attempt: &Attempt) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO "attempts"
            ("id", "user_id", "question_id", "course_id", "problem_number_type",
             "difficulty", "answer_time_start", "finished_or_not", "scored")
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0)
        "#,
    )
    .bind(&attempt.id)
    .bind(&attempt.user_id)
    .bind(&attempt.question_id)
    .bind(&attempt.course_id)
    .bind(attempt.problem_number_type)
    .bind(i64::from(attempt.difficulty.value()))
    .bind(attempt.answer_time_start.timestamp_millis())
    .execute(&mut *tx)
    .await?;

    let bindings = attempt
        .skills
        .iter()
        .map(|id| (EntityType::Skill, *id))
        .chain(attempt.topics.iter().map(|id| (EntityType::Topic, *id)))
        .chain(
            attempt
                .problem_number_type
                .map(|id| (EntityType::ProblemNumberType, id)),
        );

    for (entity_type, entity_id) in bindings {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO "attempt_entities" ("attempt_id", "entity_type", "entity_id")
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&attempt.id)
        .bind(entity_type.as_str())
        .bind(entity_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

fn map_attempt(row: &SqliteRow, bindings: &[(String, i64)]) -> Result<Attempt, sqlx::Error> {
    let difficulty: i64 = row.try_get("difficulty")?;
    let difficulty = u8::try_from(difficulty)
        .ok()
        .and_then(|d| Difficulty::new(d).ok())
        .unwrap_or_default();
    let score: Option<i64> = row.try_get("scores_fipi")?;
    let score = score
        .and_then(|s| u8::try_from(s).ok())
        .and_then(|s| Score::new(s).ok());
    let is_correct: Option<i64> = row.try_get("is_correct")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;
    let finished: i64 = row.try_get("finished_or_not")?;
    let scored: i64 = row.try_get("scored")?;

    let ids_of = |kind: EntityType| -> Vec<i64> {
        bindings
            .iter()
            .filter(|(t, _)| t == kind.as_str())
            .map(|(_, id)| *id)
            .collect()
    };

    Ok(Attempt {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        question_id: row.try_get("question_id")?,
        course_id: row.try_get("course_id")?,
        skills: ids_of(EntityType::Skill),
        topics: ids_of(EntityType::Topic),
        problem_number_type: row.try_get("problem_number_type")?,
        difficulty,
        answer_time_start: from_millis(row.try_get("answer_time_start")?),
        finished_or_not: finished != 0,
        is_correct: is_correct.map(|v| v != 0),
        scores_fipi: score,
        duration_answer: row.try_get("duration_answer")?,
        completed_at: completed_at.map(from_millis),
        scored: scored != 0,
    })
}

pub async fn get_attempt(pool: &SqlitePool, attempt_id: &str) -> Result<Option<Attempt>, sqlx::Error> {
    let Some(row) = sqlx::query(r#"SELECT * FROM "attempts" WHERE "id" = ? LIMIT 1"#)
        .bind(attempt_id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let bindings: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT "entity_type", "entity_id" FROM "attempt_entities"
        WHERE "attempt_id" = ?
        ORDER BY "entity_type", "entity_id"
        "#,
    )
    .bind(attempt_id)
    .fetch_all(pool)
    .await?;

    map_attempt(&row, &bindings).map(Some)
}

#[derive(Debug, Clone, Copy)]
pub struct AttemptClosure {
    pub finished: bool,
    pub is_correct: Option<bool>,
    pub score: Option<Score>,
    pub duration_secs: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

/// Records the final outcome once. Returns `false` when the attempt was
/// already closed by an earlier call.
pub async fn close_attempt(
    pool: &SqlitePool,
    attempt_id: &str,
    closure: &AttemptClosure,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE "attempts"
        SET "finished_or_not" = ?, "is_correct" = ?, "scores_fipi" = ?,
            "duration_answer" = ?, "completed_at" = ?
        WHERE "id" = ? AND "completed_at" IS NULL
        "#,
    )
    .bind(i64::from(closure.finished))
    .bind(closure.is_correct.map(i64::from))
    .bind(closure.score.map(|s| i64::from(s.value())))
    .bind(closure.duration_secs)
    .bind(closure.completed_at.timestamp_millis())
    .bind(attempt_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_attempt_scored(pool: &SqlitePool, attempt_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(r#"UPDATE "attempts" SET "scored" = 1 WHERE "id" = ?"#)
        .bind(attempt_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn is_update_applied<'e, E>(
    executor: E,
    attempt_id: &str,
    entity_type: EntityType,
    entity_id: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM "attempt_applications"
        WHERE "attempt_id" = ? AND "entity_type" = ? AND "entity_id" = ?
        "#,
    )
    .bind(attempt_id)
    .bind(entity_type.as_str())
    .bind(entity_id)
    .fetch_optional(executor)
    .await?;

    Ok(found.is_some())
}

pub async fn record_update_applied<'e, E>(
    executor: E,
    attempt_id: &str,
    entity_type: EntityType,
    entity_id: i64,
    applied_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO "attempt_applications"
            ("attempt_id", "entity_type", "entity_id", "applied_at")
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(attempt_id)
    .bind(entity_type.as_str())
    .bind(entity_id)
    .bind(applied_at.timestamp_millis())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Scored outcomes that reached any of `entity_ids`, each attempt once,
/// completed at or after `since`, newest first.
pub async fn recent_outcomes(
    pool: &SqlitePool,
    user_id: &str,
    course_id: &str,
    entity_type: EntityType,
    entity_ids: &[i64],
    since: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<OutcomeSample>, sqlx::Error> {
    if entity_ids.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT a."id", a."is_correct", a."completed_at" FROM "attempts" a
        WHERE a."user_id" = "#,
    );
    qb.push_bind(user_id);
    qb.push(r#" AND a."course_id" = "#);
    qb.push_bind(course_id);
    qb.push(
        r#" AND a."finished_or_not" = 1 AND a."is_correct" IS NOT NULL
        AND a."completed_at" >= "#,
    );
    qb.push_bind(since.timestamp_millis());
    qb.push(
        r#" AND EXISTS (
            SELECT 1 FROM "attempt_applications" p
            WHERE p."attempt_id" = a."id" AND p."entity_type" = "#,
    );
    qb.push_bind(entity_type.as_str());
    qb.push(r#" AND p."entity_id" IN ("#);
    let mut separated = qb.separated(", ");
    for id in entity_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")) ");
    qb.push(r#"ORDER BY a."completed_at" DESC, a."id" DESC LIMIT "#);
    qb.push_bind(limit as i64);

    let rows = qb.build().fetch_all(pool).await?;

    rows.iter()
        .map(|row| {
            let is_correct: i64 = row.try_get("is_correct")?;
            Ok(OutcomeSample {
                attempt_id: row.try_get("id")?,
                is_correct: is_correct != 0,
                completed_at: from_millis(row.try_get("completed_at")?),
            })
        })
        .collect()
}

/// Ids among `entity_ids` that some attempt of this learner actually updated.
pub async fn entities_with_evidence(
    pool: &SqlitePool,
    user_id: &str,
    course_id: &str,
    entity_type: EntityType,
    entity_ids: &[i64],
) -> Result<Vec<i64>, sqlx::Error> {
    if entity_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT DISTINCT p."entity_id" FROM "attempt_applications" p
        JOIN "attempts" a ON a."id" = p."attempt_id"
        WHERE a."user_id" = "#,
    );
    qb.push_bind(user_id);
    qb.push(r#" AND a."course_id" = "#);
    qb.push_bind(course_id);
    qb.push(r#" AND p."entity_type" = "#);
    qb.push_bind(entity_type.as_str());
    qb.push(r#" AND p."entity_id" IN ("#);
    let mut separated = qb.separated(", ");
    for id in entity_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ");
    qb.push(r#"ORDER BY p."entity_id""#);

    qb.build_query_scalar::<i64>().fetch_all(pool).await
}

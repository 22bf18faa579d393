use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use crate::mastery::types::{
    EntityKey, EntityType, MasteryRecord, MasteryStatus, DEFAULT_ALPHA, DEFAULT_BETA,
};

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn map_mastery_record(row: &SqliteRow) -> Result<MasteryRecord, sqlx::Error> {
    let entity_type: String = row.try_get("entity_type")?;
    let entity_type = EntityType::parse(&entity_type).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "entity_type".to_string(),
        source: format!("unknown entity type {entity_type}").into(),
    })?;
    let status: String = row.try_get("status")?;
    let last_attempt_at: Option<i64> = row.try_get("last_attempt_at")?;

    Ok(MasteryRecord {
        key: EntityKey {
            user_id: row.try_get("user_id")?,
            entity_type,
            entity_id: row.try_get("entity_id")?,
            course_id: row.try_get("course_id")?,
        },
        alpha: row.try_get("alpha")?,
        beta: row.try_get("beta")?,
        cusum_s: row.try_get("cusum_s")?,
        status: MasteryStatus::from_str(&status),
        updated_at: from_millis(row.try_get("updated_at")?),
        last_attempt_at: last_attempt_at.map(from_millis),
        version: row.try_get("version")?,
    })
}

pub async fn get_mastery_record<'e, E>(
    executor: E,
    key: &EntityKey,
) -> Result<Option<MasteryRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT * FROM "mastery_records"
        WHERE "user_id" = ? AND "entity_type" = ? AND "entity_id" = ? AND "course_id" = ?
        LIMIT 1
        "#,
    )
    .bind(&key.user_id)
    .bind(key.entity_type.as_str())
    .bind(key.entity_id)
    .bind(&key.course_id)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(map_mastery_record).transpose()
}

pub async fn list_mastery_records<'e, E>(
    executor: E,
    user_id: &str,
    course_id: &str,
) -> Result<Vec<MasteryRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT * FROM "mastery_records"
        WHERE "user_id" = ? AND "course_id" = ?
        ORDER BY "entity_type", "entity_id"
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(executor)
    .await?;

    rows.iter().map(map_mastery_record).collect()
}

/// Returns `false` when a row for the key already exists.
pub async fn insert_mastery_record<'e, E>(
    executor: E,
    record: &MasteryRecord,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO "mastery_records"
            ("user_id", "entity_type", "entity_id", "course_id", "alpha", "beta",
             "cusum_s", "status", "updated_at", "last_attempt_at", "version")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
        ON CONFLICT ("user_id", "entity_type", "entity_id", "course_id") DO NOTHING
        "#,
    )
    .bind(&record.key.user_id)
    .bind(record.key.entity_type.as_str())
    .bind(record.key.entity_id)
    .bind(&record.key.course_id)
    .bind(record.alpha)
    .bind(record.beta)
    .bind(record.cusum_s)
    .bind(record.status.as_str())
    .bind(record.updated_at.timestamp_millis())
    .bind(record.last_attempt_at.map(|t| t.timestamp_millis()))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Compare-and-swap write of belief parameters.
///
/// `expected_version` is the version the record was read at; `0` means the
/// record was absent and is inserted instead. Returns `false` when another
/// writer got there first.
pub async fn write_mastery_record<'e, E>(
    executor: E,
    record: &MasteryRecord,
    expected_version: i64,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    if expected_version == 0 {
        return insert_mastery_record(executor, record).await;
    }

    let result = sqlx::query(
        r#"
        UPDATE "mastery_records"
        SET "alpha" = ?, "beta" = ?, "cusum_s" = ?, "status" = ?,
            "updated_at" = ?, "last_attempt_at" = ?, "version" = "version" + 1
        WHERE "user_id" = ? AND "entity_type" = ? AND "entity_id" = ? AND "course_id" = ?
          AND "version" = ?
        "#,
    )
    .bind(record.alpha)
    .bind(record.beta)
    .bind(record.cusum_s)
    .bind(record.status.as_str())
    .bind(record.updated_at.timestamp_millis())
    .bind(record.last_attempt_at.map(|t| t.timestamp_millis()))
    .bind(&record.key.user_id)
    .bind(record.key.entity_type.as_str())
    .bind(record.key.entity_id)
    .bind(&record.key.course_id)
    .bind(expected_version)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Status is a derived, eventually-consistent column; it never touches the
/// belief parameters or the version used by writers.
pub async fn upsert_status<'e, E>(
    executor: E,
    key: &EntityKey,
    status: MasteryStatus,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO "mastery_records"
            ("user_id", "entity_type", "entity_id", "course_id", "alpha", "beta",
             "cusum_s", "status", "updated_at", "last_attempt_at", "version")
        VALUES (?, ?, ?, ?, ?, ?, 0.0, ?, ?, NULL, 1)
        ON CONFLICT ("user_id", "entity_type", "entity_id", "course_id")
        DO UPDATE SET "status" = excluded."status"
        "#,
    )
    .bind(&key.user_id)
    .bind(key.entity_type.as_str())
    .bind(key.entity_id)
    .bind(&key.course_id)
    .bind(DEFAULT_ALPHA)
    .bind(DEFAULT_BETA)
    .bind(status.as_str())
    .bind(now.timestamp_millis())
    .execute(executor)
    .await?;

    Ok(())
}

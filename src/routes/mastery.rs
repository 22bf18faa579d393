use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::mastery::{EntityKey, EntityType, MasteryRecord, MasteryStatus};
use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mastery/:user_id/:entity_type/:entity_id", get(get_mastery))
        .route("/status/:user_id/:entity_type/:entity_id", get(get_status))
        .route("/beliefs/:user_id", get(list_beliefs))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseQuery {
    course_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusDto {
    entity_type: EntityType,
    entity_id: i64,
    status: MasteryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    mastery: Option<f64>,
    samples: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BeliefDto {
    entity_type: EntityType,
    entity_id: i64,
    alpha: f64,
    beta: f64,
    mastery: f64,
    cusum_s: f64,
    status: MasteryStatus,
    updated_at: i64,
}

impl From<MasteryRecord> for BeliefDto {
    fn from(record: MasteryRecord) -> Self {
        Self {
            mastery: record.mastery(),
            entity_type: record.key.entity_type,
            entity_id: record.key.entity_id,
            alpha: record.alpha,
            beta: record.beta,
            cusum_s: record.cusum_s,
            status: record.status,
            updated_at: record.updated_at.timestamp_millis(),
        }
    }
}

fn entity_key(user_id: String, entity_type: &str, entity_id: i64, course_id: String) -> Result<EntityKey, AppError> {
    let entity_type = EntityType::parse(entity_type).ok_or_else(|| {
        AppError::validation(format!(
            "entityType must be skill, problem_number_type or topic, got {entity_type}"
        ))
    })?;
    Ok(EntityKey::new(user_id, entity_type, entity_id, course_id))
}

async fn get_mastery(
    State(state): State<AppState>,
    Path((user_id, entity_type, entity_id)): Path<(String, String, i64)>,
    Query(query): Query<CourseQuery>,
) -> Result<Response, AppError> {
    let key = entity_key(user_id, &entity_type, entity_id, query.course_id)?;
    let estimate = state.engine().get_estimate_at(&key, Utc::now()).await?;
    Ok(ok(estimate).into_response())
}

async fn get_status(
    State(state): State<AppState>,
    Path((user_id, entity_type, entity_id)): Path<(String, String, i64)>,
    Query(query): Query<CourseQuery>,
) -> Result<Response, AppError> {
    let key = entity_key(user_id, &entity_type, entity_id, query.course_id)?;
    let now = Utc::now();

    let dto = if key.entity_type == EntityType::Topic {
        let verdict = state.engine().topic_status_at(&key, now).await?;
        StatusDto {
            entity_type: EntityType::Topic,
            entity_id: verdict.topic_id,
            status: verdict.status,
            mastery: verdict.mastery,
            samples: verdict.samples,
        }
    } else {
        let verdict = state.engine().classify_entity_at(&key, now).await?;
        StatusDto {
            entity_type: verdict.key.entity_type,
            entity_id: verdict.key.entity_id,
            status: verdict.status,
            mastery: Some(verdict.mastery),
            samples: verdict.samples,
        }
    };

    Ok(ok(dto).into_response())
}

async fn list_beliefs(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<CourseQuery>,
) -> Result<Response, AppError> {
    let records = state
        .engine()
        .list_beliefs(&user_id, &query.course_id)
        .await?;
    let beliefs: Vec<BeliefDto> = records.into_iter().map(BeliefDto::from).collect();
    Ok(ok(beliefs).into_response())
}

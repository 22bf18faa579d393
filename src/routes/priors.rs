use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::response::{ok, AppError};
use crate::state::AppState;

const MAX_REMEDIATION_TOPICS: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/priors/initialize", post(initialize_priors))
        .route("/remediation", post(remediate))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializePriorsRequest {
    user_id: String,
    course_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializePriorsResponse {
    seeded: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemediationRequest {
    user_id: String,
    course_id: String,
    topics: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemediationResponse {
    reset_skills: Vec<i64>,
}

async fn initialize_priors(
    State(state): State<AppState>,
    Json(payload): Json<InitializePriorsRequest>,
) -> Result<Response, AppError> {
    let seeded = state
        .engine()
        .initialize_priors(&payload.user_id, &payload.course_id)
        .await?;
    Ok(ok(InitializePriorsResponse { seeded }).into_response())
}

async fn remediate(
    State(state): State<AppState>,
    Json(payload): Json<RemediationRequest>,
) -> Result<Response, AppError> {
    if payload.topics.len() > MAX_REMEDIATION_TOPICS {
        return Err(AppError::validation(format!(
            "at most {MAX_REMEDIATION_TOPICS} topics per request"
        )));
    }
    let reset_skills = state
        .engine()
        .remediate_topics(&payload.user_id, &payload.course_id, &payload.topics)
        .await?;
    Ok(ok(RemediationResponse { reset_skills }).into_response())
}

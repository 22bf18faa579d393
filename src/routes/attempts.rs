use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::mastery::CompletionInput;
use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start_attempt))
        .route("/:attempt_id/complete", post(complete_attempt))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAttemptRequest {
    user_id: String,
    question_id: String,
    course_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartAttemptResponse {
    attempt_id: String,
    skills: Vec<i64>,
    topics: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem_number_type: Option<i64>,
}

async fn start_attempt(
    State(state): State<AppState>,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<Response, AppError> {
    let attempt = state
        .engine()
        .record_attempt_start_at(
            &payload.user_id,
            &payload.question_id,
            &payload.course_id,
            chrono::Utc::now(),
        )
        .await?;

    Ok(ok(StartAttemptResponse {
        attempt_id: attempt.id,
        skills: attempt.skills,
        topics: attempt.topics,
        problem_number_type: attempt.problem_number_type,
    })
    .into_response())
}

async fn complete_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<CompletionInput>,
) -> Result<Response, AppError> {
    let report = state
        .engine()
        .record_attempt_complete(&attempt_id, payload)
        .await?;
    Ok(ok(report).into_response())
}

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/topics/:topic_id/mastery", get(topic_mastery))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicQuery {
    user_id: String,
    course_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TopicMasteryDto {
    topic_id: i64,
    /// `None` while no skill of the topic has evidence.
    mastery: Option<f64>,
}

async fn topic_mastery(
    State(state): State<AppState>,
    Path(topic_id): Path<i64>,
    Query(query): Query<TopicQuery>,
) -> Result<Response, AppError> {
    let mastery = state
        .engine()
        .topic_mastery(&query.user_id, &query.course_id, topic_id)
        .await?;
    Ok(ok(TopicMasteryDto { topic_id, mastery }).into_response())
}

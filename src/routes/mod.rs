mod attempts;
mod health;
mod mastery;
mod priors;
mod topics;

use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::response::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/api/attempts", attempts::router())
        .nest(
            "/api",
            mastery::router()
                .merge(topics::router())
                .merge(priors::router()),
        )
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    AppError::not_found("route not found").into_response()
}

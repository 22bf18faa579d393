pub mod catalog;
pub mod config;
pub mod db;
pub mod logging;
pub mod mastery;
pub mod response;
pub mod routes;
pub mod state;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::catalog::Catalog;
use crate::db::DatabaseProxy;
use crate::mastery::{MasteryConfig, MasteryEngine};
use crate::state::AppState;

/// Builds the full router over an already connected store and loaded catalog.
pub fn create_app(db: Arc<DatabaseProxy>, catalog: Arc<Catalog>, config: MasteryConfig) -> axum::Router {
    let engine = Arc::new(MasteryEngine::new(config, db, catalog));
    let state = AppState::new(engine);

    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

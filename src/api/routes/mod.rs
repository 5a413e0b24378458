pub mod clusters;
pub mod fields;
pub mod health;
pub mod imports;

use crate::api::AppState;
use axum::routing::{get, post};
use axum::Router;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/clusters", get(clusters::get_clusters))
        .route("/clusters/recalculate", post(clusters::recalculate))
        .route("/fields", get(fields::list_fields))
        .route("/imports", post(imports::start_import))
        .route("/imports/:id", get(imports::get_import))
        .with_state(state)
}

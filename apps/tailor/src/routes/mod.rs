pub mod health;
pub mod resumes;

use axum::{routing::get, Router};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/resumes/:job_id", get(resumes::handle_get_status))
        .route(
            "/api/v1/resumes/:job_id/:kind",
            get(resumes::handle_get_artifact),
        )
        .with_state(state)
}

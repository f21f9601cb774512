use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run", post(handlers::run_question))
        .route("/grade", post(handlers::grade))
        .route("/health", get(handlers::health_check))
        .route("/health/sandbox", get(handlers::sandbox_health))
        .route("/metrics", get(handlers::export_metrics))
}

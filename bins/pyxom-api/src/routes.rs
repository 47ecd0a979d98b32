// Route definitions for the Pyxom API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/pool", get(handlers::pool_status))
        .route("/metrics", get(handlers::metrics_text))
        .route("/validate", post(handlers::validate))
        .route("/grade", post(handlers::grade))
        .route("/exercises", get(handlers::list_exercises))
        .route("/exercises/:id/grade", post(handlers::grade_exercise))
}

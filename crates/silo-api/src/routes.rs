//! API route definitions.

use axum::{
    Router,
    routing::get,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, objects};
use crate::middleware;
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cas/{key}", get(objects::get_cas).put(objects::put_cas))
        .route("/ac/{key}", get(objects::get_ac).put(objects::put_ac))
        .route("/health", get(health::health))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

//! Router assembly

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::api::ws_dashboard::ws_dashboard;
use crate::lifecycle::Services;

/// Build the full API router over the shared services.
pub fn create_router(services: Arc<Services>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/nodes", get(handlers::list_nodes))
        .route("/api/projects", get(handlers::list_projects))
        .route("/api/projects/:slug/pipelines", get(handlers::list_pipelines))
        .route(
            "/api/projects/:slug/pipelines/:name",
            get(handlers::load_pipeline).put(handlers::save_pipeline),
        )
        .route("/api/pipelines/run", post(handlers::run_pipeline))
        .route("/api/pipelines/run-stream", post(handlers::run_pipeline_stream))
        .route("/api/pipelines/running", get(handlers::list_running))
        .route(
            "/api/pipelines/:slug/:name/publish",
            post(handlers::publish_pipeline),
        )
        .route(
            "/api/pipelines/:slug/:name/unpublish",
            post(handlers::unpublish_pipeline),
        )
        .route(
            "/api/pipelines/:slug/:name/history",
            get(handlers::run_history),
        )
        .route("/ws/dashboard/*key", get(ws_dashboard))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(services)
}

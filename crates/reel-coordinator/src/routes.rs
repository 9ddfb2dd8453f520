//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::assets::register_asset;
use crate::handlers::internal::{
    attach_media_thumbnail, create_media_file, create_processing_job, delete_media_file, find_reusable_media,
    get_clip, get_compilation_context, get_media_batch, get_user_quota, get_user_tier_limits,
    record_render_usage, update_clip_status, update_processing_job, update_project_status,
};
use crate::handlers::jobs::get_job;
use crate::handlers::projects::{
    add_clip, cancel_project, compile_project, create_project, get_project, retry_clip, update_project,
};
use crate::handlers::quota::get_quota;
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, rate_limit_middleware, request_id, request_logging, security_headers, RateLimiterCache};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let project_routes = Router::new()
        .route("/projects", post(create_project))
        .route("/projects/:project_id", get(get_project).patch(update_project))
        .route("/projects/:project_id/clips", post(add_clip))
        .route("/projects/:project_id/clips/:clip_id/retry", post(retry_clip))
        .route("/projects/:project_id/compile", post(compile_project))
        .route("/projects/:project_id/cancel", post(cancel_project));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(project_routes)
        .route("/media/assets", post(register_asset))
        .route("/jobs/:job_id", get(get_job))
        .route("/quota", get(get_quota))
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    // Worker-facing routes
    let internal_routes = Router::new()
        .route("/media", post(create_media_file))
        .route("/media/batch", post(get_media_batch))
        .route("/media/reusable", post(find_reusable_media))
        .route("/jobs", post(create_processing_job))
        .route("/users/:user_id/projects/:project_id/context", get(get_compilation_context))
        .route("/users/:user_id/projects/:project_id/status", patch(update_project_status))
        .route("/users/:user_id/clips/:clip_id", get(get_clip))
        .route("/users/:user_id/clips/:clip_id/status", patch(update_clip_status))
        .route("/users/:user_id/media/:media_id", delete(delete_media_file))
        .route("/users/:user_id/media/:media_id/thumbnail", put(attach_media_thumbnail))
        .route("/users/:user_id/jobs/:job_id", patch(update_processing_job))
        .route("/users/:user_id/quota", get(get_user_quota))
        .route("/users/:user_id/tier-limits", get(get_user_tier_limits))
        .route("/users/:user_id/render-usage", post(record_render_usage));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .nest("/internal", internal_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, state.config.request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

//! Prometheus metrics for the Coordinator.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "reel_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "reel_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "reel_http_requests_in_flight";

    // Job metrics
    pub const JOBS_DISPATCHED_TOTAL: &str = "reel_jobs_dispatched_total";
    pub const JOBS_DISPATCH_FAILED_TOTAL: &str = "reel_jobs_dispatch_failed_total";
    pub const JOBS_FINISHED_TOTAL: &str = "reel_jobs_finished_total";

    // Quota metrics
    pub const QUOTA_REJECTIONS_TOTAL: &str = "reel_quota_rejections_total";
    pub const LEDGER_CONFLICTS_TOTAL: &str = "reel_ledger_conflicts_total";
    pub const RENDER_ESTIMATE_DRIFT_TOTAL: &str = "reel_render_estimate_drift_total";
    pub const RENDER_SECONDS_TOTAL: &str = "reel_render_seconds_total";

    // Media metrics
    pub const MEDIA_REUSED_TOTAL: &str = "reel_media_reused_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "reel_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_dispatched(kind: &str, queue: &str) {
    let labels = [("kind", kind.to_string()), ("queue", queue.to_string())];
    counter!(names::JOBS_DISPATCHED_TOTAL, &labels).increment(1);
}

pub fn record_dispatch_failed(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::JOBS_DISPATCH_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_finished(kind: &str, state: &str) {
    let labels = [("kind", kind.to_string()), ("state", state.to_string())];
    counter!(names::JOBS_FINISHED_TOTAL, &labels).increment(1);
}

pub fn record_quota_rejection(tier: &str) {
    let labels = [("tier", tier.to_string())];
    counter!(names::QUOTA_REJECTIONS_TOTAL, &labels).increment(1);
}

pub fn record_ledger_conflict() {
    counter!(names::LEDGER_CONFLICTS_TOTAL).increment(1);
}

pub fn record_estimate_drift() {
    counter!(names::RENDER_ESTIMATE_DRIFT_TOTAL).increment(1);
}

pub fn record_render_seconds(seconds: u64) {
    counter!(names::RENDER_SECONDS_TOTAL).increment(seconds);
}

pub fn record_media_reused() {
    counter!(names::MEDIA_REUSED_TOTAL).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").expect("valid regex")
});

static USER_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/users/[^/]+").expect("valid regex"));

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    let path = UUID_SEGMENT.replace_all(path, ":id");
    USER_SEGMENT.replace_all(&path, "/users/:uid").to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

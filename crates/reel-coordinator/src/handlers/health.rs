//! Liveness and readiness probes.

use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Always 200 while the process serves requests.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub store: DependencyCheck,
    pub queue: DependencyCheck,
}

/// Outcome of pinging one backing service.
#[derive(Serialize)]
pub struct DependencyCheck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl DependencyCheck {
    async fn run<E: std::fmt::Display>(ping: impl Future<Output = Result<(), E>>) -> Self {
        let start = Instant::now();
        match ping.await {
            Ok(()) => Self {
                status: "ok",
                error: None,
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(e) => Self {
                status: "error",
                error: Some(e.to_string()),
                latency_ms: None,
            },
        }
    }

    fn passed(&self) -> bool {
        self.status == "ok"
    }
}

/// 200 when both the record store and the job broker answer, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let (store, queue) = tokio::join!(
        DependencyCheck::run(state.store.ping()),
        DependencyCheck::run(state.dispatcher.ping()),
    );

    let ready = store.passed() && queue.passed();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "degraded" },
            checks: ReadinessChecks { store, queue },
        }),
    )
}

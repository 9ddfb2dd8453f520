//! Prometheus metrics for the worker.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub mod names {
    pub const JOBS_TOTAL: &str = "reel_worker_jobs_total";
    pub const JOB_DURATION_SECONDS: &str = "reel_worker_job_duration_seconds";
    pub const JOBS_IN_FLIGHT: &str = "reel_worker_jobs_in_flight";
    pub const REPORT_FAILURES_TOTAL: &str = "reel_worker_report_failures_total";
}

/// Install the recorder and serve `/metrics` on `port`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()
}

pub fn job_started(kind: &'static str) {
    gauge!(names::JOBS_IN_FLIGHT, "kind" => kind).increment(1.0);
}

/// `outcome` is one of `succeeded`, `failed`, `skipped`.
pub fn job_finished(kind: &'static str, outcome: &'static str, duration_secs: f64) {
    gauge!(names::JOBS_IN_FLIGHT, "kind" => kind).decrement(1.0);
    counter!(names::JOBS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "kind" => kind).record(duration_secs);
}

pub fn report_failed(kind: &'static str) {
    counter!(names::REPORT_FAILURES_TOTAL, "kind" => kind).increment(1);
}

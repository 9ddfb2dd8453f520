//! Terminal job notifications.
//!
//! Delivery failures are logged and swallowed; they never change the outcome
//! of the job being reported.

use std::time::Duration;

use async_trait::async_trait;
use reel_models::ProcessingJob;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once when a job reaches `succeeded` or `failed`.
    async fn job_finished(&self, job: &ProcessingJob);
}

/// Logs every finished job.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn job_finished(&self, job: &ProcessingJob) {
        info!(
            job_id = %job.id,
            user_id = %job.user_id,
            kind = %job.kind,
            state = %job.state,
            error = job.error.as_deref().unwrap_or(""),
            "Job finished"
        );
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    job: &'a ProcessingJob,
}

/// POSTs finished jobs as JSON to a fixed URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self { http, url: url.into() })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn job_finished(&self, job: &ProcessingJob) {
        LogNotifier.job_finished(job).await;

        let payload = WebhookPayload {
            event: "job.finished",
            job,
        };
        match self.http.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!(
                job_id = %job.id,
                status = %response.status(),
                "Notification webhook rejected job event"
            ),
            Err(e) => warn!(job_id = %job.id, "Notification webhook failed: {}", e),
        }
    }
}

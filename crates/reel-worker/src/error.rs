//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The project left `processing` before the job was claimed.
    #[error("project cancelled")]
    Cancelled,

    /// The Coordinator already holds a terminal state for this job, e.g. a
    /// redelivery after the report went out but before the ack.
    #[error("job already finished")]
    AlreadyFinished,

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error("Coordinator error: {0}")]
    Client(#[from] reel_client::ClientError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("Timeline error: {0}")]
    Timeline(#[from] reel_models::TimelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled)
    }

    pub fn is_already_finished(&self) -> bool {
        matches!(self, WorkerError::AlreadyFinished)
    }

    /// The Coordinator could not be reached or answered 5xx/429.
    pub fn is_coordinator_unavailable(&self) -> bool {
        matches!(self, WorkerError::Client(e) if e.is_retryable())
    }

    /// Message stored on the failed clip, project and job.
    pub fn report_message(&self) -> String {
        match self {
            WorkerError::Client(e) => e.detail(),
            WorkerError::Media(e) if e.is_quota() => format!("storage quota exceeded: {}", e),
            WorkerError::Media(e) => e.detail(),
            other => other.to_string(),
        }
    }
}

//! Job descriptors carried on the queue.
//!
//! A descriptor only names the work. Workers fetch everything else from the
//! Coordinator when they claim it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use reel_models::{ClipId, JobId, JobKind, ProcessingJob, ProjectId, QueueName};

/// Fetch one clip into the media root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub job_id: JobId,
    pub user_id: String,
    pub clip_id: ClipId,
    pub created_at: DateTime<Utc>,
}

impl DownloadJob {
    pub fn new(job_id: JobId, user_id: impl Into<String>, clip_id: ClipId) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            clip_id,
            created_at: Utc::now(),
        }
    }
}

/// Render one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileJob {
    pub job_id: JobId,
    pub user_id: String,
    pub project_id: ProjectId,
    pub created_at: DateTime<Utc>,
}

impl CompileJob {
    pub fn new(job_id: JobId, user_id: impl Into<String>, project_id: ProjectId) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            project_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueJob {
    Download(DownloadJob),
    Compile(CompileJob),
}

impl QueueJob {
    /// Descriptor for a persisted job record.
    pub fn for_record(job: &ProcessingJob) -> Self {
        match job.kind {
            JobKind::Download => QueueJob::Download(DownloadJob::new(
                job.id.clone(),
                job.user_id.clone(),
                ClipId::from_string(job.target_id.clone()),
            )),
            JobKind::Compile => QueueJob::Compile(CompileJob::new(
                job.id.clone(),
                job.user_id.clone(),
                ProjectId::from_string(job.target_id.clone()),
            )),
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::Download(j) => &j.job_id,
            QueueJob::Compile(j) => &j.job_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            QueueJob::Download(j) => &j.user_id,
            QueueJob::Compile(j) => &j.user_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            QueueJob::Download(_) => JobKind::Download,
            QueueJob::Compile(_) => JobKind::Compile,
        }
    }

    /// Key used to reject a second enqueue of the same job.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}:{}", self.kind(), self.user_id(), self.job_id())
    }
}

/// A message handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: String,
    pub queue: QueueName,
    pub job: QueueJob,
    /// 1 on first delivery, incremented by each re-claim.
    pub delivery_count: u64,
}

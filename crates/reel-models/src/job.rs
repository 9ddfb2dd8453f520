//! Processing jobs tracked by the Coordinator.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Fetch one clip into the media root.
    Download,
    /// Render a project into one output file.
    Compile,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Download => "download",
            JobKind::Compile => "compile",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in a queue
    #[default]
    Queued,
    /// Claimed by a worker
    Started,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether a report may move a job from `self` to `next`.
    ///
    /// Non-terminal states accept a repeat of themselves so progress can be
    /// reported without a state change.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Queued, JobState::Queued | JobState::Started | JobState::Failed) => true,
            (
                JobState::Started,
                JobState::Started | JobState::Succeeded | JobState::Failed,
            ) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named work queue. Declaration order is priority order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Gpu,
    Cpu,
    #[default]
    Default,
}

impl QueueName {
    /// All queues, highest priority first.
    pub const ALL: [QueueName; 3] = [QueueName::Gpu, QueueName::Cpu, QueueName::Default];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Gpu => "gpu",
            QueueName::Cpu => "cpu",
            QueueName::Default => "default",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Some(QueueName::Gpu),
            "cpu" => Some(QueueName::Cpu),
            "default" => Some(QueueName::Default),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of background work and its reported outcome.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingJob {
    pub id: JobId,
    pub user_id: String,
    pub kind: JobKind,
    /// Clip id for downloads, project id for compiles.
    pub target_id: String,
    pub queue: QueueName,
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Render seconds reserved at compile pre-flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_render_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(user_id: impl Into<String>, kind: JobKind, target_id: impl Into<String>, queue: QueueName) -> Self {
        Self::with_id(JobId::new(), user_id, kind, target_id, queue)
    }

    pub fn with_id(
        id: JobId,
        user_id: impl Into<String>,
        kind: JobKind,
        target_id: impl Into<String>,
        queue: QueueName,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            kind,
            target_id: target_id.into(),
            queue,
            state: JobState::Queued,
            progress: 0,
            result: None,
            error: None,
            reserved_render_secs: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

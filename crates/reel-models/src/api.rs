//! Wire messages of the worker-facing Coordinator API.
//!
//! Shared by the Coordinator handlers and the worker's client so both sides
//! agree on field names.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::clip::{Clip, ClipStatus};
use crate::ids::{JobId, MediaId, ProjectId};
use crate::job::{JobKind, JobState, QueueName};
use crate::media::{MediaFile, MediaKind};
use crate::plan::TierLimits;
use crate::project::{Project, ProjectStatus};

/// Everything a compile needs, fetched in one call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompilationContext {
    pub project: Project,
    /// Clips in project order.
    pub clips: Vec<Clip>,
    /// Media of the project's ready clips.
    pub clip_media: Vec<MediaFile>,
    pub tier_limits: TierLimits,
}

impl CompilationContext {
    pub fn clip_media(&self, id: &MediaId) -> Option<&MediaFile> {
        self.clip_media.iter().find(|m| &m.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MediaBatchRequest {
    pub user_id: String,
    pub media_ids: Vec<MediaId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct MediaBatchResponse {
    pub media: Vec<MediaFile>,
    /// Requested ids that do not exist or belong to someone else.
    #[serde(default)]
    pub missing: Vec<MediaId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FindReusableMediaRequest {
    pub user_id: String,
    pub source_url: String,
    /// Client-side normalization. The server normalizes again and wins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReusableMediaResponse {
    pub media: Option<MediaFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateMediaFileRequest {
    pub user_id: String,
    pub kind: MediaKind,
    pub file_path: String,
    pub duration_secs: f64,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    /// Set for downloaded clips; drives reuse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateMediaFileResponse {
    pub media: MediaFile,
    /// True when an existing record with the same source key was returned.
    pub reused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateClipStatusRequest {
    pub status: ClipStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<MediaId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateProcessingJobRequest {
    pub user_id: String,
    pub kind: JobKind,
    pub target_id: String,
    #[serde(default)]
    pub queue: QueueName,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateProcessingJobRequest {
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateProcessingJobRequest {
    pub fn started() -> Self {
        Self {
            state: JobState::Started,
            progress: Some(0),
            result: None,
            error: None,
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            state: JobState::Started,
            progress: Some(progress.min(100)),
            result: None,
            error: None,
        }
    }

    pub fn succeeded(result: serde_json::Value) -> Self {
        Self {
            state: JobState::Succeeded,
            progress: Some(100),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            progress: None,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateProjectStatusRequest {
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_media_id: Option<MediaId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AttachThumbnailRequest {
    pub thumbnail_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecordRenderUsageRequest {
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub seconds: u64,
}

/// Body detail of a 402 returned by compile pre-flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QuotaExceededDetail {
    pub remaining: u64,
    pub limit: u64,
    pub estimated: u64,
}

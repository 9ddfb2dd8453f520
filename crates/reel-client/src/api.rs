//! The Coordinator operations available to a worker.

use async_trait::async_trait;
use reel_models::api::{
    AttachThumbnailRequest, CompilationContext, CreateMediaFileRequest, CreateMediaFileResponse,
    CreateProcessingJobRequest, MediaBatchResponse, RecordRenderUsageRequest,
    UpdateClipStatusRequest, UpdateProcessingJobRequest, UpdateProjectStatusRequest,
};
use reel_models::{
    Clip, ClipId, JobId, MediaFile, MediaId, ProcessingJob, Project, ProjectId, RenderUsage,
    TierLimits, UserQuota,
};

use crate::error::ClientResult;

/// Every call is scoped by the owning user; the Coordinator answers 404 for
/// resources the user does not own.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn get_compilation_context(&self, user_id: &str, project_id: &ProjectId) -> ClientResult<CompilationContext>;

    async fn get_media_batch(&self, user_id: &str, media_ids: &[MediaId]) -> ClientResult<MediaBatchResponse>;

    /// Existing media downloaded from the same source, if any.
    async fn find_reusable_media(&self, user_id: &str, source_url: &str) -> ClientResult<Option<MediaFile>>;

    async fn create_media_file(&self, request: &CreateMediaFileRequest) -> ClientResult<CreateMediaFileResponse>;

    async fn attach_media_thumbnail(
        &self,
        user_id: &str,
        media_id: &MediaId,
        request: &AttachThumbnailRequest,
    ) -> ClientResult<MediaFile>;

    /// Remove a compilation record no project took as its output.
    async fn delete_media_file(&self, user_id: &str, media_id: &MediaId) -> ClientResult<MediaFile>;

    async fn get_clip(&self, user_id: &str, clip_id: &ClipId) -> ClientResult<Clip>;

    async fn update_clip_status(
        &self,
        user_id: &str,
        clip_id: &ClipId,
        request: &UpdateClipStatusRequest,
    ) -> ClientResult<Clip>;

    async fn create_processing_job(&self, request: &CreateProcessingJobRequest) -> ClientResult<ProcessingJob>;

    async fn update_processing_job(
        &self,
        user_id: &str,
        job_id: &JobId,
        request: &UpdateProcessingJobRequest,
    ) -> ClientResult<ProcessingJob>;

    async fn update_project_status(
        &self,
        user_id: &str,
        project_id: &ProjectId,
        request: &UpdateProjectStatusRequest,
    ) -> ClientResult<Project>;

    async fn get_user_quota(&self, user_id: &str) -> ClientResult<UserQuota>;

    async fn get_user_tier_limits(&self, user_id: &str) -> ClientResult<TierLimits>;

    /// Call-once per compile job; never retried automatically.
    async fn record_render_usage(&self, user_id: &str, request: &RecordRenderUsageRequest) -> ClientResult<RenderUsage>;
}

//! Worker-facing API.
//!
//! Every route requires the worker token. Lookups are scoped by the user id
//! the worker names, and records owned by anyone else answer 404.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use reel_models::api::{
    AttachThumbnailRequest, CompilationContext, CreateMediaFileRequest, CreateMediaFileResponse,
    CreateProcessingJobRequest, FindReusableMediaRequest, MediaBatchRequest, MediaBatchResponse,
    RecordRenderUsageRequest, ReusableMediaResponse, UpdateClipStatusRequest, UpdateProcessingJobRequest,
    UpdateProjectStatusRequest,
};
use reel_models::{
    Clip, ClipId, JobId, JobKind, MediaFile, MediaId, ProcessingJob, Project, ProjectId, RenderUsage,
    TierLimits, UserQuota,
};

use super::checked_id;
use crate::auth::WorkerAuth;
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::state::AppState;

pub async fn get_compilation_context(
    State(state): State<AppState>,
    Path((user_id, project_id)): Path<(String, String)>,
    _worker: WorkerAuth,
) -> ApiResult<Json<CompilationContext>> {
    let user_id = checked_id(&user_id)?;
    let project_id = ProjectId::from_string(checked_id(&project_id)?);
    Ok(Json(state.projects.compilation_context(user_id, &project_id).await?))
}

pub async fn get_media_batch(
    State(state): State<AppState>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<MediaBatchRequest>,
) -> ApiResult<Json<MediaBatchResponse>> {
    let user_id = checked_id(&request.user_id)?;
    Ok(Json(state.media.batch(user_id, &request.media_ids).await?))
}

pub async fn find_reusable_media(
    State(state): State<AppState>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<FindReusableMediaRequest>,
) -> ApiResult<Json<ReusableMediaResponse>> {
    let user_id = checked_id(&request.user_id)?;
    let media = state
        .media
        .find_reusable(user_id, &request.source_url, request.normalized_url.as_deref())
        .await?;
    Ok(Json(ReusableMediaResponse { media }))
}

/// 201 for a new record, 200 when an existing one with the same source was
/// returned instead.
pub async fn create_media_file(
    State(state): State<AppState>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<CreateMediaFileRequest>,
) -> ApiResult<(StatusCode, Json<CreateMediaFileResponse>)> {
    checked_id(&request.user_id)?;
    let response = state.media.create(&request).await?;
    let status = if response.reused { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(response)))
}

pub async fn attach_media_thumbnail(
    State(state): State<AppState>,
    Path((user_id, media_id)): Path<(String, String)>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<AttachThumbnailRequest>,
) -> ApiResult<Json<MediaFile>> {
    let user_id = checked_id(&user_id)?;
    let media_id = MediaId::from_string(checked_id(&media_id)?);
    let media = state
        .media
        .attach_thumbnail(user_id, &media_id, &request.thumbnail_path)
        .await?;
    Ok(Json(media))
}

/// Remove a compilation record that no project took as its output.
pub async fn delete_media_file(
    State(state): State<AppState>,
    Path((user_id, media_id)): Path<(String, String)>,
    _worker: WorkerAuth,
) -> ApiResult<Json<MediaFile>> {
    let user_id = checked_id(&user_id)?;
    let media_id = MediaId::from_string(checked_id(&media_id)?);
    Ok(Json(state.media.delete_orphaned_compilation(user_id, &media_id).await?))
}

pub async fn get_clip(
    State(state): State<AppState>,
    Path((user_id, clip_id)): Path<(String, String)>,
    _worker: WorkerAuth,
) -> ApiResult<Json<Clip>> {
    let user_id = checked_id(&user_id)?;
    let clip_id = ClipId::from_string(checked_id(&clip_id)?);
    Ok(Json(state.projects.get_clip(user_id, &clip_id).await?))
}

pub async fn update_clip_status(
    State(state): State<AppState>,
    Path((user_id, clip_id)): Path<(String, String)>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<UpdateClipStatusRequest>,
) -> ApiResult<Json<Clip>> {
    let user_id = checked_id(&user_id)?;
    let clip_id = ClipId::from_string(checked_id(&clip_id)?);
    Ok(Json(state.projects.update_clip_status(user_id, &clip_id, &request).await?))
}

/// Create and enqueue a download for a clip the user owns. Compiles only
/// start through the user-facing compile route, which reserves render time.
pub async fn create_processing_job(
    State(state): State<AppState>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<CreateProcessingJobRequest>,
) -> ApiResult<(StatusCode, Json<ProcessingJob>)> {
    let user_id = checked_id(&request.user_id)?;
    if request.kind != JobKind::Download {
        return Err(ApiError::bad_request("Compile jobs are created by the compile endpoint"));
    }

    let clip_id = ClipId::from_string(checked_id(&request.target_id)?);
    let clip = state.projects.get_clip(user_id, &clip_id).await?;

    let job = ProcessingJob::new(user_id, request.kind, clip.id.as_str(), request.queue);
    let job = state.jobs.dispatch(job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn update_processing_job(
    State(state): State<AppState>,
    Path((user_id, job_id)): Path<(String, String)>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<UpdateProcessingJobRequest>,
) -> ApiResult<Json<ProcessingJob>> {
    let user_id = checked_id(&user_id)?;
    let job_id = JobId::from_string(checked_id(&job_id)?);
    Ok(Json(state.jobs.update(user_id, &job_id, &request).await?))
}

pub async fn update_project_status(
    State(state): State<AppState>,
    Path((user_id, project_id)): Path<(String, String)>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<UpdateProjectStatusRequest>,
) -> ApiResult<Json<Project>> {
    let user_id = checked_id(&user_id)?;
    let project_id = ProjectId::from_string(checked_id(&project_id)?);
    Ok(Json(state.projects.finish(user_id, &project_id, &request).await?))
}

pub async fn get_user_quota(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    _worker: WorkerAuth,
) -> ApiResult<Json<UserQuota>> {
    let user_id = checked_id(&user_id)?;
    Ok(Json(state.quota.user_quota(user_id).await?))
}

pub async fn get_user_tier_limits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    _worker: WorkerAuth,
) -> ApiResult<Json<TierLimits>> {
    let user_id = checked_id(&user_id)?;
    Ok(Json(state.quota.tier_limits(user_id).await?))
}

/// Record a finished compile's actual duration. Call-once per job: a repeat
/// answers 409, as does a job that is no longer the project's running compile.
pub async fn record_render_usage(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    _worker: WorkerAuth,
    ApiJson(request): ApiJson<RecordRenderUsageRequest>,
) -> ApiResult<(StatusCode, Json<RenderUsage>)> {
    let user_id = checked_id(&user_id)?;
    checked_id(request.job_id.as_str())?;
    checked_id(request.project_id.as_str())?;

    let usage = state.projects.record_render_usage(user_id, &request).await?;
    Ok((StatusCode::CREATED, Json(usage)))
}

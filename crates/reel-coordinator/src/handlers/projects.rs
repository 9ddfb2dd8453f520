//! Project, clip and compile handlers for signed-in users.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use reel_models::{Clip, ClipId, ClipSource, ProcessingJob, Project, ProjectId};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::checked_id;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ValidatedJson};
use crate::services::{CompileStarted, ProjectUpdate};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

/// A project with its clips in project order.
#[derive(Serialize)]
pub struct ProjectDetail {
    pub project: Project,
    pub clips: Vec<Clip>,
}

/// A clip together with the download job fetching it.
#[derive(Serialize)]
pub struct ClipScheduled {
    pub clip: Clip,
    pub job: ProcessingJob,
}

pub async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = state.projects.create(&user.uid, &request.name).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<ProjectDetail>> {
    let project_id = ProjectId::from_string(checked_id(&project_id)?);
    let context = state.projects.compilation_context(&user.uid, &project_id).await?;
    Ok(Json(ProjectDetail {
        project: context.project,
        clips: context.clips,
    }))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    user: AuthUser,
    ValidatedJson(update): ValidatedJson<ProjectUpdate>,
) -> ApiResult<Json<Project>> {
    let project_id = ProjectId::from_string(checked_id(&project_id)?);
    let project = state.projects.update(&user.uid, &project_id, update).await?;
    Ok(Json(project))
}

pub async fn add_clip(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    user: AuthUser,
    ApiJson(source): ApiJson<ClipSource>,
) -> ApiResult<(StatusCode, Json<ClipScheduled>)> {
    let project_id = ProjectId::from_string(checked_id(&project_id)?);
    let (clip, job) = state.projects.add_clip(&user.uid, &project_id, source).await?;
    Ok((StatusCode::CREATED, Json(ClipScheduled { clip, job })))
}

pub async fn retry_clip(
    State(state): State<AppState>,
    Path((project_id, clip_id)): Path<(String, String)>,
    user: AuthUser,
) -> ApiResult<(StatusCode, Json<ClipScheduled>)> {
    let project_id = ProjectId::from_string(checked_id(&project_id)?);
    let clip_id = ClipId::from_string(checked_id(&clip_id)?);
    let (clip, job) = state.projects.retry_clip(&user.uid, &project_id, &clip_id).await?;
    Ok((StatusCode::ACCEPTED, Json(ClipScheduled { clip, job })))
}

/// Compile entry point. 402 when the estimate does not fit the remaining
/// render allowance.
pub async fn compile_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    user: AuthUser,
) -> ApiResult<(StatusCode, Json<CompileStarted>)> {
    let project_id = ProjectId::from_string(checked_id(&project_id)?);
    let started = state.compile.start(&user.uid, &project_id).await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

pub async fn cancel_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<Project>> {
    let project_id = ProjectId::from_string(checked_id(&project_id)?);
    Ok(Json(state.projects.cancel(&user.uid, &project_id).await?))
}

//! Job status for signed-in users.

use axum::extract::{Path, State};
use axum::Json;
use reel_models::{JobId, ProcessingJob};

use super::checked_id;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    user: AuthUser,
) -> ApiResult<Json<ProcessingJob>> {
    let job_id = JobId::from_string(checked_id(&job_id)?);
    Ok(Json(state.jobs.get(&user.uid, &job_id).await?))
}

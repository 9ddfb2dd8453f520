//! Download and compile tasks.
//!
//! A task only returns `Ok` once its success report reached the Coordinator.
//! On `Err` the executor calls [`report_failure`], so every claimed job ends
//! in a terminal state.

pub mod compile;
pub mod download;

use std::path::Path;

use reel_client::ClientResult;
use reel_media::fs_utils::remove_if_exists;
use reel_models::api::{UpdateClipStatusRequest, UpdateProcessingJobRequest, UpdateProjectStatusRequest};
use reel_models::{ClipStatus, JobId, ProjectStatus};
use reel_queue::QueueJob;
use tracing::{debug, warn};

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

pub use compile::run_compile;
pub use download::run_download;

/// Run the task for `job`.
pub async fn run(ctx: &WorkerContext, job: &QueueJob, log: &JobLogger) -> WorkerResult<()> {
    match job {
        QueueJob::Download(j) => run_download(ctx, j, log).await,
        QueueJob::Compile(j) => run_compile(ctx, j, log).await,
    }
}

/// Mark a claimed job `started`. A job the Coordinator already closed (or no
/// longer knows) is not run again.
pub(crate) async fn start_job(ctx: &WorkerContext, user_id: &str, job_id: &JobId) -> WorkerResult<()> {
    match ctx
        .api
        .update_processing_job(user_id, job_id, &UpdateProcessingJobRequest::started())
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if e.is_conflict() || e.is_not_found() => Err(WorkerError::AlreadyFinished),
        Err(e) => Err(e.into()),
    }
}

/// Send a terminal job update. A 409 means an earlier attempt already got
/// through.
pub(crate) async fn close_job(
    ctx: &WorkerContext,
    user_id: &str,
    job_id: &JobId,
    request: UpdateProcessingJobRequest,
) -> WorkerResult<()> {
    match ctx.api.update_processing_job(user_id, job_id, &request).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_conflict() => {
            debug!(job_id = %job_id, "Job was already terminal");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Accept 404/409 on a status report: the record is gone or already moved
/// on, and there is nothing left to correct.
fn settled<T>(result: ClientResult<T>) -> WorkerResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_conflict() || e.is_not_found() => {
            debug!("Status report skipped: {}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Report a failed task: the clip or project first, then the job.
///
/// A cancelled compile leaves the project as the user left it.
pub async fn report_failure(ctx: &WorkerContext, job: &QueueJob, error: &WorkerError) -> WorkerResult<()> {
    let message = error.report_message();
    let user_id = job.user_id();

    match job {
        QueueJob::Download(j) => {
            let request = UpdateClipStatusRequest {
                status: ClipStatus::Failed,
                media_id: None,
                error: Some(message.clone()),
            };
            settled(ctx.api.update_clip_status(user_id, &j.clip_id, &request).await)?;
        }
        QueueJob::Compile(j) if !error.is_cancelled() => {
            let request = UpdateProjectStatusRequest {
                status: ProjectStatus::Failed,
                job_id: Some(j.job_id.clone()),
                error: Some(message.clone()),
                output_media_id: None,
            };
            settled(ctx.api.update_project_status(user_id, &j.project_id, &request).await)?;
        }
        QueueJob::Compile(_) => {}
    }

    close_job(ctx, user_id, job.job_id(), UpdateProcessingJobRequest::failed(message)).await
}

/// Generate `<user>/thumbnails/<name>.jpg` for a stored video. Failures are
/// logged and leave the media without a thumbnail.
pub(crate) async fn make_thumbnail(
    ctx: &WorkerContext,
    video: &Path,
    user_id: &str,
    name: &str,
    duration_secs: f64,
    log: &JobLogger,
) -> Option<String> {
    let relative = format!("{}/thumbnails/{}.jpg", user_id, name);
    match ctx
        .media
        .thumbnail(video, &ctx.config.media_path(&relative), duration_secs)
        .await
    {
        Ok(()) => Some(relative),
        Err(e) => {
            log.log_warning(&format!("thumbnail generation failed: {}", e.detail()));
            None
        }
    }
}

/// Delete a stored file and its thumbnail that no record points to.
pub(crate) async fn discard(ctx: &WorkerContext, file_path: &str, thumbnail_path: Option<&str>) {
    for path in std::iter::once(file_path).chain(thumbnail_path) {
        if let Err(e) = remove_if_exists(ctx.config.media_path(path)).await {
            warn!(path = %path, "Failed to remove orphaned file: {}", e);
        }
    }
}

/// Remove a job's scratch directory.
pub(crate) async fn cleanup_work_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove work dir: {}", e),
    }
}

#[cfg(test)]
pub(crate) mod testing;

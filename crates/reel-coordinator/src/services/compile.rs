//! Compile pre-flight.
//!
//! Validates the selection, estimates the rendered duration, reserves it
//! against the monthly render allowance and only then dispatches the job.
//! A rejected pre-flight leaves no job behind and the project untouched.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use reel_models::{
    estimate_render, EstimateError, JobKind, MediaId, ProcessingJob, ProjectId, ProjectStatus,
    RenderEstimate, RenderQuota, TimelineSpec,
};
use reel_store::Store;
use serde::Serialize;
use tracing::{info, warn};

use super::jobs::JobService;
use super::projects::ProjectService;
use super::quota::QuotaService;
use crate::error::{ApiError, ApiResult};

/// Accepted compile.
#[derive(Debug, Serialize)]
pub struct CompileStarted {
    pub job: ProcessingJob,
    pub estimate: RenderEstimate,
    /// Render allowance after this compile's reservation.
    pub quota: RenderQuota,
}

#[derive(Clone)]
pub struct CompileService {
    store: Arc<dyn Store>,
    projects: ProjectService,
    jobs: JobService,
    quota: QuotaService,
    bumper_secs: f64,
}

impl CompileService {
    pub fn new(
        store: Arc<dyn Store>,
        projects: ProjectService,
        jobs: JobService,
        quota: QuotaService,
        bumper_secs: f64,
    ) -> Self {
        Self {
            store,
            projects,
            jobs,
            quota,
            bumper_secs,
        }
    }

    pub async fn start(&self, user_id: &str, project_id: &ProjectId) -> ApiResult<CompileStarted> {
        let _guard = self.projects.lock(project_id).await;
        let mut project = self.projects.get(user_id, project_id).await?;

        if !project.status.can_start_compile() {
            return Err(ApiError::conflict("Project is already processing"));
        }
        if !project.settings.has_valid_frame_rate() {
            return Err(ApiError::bad_request("frame_rate must be between 1 and 60"));
        }

        let limits = self.quota.tier_limits(user_id).await?;
        let clips = self.store.list_clips(user_id, &project.id).await?;
        let spec = TimelineSpec::from_project(&project, &clips, limits.max_clips as usize)?;

        let mut media_ids: Vec<MediaId> = spec.clips.iter().map(|c| c.media_id.clone()).collect();
        for id in project.decorative_media_ids() {
            if !media_ids.contains(&id) {
                media_ids.push(id);
            }
        }
        let media = self.store.get_media_batch(user_id, &media_ids).await?;

        let mut durations = HashMap::with_capacity(media_ids.len());
        for id in &media_ids {
            let file = media
                .iter()
                .find(|m| &m.id == id && m.is_owned_by(user_id))
                .ok_or_else(|| ApiError::bad_request(format!("Media {} does not exist", id)))?;
            if !file.is_ready() {
                return Err(ApiError::conflict(format!("Media {} is still being processed", id)));
            }
            durations.insert(id.clone(), file.duration_secs);
        }

        let estimate = estimate_render(&spec, &durations, self.bumper_secs).map_err(|e| match e {
            EstimateError::Timeline(e) => ApiError::from(e),
            EstimateError::MissingDuration(id) => ApiError::internal(format!("No duration known for media {}", id)),
        })?;

        let queue = self.jobs.route(JobKind::Compile).await;
        let mut job = ProcessingJob::new(user_id, JobKind::Compile, project.id.as_str(), queue);

        // 402 happens here, before anything is written.
        let quota = self.quota.reserve(&job, estimate.total_seconds).await?;
        job.reserved_render_secs = Some(estimate.total_seconds);

        let previous_status = project.status;
        let previous_error = project.error.take();
        let previous_output = project.output_media_id.take();
        let previous_job = project.active_job_id.replace(job.id.clone());
        project.status = ProjectStatus::Processing;
        project.updated_at = Utc::now();
        if let Err(e) = self.store.put_project(&project).await {
            self.release_quietly(&job).await;
            return Err(e.into());
        }

        match self.jobs.dispatch(job).await {
            Ok(job) => {
                info!(
                    user_id = %user_id,
                    project_id = %project.id,
                    job_id = %job.id,
                    estimated_secs = estimate.total_seconds,
                    segments = estimate.segment_count,
                    "Compile accepted"
                );
                Ok(CompileStarted { job, estimate, quota })
            }
            Err(e) => {
                // The failed job already released its reservation.
                project.status = previous_status;
                project.error = previous_error;
                project.output_media_id = previous_output;
                project.active_job_id = previous_job;
                project.updated_at = Utc::now();
                if let Err(store_err) = self.store.put_project(&project).await {
                    warn!(project_id = %project.id, "Failed to restore project after dispatch failure: {}", store_err);
                }
                Err(e)
            }
        }
    }

    async fn release_quietly(&self, job: &ProcessingJob) {
        if let Err(e) = self.quota.release(job).await {
            warn!(job_id = %job.id, "Failed to release render reservation: {}", e);
        }
    }
}

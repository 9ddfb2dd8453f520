//! Projects, their clips, and worker-reported status changes.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use reel_models::api::{
    CompilationContext, RecordRenderUsageRequest, UpdateClipStatusRequest, UpdateProjectStatusRequest,
};
use reel_models::{
    normalize_source_url, Clip, ClipId, ClipSource, ClipStatus, JobKind, JobState, MediaId, MediaKind,
    OutputSettings, ProcessingJob, Project, ProjectId, ProjectStatus, RenderUsage, TransitionMode,
};
use reel_store::Store;
use serde::{Deserialize, Deserializer};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use validator::Validate;

use super::jobs::JobService;
use super::media::MediaService;
use super::quota::QuotaService;
use crate::error::{ApiError, ApiResult};
use crate::security::{sanitize_title, validate_source_url};

const LOCK_STRIPES: usize = 64;

/// Error recorded on a project cancelled by its owner.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Serializes read-modify-write cycles on the same project within this
/// process. Striped so memory stays bounded.
pub struct ProjectLocks {
    stripes: Vec<Mutex<()>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, project_id: &ProjectId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        project_id.hash(&mut hasher);
        let stripe = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[stripe].lock().await
    }
}

impl Default for ProjectLocks {
    fn default() -> Self {
        Self::new()
    }
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial project edit. Absent fields are left alone; `intro_id` and
/// `outro_id` may be set to `null` to clear them.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProjectUpdate {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub clip_ids: Option<Vec<ClipId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub intro_id: Option<Option<MediaId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub outro_id: Option<Option<MediaId>>,
    #[validate(length(max = 50))]
    pub transition_ids: Option<Vec<MediaId>>,
    pub transition_mode: Option<TransitionMode>,
    pub settings: Option<OutputSettings>,
}

#[derive(Clone)]
pub struct ProjectService {
    store: Arc<dyn Store>,
    jobs: JobService,
    media: MediaService,
    quota: QuotaService,
    locks: Arc<ProjectLocks>,
}

impl ProjectService {
    pub fn new(store: Arc<dyn Store>, jobs: JobService, media: MediaService, quota: QuotaService) -> Self {
        Self {
            store,
            jobs,
            media,
            quota,
            locks: Arc::new(ProjectLocks::new()),
        }
    }

    pub async fn lock(&self, project_id: &ProjectId) -> MutexGuard<'_, ()> {
        self.locks.lock(project_id).await
    }

    pub async fn create(&self, user_id: &str, name: &str) -> ApiResult<Project> {
        let name = sanitize_title(name);
        if name.is_empty() {
            return Err(ApiError::bad_request("Project name cannot be empty"));
        }
        let project = Project::new(user_id, name);
        self.store.put_project(&project).await?;
        info!(user_id = %user_id, project_id = %project.id, "Project created");
        Ok(project)
    }

    pub async fn get(&self, user_id: &str, project_id: &ProjectId) -> ApiResult<Project> {
        self.store
            .get_project(user_id, project_id)
            .await?
            .filter(|p| p.is_owned_by(user_id))
            .ok_or_else(|| ApiError::not_found("Project not found"))
    }

    pub async fn update(&self, user_id: &str, project_id: &ProjectId, update: ProjectUpdate) -> ApiResult<Project> {
        let _guard = self.lock(project_id).await;
        let mut project = self.get(user_id, project_id).await?;
        if project.status == ProjectStatus::Processing {
            return Err(ApiError::conflict("Project cannot be edited while processing"));
        }

        if let Some(name) = update.name {
            let name = sanitize_title(&name);
            if name.is_empty() {
                return Err(ApiError::bad_request("Project name cannot be empty"));
            }
            project.name = name;
        }

        if let Some(clip_ids) = update.clip_ids {
            let mut seen = HashSet::new();
            if !clip_ids.iter().all(|id| seen.insert(id)) {
                return Err(ApiError::bad_request("clip_ids contains duplicates"));
            }
            let clips = self.store.list_clips(user_id, &project.id).await?;
            if let Some(unknown) = clip_ids.iter().find(|id| !clips.iter().any(|c| &c.id == *id)) {
                return Err(ApiError::bad_request(format!("Clip {} is not part of this project", unknown)));
            }
            project.clip_ids = clip_ids;
        }

        if let Some(intro_id) = update.intro_id {
            if let Some(id) = &intro_id {
                self.check_decorative(user_id, id, MediaKind::Intro).await?;
            }
            project.intro_id = intro_id;
        }
        if let Some(outro_id) = update.outro_id {
            if let Some(id) = &outro_id {
                self.check_decorative(user_id, id, MediaKind::Outro).await?;
            }
            project.outro_id = outro_id;
        }
        if let Some(transition_ids) = update.transition_ids {
            for id in &transition_ids {
                self.check_decorative(user_id, id, MediaKind::Transition).await?;
            }
            project.transition_ids = transition_ids;
        }
        if let Some(mode) = update.transition_mode {
            project.transition_mode = mode;
        }
        if let Some(settings) = update.settings {
            if !settings.has_valid_frame_rate() {
                return Err(ApiError::bad_request("frame_rate must be between 1 and 60"));
            }
            project.settings = settings;
        }

        project.status = match project.status {
            _ if project.clip_ids.is_empty() => ProjectStatus::Draft,
            ProjectStatus::Draft => ProjectStatus::Ready,
            other => other,
        };
        project.updated_at = Utc::now();
        self.store.put_project(&project).await?;
        Ok(project)
    }

    async fn check_decorative(&self, user_id: &str, media_id: &MediaId, kind: MediaKind) -> ApiResult<()> {
        let media = match self.media.get(user_id, media_id).await {
            Ok(media) => media,
            Err(ApiError::NotFound(_)) => {
                return Err(ApiError::bad_request(format!("{} media {} not found", kind, media_id)))
            }
            Err(e) => return Err(e),
        };
        if media.kind != kind {
            return Err(ApiError::bad_request(format!(
                "Media {} is a {}, expected {}",
                media_id, media.kind, kind
            )));
        }
        Ok(())
    }

    pub async fn get_clip(&self, user_id: &str, clip_id: &ClipId) -> ApiResult<Clip> {
        self.store
            .get_clip(user_id, clip_id)
            .await?
            .filter(|c| c.is_owned_by(user_id))
            .ok_or_else(|| ApiError::not_found("Clip not found"))
    }

    /// Add a clip to a project and dispatch its download.
    pub async fn add_clip(
        &self,
        user_id: &str,
        project_id: &ProjectId,
        mut source: ClipSource,
    ) -> ApiResult<(Clip, ProcessingJob)> {
        source.source_url = validate_source_url(&source.source_url).map_err(ApiError::bad_request)?;
        let key = normalize_source_url(&source.source_url).map_err(|e| ApiError::bad_request(e.to_string()))?;
        source.title = source.title.as_deref().map(sanitize_title).filter(|t| !t.is_empty());
        source.creator = source.creator.as_deref().map(sanitize_title).filter(|t| !t.is_empty());
        source.game = source.game.as_deref().map(sanitize_title).filter(|t| !t.is_empty());

        let _guard = self.lock(project_id).await;
        let mut project = self.get(user_id, project_id).await?;
        if project.status == ProjectStatus::Processing {
            return Err(ApiError::conflict("Clips cannot be added while the project is processing"));
        }

        let existing = self.store.list_clips(user_id, &project.id).await?;
        if existing
            .iter()
            .any(|c| normalize_source_url(&c.source_url).is_ok_and(|k| k == key))
        {
            return Err(ApiError::conflict("This clip is already part of the project"));
        }

        let clip = Clip::from_source(project.id.clone(), user_id, source);
        self.store.put_clip(&clip).await?;
        project.push_clip(clip.id.clone());
        self.store.put_project(&project).await?;

        let job = self.dispatch_download(clip.clone()).await?;
        Ok((clip, job))
    }

    /// Re-issue the download of a failed clip.
    pub async fn retry_clip(
        &self,
        user_id: &str,
        project_id: &ProjectId,
        clip_id: &ClipId,
    ) -> ApiResult<(Clip, ProcessingJob)> {
        let mut clip = self.get_clip(user_id, clip_id).await?;
        if &clip.project_id != project_id {
            return Err(ApiError::not_found("Clip not found"));
        }
        if !clip.status.is_retryable() {
            return Err(ApiError::conflict(format!("Clip is {}, only failed clips can be retried", clip.status)));
        }

        clip.status = ClipStatus::Pending;
        clip.error = None;
        clip.updated_at = Utc::now();
        self.store.put_clip(&clip).await?;

        let job = self.dispatch_download(clip.clone()).await?;
        Ok((clip, job))
    }

    async fn dispatch_download(&self, mut clip: Clip) -> ApiResult<ProcessingJob> {
        match self.jobs.create(&clip.user_id, JobKind::Download, clip.id.as_str()).await {
            Ok(job) => Ok(job),
            Err(e) => {
                // Leave the clip retryable.
                clip.status = ClipStatus::Failed;
                clip.error = Some("download could not be scheduled".to_string());
                clip.updated_at = Utc::now();
                if let Err(store_err) = self.store.put_clip(&clip).await {
                    warn!(clip_id = %clip.id, "Failed to mark clip failed: {}", store_err);
                }
                Err(e)
            }
        }
    }

    pub async fn update_clip_status(
        &self,
        user_id: &str,
        clip_id: &ClipId,
        update: &UpdateClipStatusRequest,
    ) -> ApiResult<Clip> {
        let mut clip = self.get_clip(user_id, clip_id).await?;

        match update.status {
            ClipStatus::Pending => {
                return Err(ApiError::bad_request("Workers cannot reset a clip to pending"));
            }
            ClipStatus::Ready => {
                let media_id = update
                    .media_id
                    .as_ref()
                    .ok_or_else(|| ApiError::bad_request("media_id is required for a ready clip"))?;
                let media = match self.media.get(user_id, media_id).await {
                    Ok(media) => media,
                    Err(ApiError::NotFound(_)) => {
                        return Err(ApiError::bad_request(format!("Media {} not found", media_id)))
                    }
                    Err(e) => return Err(e),
                };
                if media.kind != MediaKind::Clip {
                    return Err(ApiError::bad_request("A clip can only link clip media"));
                }
                clip.media_id = Some(media.id);
                clip.error = None;
            }
            ClipStatus::Downloading => {
                clip.error = None;
            }
            ClipStatus::Failed => {
                clip.error = Some(
                    update
                        .error
                        .clone()
                        .filter(|e| !e.is_empty())
                        .unwrap_or_else(|| "download failed".to_string()),
                );
            }
        }

        clip.status = update.status;
        clip.updated_at = Utc::now();
        self.store.put_clip(&clip).await?;
        Ok(clip)
    }

    /// Mark a processing project failed. The worker notices when it claims
    /// or finishes the compile.
    pub async fn cancel(&self, user_id: &str, project_id: &ProjectId) -> ApiResult<Project> {
        let _guard = self.lock(project_id).await;
        let mut project = self.get(user_id, project_id).await?;
        if project.status != ProjectStatus::Processing {
            return Err(ApiError::conflict(format!("Project is {}, not processing", project.status)));
        }

        project.status = ProjectStatus::Failed;
        project.error = Some(CANCELLED_ERROR.to_string());
        project.active_job_id = None;
        project.updated_at = Utc::now();
        self.store.put_project(&project).await?;
        info!(user_id = %user_id, project_id = %project.id, "Project cancelled");
        Ok(project)
    }

    /// Close a processing project on behalf of its compile job. Only the
    /// project's active compile may close it.
    pub async fn finish(
        &self,
        user_id: &str,
        project_id: &ProjectId,
        update: &UpdateProjectStatusRequest,
    ) -> ApiResult<Project> {
        if !matches!(update.status, ProjectStatus::Completed | ProjectStatus::Failed) {
            return Err(ApiError::bad_request("Project status can only be set to completed or failed"));
        }

        let _guard = self.lock(project_id).await;
        let mut project = self.get(user_id, project_id).await?;
        if !project.status.can_finish() {
            return Err(ApiError::conflict(format!("Project is {}, not processing", project.status)));
        }

        let job_id = update
            .job_id
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("job_id is required"))?;
        let job = self.jobs.get(user_id, job_id).await?;
        if job.kind != JobKind::Compile || job.target_id != project.id.as_str() {
            return Err(ApiError::bad_request("Job does not compile this project"));
        }
        if !project.is_rendering(job_id) {
            return Err(ApiError::conflict(format!("Job {} is not the project's active compile", job_id)));
        }

        match update.status {
            ProjectStatus::Completed => {
                let media_id = update
                    .output_media_id
                    .as_ref()
                    .ok_or_else(|| ApiError::bad_request("output_media_id is required to complete a project"))?;
                let media = match self.media.get(user_id, media_id).await {
                    Ok(media) => media,
                    Err(ApiError::NotFound(_)) => {
                        return Err(ApiError::bad_request(format!("Media {} not found", media_id)))
                    }
                    Err(e) => return Err(e),
                };
                if media.kind != MediaKind::Compilation {
                    return Err(ApiError::bad_request("Output media must be a compilation"));
                }
                project.output_media_id = Some(media.id);
                project.error = None;
            }
            _ => {
                project.error = Some(
                    update
                        .error
                        .clone()
                        .filter(|e| !e.is_empty())
                        .unwrap_or_else(|| "compilation failed".to_string()),
                );
            }
        }

        project.status = update.status;
        project.updated_at = Utc::now();
        self.store.put_project(&project).await?;
        info!(user_id = %user_id, project_id = %project.id, status = %project.status, "Project finished");
        Ok(project)
    }

    /// Bill a finished render. Only a started job that still owns the
    /// project's render may record usage, once.
    pub async fn record_render_usage(
        &self,
        user_id: &str,
        request: &RecordRenderUsageRequest,
    ) -> ApiResult<RenderUsage> {
        let _guard = self.lock(&request.project_id).await;
        let job = self.jobs.get(user_id, &request.job_id).await?;
        if job.kind != JobKind::Compile || job.target_id != request.project_id.as_str() {
            return Err(ApiError::bad_request("Job does not compile this project"));
        }
        if job.state != JobState::Started {
            return Err(ApiError::conflict(format!("Job is {}, not started", job.state)));
        }

        let project = self.get(user_id, &request.project_id).await?;
        if !project.is_rendering(&job.id) {
            return Err(ApiError::conflict(format!("Job {} is not the project's active compile", job.id)));
        }

        self.quota
            .record_usage(&job, request.project_id.clone(), request.seconds)
            .await
    }

    /// Project, clips in project order, their ready media and tier limits.
    pub async fn compilation_context(&self, user_id: &str, project_id: &ProjectId) -> ApiResult<CompilationContext> {
        let project = self.get(user_id, project_id).await?;
        let mut all_clips = self.store.list_clips(user_id, &project.id).await?;

        let clips: Vec<Clip> = project
            .clip_ids
            .iter()
            .filter_map(|id| {
                let pos = all_clips.iter().position(|c| &c.id == id)?;
                Some(all_clips.swap_remove(pos))
            })
            .collect();

        let media_ids: Vec<MediaId> = clips.iter().filter_map(|c| c.ready_media().cloned()).collect();
        let clip_media = self.media.batch(user_id, &media_ids).await?.media;
        let tier_limits = self.quota.tier_limits(user_id).await?;

        Ok(CompilationContext {
            project,
            clips,
            clip_media,
            tier_limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifier::LogNotifier;
    use reel_queue::MemoryDispatcher;
    use reel_store::MemoryStore;

    fn service() -> (ProjectService, Arc<MemoryStore>, Arc<MemoryDispatcher>) {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let quota = QuotaService::new(store.clone(), 3);
        let jobs = JobService::new(store.clone(), dispatcher.clone(), Arc::new(LogNotifier), quota.clone());
        let media = MediaService::new(store.clone());
        (ProjectService::new(store.clone(), jobs, media, quota), store, dispatcher)
    }

    fn source(url: &str) -> ClipSource {
        ClipSource {
            source_url: url.to_string(),
            title: Some("  Great play ".to_string()),
            creator: None,
            game: None,
            view_count: Some(10),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_add_clip_promotes_and_dispatches_download() {
        let (projects, _, dispatcher) = service();
        let project = projects.create("u1", "Highlights").await.unwrap();

        let (clip, job) = projects
            .add_clip("u1", &project.id, source("https://clips.twitch.tv/Slug"))
            .await
            .unwrap();
        assert_eq!(clip.title.as_deref(), Some("Great play"));
        assert_eq!(job.kind, JobKind::Download);
        assert_eq!(job.target_id, clip.id.as_str());
        assert_eq!(dispatcher.enqueued().len(), 1);

        let project = projects.get("u1", &project.id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);
        assert_eq!(project.clip_ids, vec![clip.id]);
    }

    #[tokio::test]
    async fn test_duplicate_source_in_project_conflicts() {
        let (projects, _, _) = service();
        let project = projects.create("u1", "Highlights").await.unwrap();
        projects
            .add_clip("u1", &project.id, source("https://youtu.be/abc"))
            .await
            .unwrap();

        let err = projects
            .add_clip("u1", &project.id, source("https://www.youtube.com/watch?v=abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_retry_requires_failed_clip() {
        let (projects, _, dispatcher) = service();
        let project = projects.create("u1", "Highlights").await.unwrap();
        let (clip, _) = projects
            .add_clip("u1", &project.id, source("https://youtu.be/abc"))
            .await
            .unwrap();

        assert!(matches!(
            projects.retry_clip("u1", &project.id, &clip.id).await,
            Err(ApiError::Conflict(_))
        ));

        projects
            .update_clip_status(
                "u1",
                &clip.id,
                &UpdateClipStatusRequest {
                    status: ClipStatus::Failed,
                    media_id: None,
                    error: Some("HTTP 403".to_string()),
                },
            )
            .await
            .unwrap();

        let (retried, job) = projects.retry_clip("u1", &project.id, &clip.id).await.unwrap();
        assert_eq!(retried.status, ClipStatus::Pending);
        assert!(retried.error.is_none());
        assert_eq!(job.target_id, clip.id.as_str());
        assert_eq!(dispatcher.enqueued().len(), 2);
    }

    #[tokio::test]
    async fn test_update_rejects_wrong_media_kind() {
        let (projects, store, _) = service();
        let project = projects.create("u1", "Highlights").await.unwrap();
        let outro = reel_models::MediaFile::new("u1", MediaKind::Outro, "u1/assets/outro.mp4", 4.0, 10);
        store.put_media(&outro).await.unwrap();

        let err = projects
            .update(
                "u1",
                &project.id,
                ProjectUpdate {
                    intro_id: Some(Some(outro.id.clone())),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let updated = projects
            .update(
                "u1",
                &project.id,
                ProjectUpdate {
                    outro_id: Some(Some(outro.id.clone())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.outro_id, Some(outro.id));
        assert_eq!(updated.status, ProjectStatus::Draft);
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let cleared: ProjectUpdate = serde_json::from_str(r#"{"intro_id": null}"#).unwrap();
        assert_eq!(cleared.intro_id, Some(None));
        assert!(cleared.outro_id.is_none());
    }

    #[tokio::test]
    async fn test_cancel_only_while_processing() {
        let (projects, store, _) = service();
        let mut project = projects.create("u1", "Highlights").await.unwrap();
        assert!(matches!(
            projects.cancel("u1", &project.id).await,
            Err(ApiError::Conflict(_))
        ));

        project.status = ProjectStatus::Processing;
        store.put_project(&project).await.unwrap();
        let cancelled = projects.cancel("u1", &project.id).await.unwrap();
        assert_eq!(cancelled.status, ProjectStatus::Failed);
        assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_ERROR));
    }
}

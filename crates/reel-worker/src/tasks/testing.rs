//! In-memory Coordinator and media toolkit for task tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reel_client::{ClientError, ClientResult, CoordinatorApi};
use reel_media::{MediaError, MediaResult, SegmentJob, VideoInfo};
use reel_models::api::{
    AttachThumbnailRequest, CompilationContext, CreateMediaFileRequest, CreateMediaFileResponse,
    CreateProcessingJobRequest, MediaBatchResponse, RecordRenderUsageRequest, UpdateClipStatusRequest,
    UpdateProcessingJobRequest, UpdateProjectStatusRequest,
};
use reel_models::{
    Clip, ClipId, ClipSource, ClipStatus, ContainerFormat, EncodingConfig, JobId, JobKind, JobState,
    MediaFile, MediaId, MediaKind, PlanTier, ProcessingJob, Project, ProjectId, ProjectStatus,
    RenderQuota, RenderUsage, StorageUsage, TierLimits, UserQuota,
};
use reqwest::StatusCode;
use tempfile::TempDir;

use crate::config::WorkerConfig;
use crate::context::WorkerContext;
use crate::logging::JobLogger;
use crate::toolkit::MediaToolkit;
use reel_media::EncoderStrategy;

/// Duration reported by the fake probe.
pub const PROBED_SECS: f64 = 60.5;

const STORAGE_LIMIT: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    GetCompilationContext,
    GetMediaBatch,
    FindReusableMedia,
    CreateMediaFile,
    AttachMediaThumbnail,
    DeleteMediaFile,
    GetClip,
    UpdateClipStatus,
    CreateProcessingJob,
    UpdateProcessingJob,
    UpdateProjectStatus,
    GetUserQuota,
    GetUserTierLimits,
    RecordRenderUsage,
}

#[derive(Debug, Clone)]
struct JobRecord {
    state: JobState,
    result: serde_json::Value,
    error: Option<String>,
}

struct State {
    clips: HashMap<ClipId, Clip>,
    media: HashMap<MediaId, MediaFile>,
    projects: HashMap<ProjectId, Project>,
    jobs: HashMap<JobId, JobRecord>,
    usage: Vec<RenderUsage>,
    reusable: Option<MediaFile>,
    source_winner: Option<MediaFile>,
    storage_remaining: u64,
    tier_limits: TierLimits,
    /// Calls answered with a 503.
    unavailable: Vec<Call>,
    calls: Vec<Call>,
}

fn api_error(status: StatusCode, detail: &str) -> ClientError {
    ClientError::Api {
        status,
        code: None,
        detail: detail.to_string(),
    }
}

fn not_found(what: &str) -> ClientError {
    api_error(StatusCode::NOT_FOUND, &format!("{} not found", what))
}

pub struct FakeCoordinator {
    state: Mutex<State>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                clips: HashMap::new(),
                media: HashMap::new(),
                projects: HashMap::new(),
                jobs: HashMap::new(),
                usage: Vec::new(),
                reusable: None,
                source_winner: None,
                storage_remaining: STORAGE_LIMIT,
                tier_limits: TierLimits::for_tier(PlanTier::Pro),
                unavailable: Vec::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    fn record(&self, call: Call) {
        self.with(|s| s.calls.push(call));
    }

    fn answer(&self, call: Call) -> ClientResult<()> {
        self.record(call);
        if self.with(|s| s.unavailable.contains(&call)) {
            return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, "coordinator unavailable"));
        }
        Ok(())
    }

    /// Answer every later `call` with a 503.
    pub fn fail(&self, call: Call) {
        self.with(|s| s.unavailable.push(call));
    }

    pub fn add_clip(&self, user_id: &str, url: &str) -> Clip {
        let clip = Clip::from_source(
            ProjectId::new(),
            user_id,
            ClipSource {
                source_url: url.to_string(),
                title: None,
                creator: None,
                game: None,
                view_count: None,
                created_at: None,
            },
        );
        self.with(|s| s.clips.insert(clip.id.clone(), clip.clone()));
        clip
    }

    pub fn add_media(&self, user_id: &str, kind: MediaKind, duration_secs: f64, thumbnail: bool) -> MediaFile {
        let id = MediaId::new();
        let mut media = MediaFile::new(user_id, kind, format!("{}/{}/{}.mp4", user_id, kind.directory(), id), duration_secs, 1024);
        media.id = id;
        if thumbnail {
            media.thumbnail_path = Some(format!("{}/thumbnails/{}.jpg", user_id, media.id));
        }
        self.with(|s| s.media.insert(media.id.clone(), media.clone()));
        media
    }

    /// A processing project with `clips` ready clips and an optional intro.
    pub fn add_project(&self, user_id: &str, clips: usize, intro: bool) -> Project {
        let mut project = Project::new(user_id, "Highlights");
        for n in 0..clips {
            let media = self.add_media(user_id, MediaKind::Clip, 20.0, true);
            let mut clip = Clip::from_source(
                project.id.clone(),
                user_id,
                ClipSource {
                    source_url: format!("https://clips.twitch.tv/Clip{}", n),
                    title: None,
                    creator: None,
                    game: None,
                    view_count: None,
                    created_at: None,
                },
            );
            clip.status = ClipStatus::Ready;
            clip.media_id = Some(media.id);
            project.push_clip(clip.id.clone());
            self.with(|s| s.clips.insert(clip.id.clone(), clip));
        }
        if intro {
            project.intro_id = Some(self.add_media(user_id, MediaKind::Intro, 3.0, true).id);
        }
        project.status = ProjectStatus::Processing;
        self.with(|s| s.projects.insert(project.id.clone(), project.clone()));
        project
    }

    pub fn set_reusable(&self, media: MediaFile) {
        self.with(|s| s.reusable = Some(media));
    }

    /// Media that `create_media_file` returns for any sourced request, as if
    /// a concurrent download registered first.
    pub fn register_source_winner(&self, media: MediaFile) {
        self.with(|s| s.source_winner = Some(media));
    }

    pub fn set_storage_remaining(&self, bytes: u64) {
        self.with(|s| s.storage_remaining = bytes);
    }

    pub fn set_tier_limits(&self, limits: TierLimits) {
        self.with(|s| s.tier_limits = limits);
    }

    /// Make `job_id` the compile the project waits on.
    pub fn set_active_job(&self, id: &ProjectId, job_id: &JobId) {
        self.with(|s| {
            if let Some(p) = s.projects.get_mut(id) {
                p.active_job_id = Some(job_id.clone());
            }
        });
    }

    pub fn media_count(&self, kind: MediaKind) -> usize {
        self.with(|s| s.media.values().filter(|m| m.kind == kind).count())
    }

    pub fn set_project_status(&self, id: &ProjectId, status: ProjectStatus) {
        self.with(|s| {
            if let Some(p) = s.projects.get_mut(id) {
                p.status = status;
            }
        });
    }

    pub fn forget_media(&self, id: &MediaId) {
        self.with(|s| s.media.remove(id));
    }

    pub fn finish_job(&self, id: &JobId) {
        self.with(|s| {
            s.jobs.insert(
                id.clone(),
                JobRecord {
                    state: JobState::Succeeded,
                    result: serde_json::Value::Null,
                    error: None,
                },
            )
        });
    }

    pub fn clip(&self, id: &ClipId) -> Clip {
        self.with(|s| s.clips[id].clone())
    }

    pub fn media(&self, id: &MediaId) -> MediaFile {
        self.with(|s| s.media[id].clone())
    }

    pub fn project(&self, id: &ProjectId) -> Project {
        self.with(|s| s.projects[id].clone())
    }

    pub fn job_outcome(&self, id: &JobId) -> Option<(JobState, serde_json::Value)> {
        self.with(|s| s.jobs.get(id).map(|j| (j.state, j.result.clone())))
    }

    pub fn job_error(&self, id: &JobId) -> Option<String> {
        self.with(|s| s.jobs.get(id).and_then(|j| j.error.clone()))
    }

    pub fn render_usage(&self) -> Vec<RenderUsage> {
        self.with(|s| s.usage.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|s| s.calls.clone())
    }
}

#[async_trait]
impl CoordinatorApi for FakeCoordinator {
    async fn get_compilation_context(&self, user_id: &str, project_id: &ProjectId) -> ClientResult<CompilationContext> {
        self.record(Call::GetCompilationContext);
        self.with(|s| {
            let project = s
                .projects
                .get(project_id)
                .filter(|p| p.user_id == user_id)
                .cloned()
                .ok_or_else(|| not_found("project"))?;
            let clips: Vec<Clip> = project
                .clip_ids
                .iter()
                .filter_map(|id| s.clips.get(id).cloned())
                .collect();
            let clip_media = clips
                .iter()
                .filter_map(|c| c.media_id.as_ref())
                .filter_map(|id| s.media.get(id).cloned())
                .collect();
            Ok(CompilationContext {
                project,
                clips,
                clip_media,
                tier_limits: s.tier_limits.clone(),
            })
        })
    }

    async fn get_media_batch(&self, user_id: &str, media_ids: &[MediaId]) -> ClientResult<MediaBatchResponse> {
        self.record(Call::GetMediaBatch);
        self.with(|s| {
            let mut response = MediaBatchResponse::default();
            for id in media_ids {
                match s.media.get(id).filter(|m| m.user_id == user_id) {
                    Some(m) => response.media.push(m.clone()),
                    None => response.missing.push(id.clone()),
                }
            }
            Ok(response)
        })
    }

    async fn find_reusable_media(&self, user_id: &str, _source_url: &str) -> ClientResult<Option<MediaFile>> {
        self.record(Call::FindReusableMedia);
        Ok(self.with(|s| s.reusable.clone().filter(|m| m.user_id == user_id)))
    }

    async fn create_media_file(&self, request: &CreateMediaFileRequest) -> ClientResult<CreateMediaFileResponse> {
        self.answer(Call::CreateMediaFile)?;
        self.with(|s| {
            if request.source_url.is_some() {
                if let Some(winner) = s.source_winner.clone() {
                    return Ok(CreateMediaFileResponse {
                        media: winner,
                        reused: true,
                    });
                }
            }
            let mut media = MediaFile::new(
                request.user_id.clone(),
                request.kind,
                request.file_path.clone(),
                request.duration_secs,
                request.size_bytes,
            );
            media.thumbnail_path = request.thumbnail_path.clone();
            s.media.insert(media.id.clone(), media.clone());
            Ok(CreateMediaFileResponse { media, reused: false })
        })
    }

    async fn attach_media_thumbnail(
        &self,
        _user_id: &str,
        media_id: &MediaId,
        request: &AttachThumbnailRequest,
    ) -> ClientResult<MediaFile> {
        self.record(Call::AttachMediaThumbnail);
        self.with(|s| {
            let media = s.media.get_mut(media_id).ok_or_else(|| not_found("media"))?;
            media.thumbnail_path = Some(request.thumbnail_path.clone());
            Ok(media.clone())
        })
    }

    async fn delete_media_file(&self, user_id: &str, media_id: &MediaId) -> ClientResult<MediaFile> {
        self.answer(Call::DeleteMediaFile)?;
        self.with(|s| {
            let media = s
                .media
                .get(media_id)
                .filter(|m| m.user_id == user_id && m.kind == MediaKind::Compilation)
                .cloned()
                .ok_or_else(|| not_found("media"))?;
            if s.projects.values().any(|p| p.output_media_id.as_ref() == Some(media_id)) {
                return Err(api_error(StatusCode::CONFLICT, "media is a project's output"));
            }
            s.media.remove(media_id);
            Ok(media)
        })
    }

    async fn get_clip(&self, user_id: &str, clip_id: &ClipId) -> ClientResult<Clip> {
        self.record(Call::GetClip);
        self.with(|s| {
            s.clips
                .get(clip_id)
                .filter(|c| c.user_id == user_id)
                .cloned()
                .ok_or_else(|| not_found("clip"))
        })
    }

    async fn update_clip_status(
        &self,
        _user_id: &str,
        clip_id: &ClipId,
        request: &UpdateClipStatusRequest,
    ) -> ClientResult<Clip> {
        self.record(Call::UpdateClipStatus);
        self.with(|s| {
            let clip = s.clips.get_mut(clip_id).ok_or_else(|| not_found("clip"))?;
            clip.status = request.status;
            if request.media_id.is_some() {
                clip.media_id = request.media_id.clone();
            }
            clip.error = request.error.clone();
            Ok(clip.clone())
        })
    }

    async fn create_processing_job(&self, request: &CreateProcessingJobRequest) -> ClientResult<ProcessingJob> {
        self.record(Call::CreateProcessingJob);
        Ok(ProcessingJob::new(
            request.user_id.clone(),
            request.kind,
            request.target_id.clone(),
            request.queue,
        ))
    }

    async fn update_processing_job(
        &self,
        user_id: &str,
        job_id: &JobId,
        request: &UpdateProcessingJobRequest,
    ) -> ClientResult<ProcessingJob> {
        self.record(Call::UpdateProcessingJob);
        self.with(|s| {
            let record = s.jobs.entry(job_id.clone()).or_insert(JobRecord {
                state: JobState::Queued,
                result: serde_json::Value::Null,
                error: None,
            });
            if !record.state.can_transition_to(request.state) {
                return Err(api_error(StatusCode::CONFLICT, "job is already finished"));
            }
            record.state = request.state;
            if let Some(result) = &request.result {
                record.result = result.clone();
            }
            if request.error.is_some() {
                record.error = request.error.clone();
            }

            let mut job = ProcessingJob::new(user_id, JobKind::Download, "target", Default::default());
            job.id = job_id.clone();
            job.state = record.state;
            Ok(job)
        })
    }

    async fn update_project_status(
        &self,
        _user_id: &str,
        project_id: &ProjectId,
        request: &UpdateProjectStatusRequest,
    ) -> ClientResult<Project> {
        self.answer(Call::UpdateProjectStatus)?;
        self.with(|s| {
            let project = s.projects.get_mut(project_id).ok_or_else(|| not_found("project"))?;
            let job_id = request.job_id.as_ref().ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "job_id is required"))?;
            if !project.is_rendering(job_id) {
                return Err(api_error(StatusCode::CONFLICT, "job does not own the project's render"));
            }
            project.status = request.status;
            project.error = request.error.clone();
            project.output_media_id = request.output_media_id.clone();
            Ok(project.clone())
        })
    }

    async fn get_user_quota(&self, _user_id: &str) -> ClientResult<UserQuota> {
        self.record(Call::GetUserQuota);
        Ok(self.with(|s| UserQuota {
            tier: s.tier_limits.tier,
            storage: StorageUsage::new(STORAGE_LIMIT - s.storage_remaining.min(STORAGE_LIMIT), STORAGE_LIMIT),
            render: RenderQuota::new("2026-10", s.tier_limits.monthly_render_seconds, 0, 0),
        }))
    }

    async fn get_user_tier_limits(&self, _user_id: &str) -> ClientResult<TierLimits> {
        self.record(Call::GetUserTierLimits);
        Ok(self.with(|s| s.tier_limits.clone()))
    }

    async fn record_render_usage(&self, user_id: &str, request: &RecordRenderUsageRequest) -> ClientResult<RenderUsage> {
        self.answer(Call::RecordRenderUsage)?;
        self.with(|s| {
            let started = s.jobs.get(&request.job_id).is_some_and(|j| j.state == JobState::Started);
            let rendering = s
                .projects
                .get(&request.project_id)
                .is_some_and(|p| p.is_rendering(&request.job_id));
            if !started || !rendering || s.usage.iter().any(|u| u.job_id == request.job_id) {
                return Err(api_error(StatusCode::CONFLICT, "usage not accepted for this job"));
            }
            let usage = RenderUsage::new(user_id, request.job_id.clone(), request.project_id.clone(), request.seconds);
            s.usage.push(usage.clone());
            Ok(usage)
        })
    }
}

/// One attempted segment render.
#[derive(Debug, Clone)]
pub struct RenderRecord {
    pub codec: String,
    pub width: u32,
    pub height: u32,
}

/// Writes placeholder files instead of running external tools.
#[derive(Default)]
pub struct FakeToolkit {
    downloads: AtomicUsize,
    rendered: Mutex<Vec<RenderRecord>>,
    fail_thumbnails: AtomicBool,
    fail_hardware: AtomicBool,
    fail_renders: AtomicBool,
    stall_downloads: AtomicBool,
}

async fn touch(path: &Path, contents: &[u8]) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

impl FakeToolkit {
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn rendered(&self) -> Vec<RenderRecord> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn fail_thumbnails(&self) {
        self.fail_thumbnails.store(true, Ordering::SeqCst);
    }

    pub fn fail_hardware_encodes(&self) {
        self.fail_hardware.store(true, Ordering::SeqCst);
    }

    /// Downloads start but never finish.
    pub fn stall_downloads(&self) {
        self.stall_downloads.store(true, Ordering::SeqCst);
    }

    pub fn fail_renders(&self) {
        self.fail_renders.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaToolkit for FakeToolkit {
    async fn download(&self, _url: &str, output: &Path, max_bytes: u64) -> MediaResult<u64> {
        if max_bytes == 0 {
            return Err(MediaError::QuotaExhausted);
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        touch(output, b"video").await?;
        if self.stall_downloads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(5)
    }

    async fn probe(&self, _path: &Path) -> MediaResult<VideoInfo> {
        Ok(VideoInfo {
            duration: PROBED_SECS,
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: "h264".to_string(),
            has_audio: true,
            size: 4096,
            bitrate: 0,
        })
    }

    async fn thumbnail(&self, _video: &Path, output: &Path, _duration_secs: f64) -> MediaResult<()> {
        if self.fail_thumbnails.load(Ordering::SeqCst) {
            return Err(MediaError::ffmpeg_failed("thumbnail failed", None, Some(1)));
        }
        touch(output, b"jpeg").await
    }

    async fn render_segment(&self, job: &SegmentJob<'_>, encoding: &EncodingConfig) -> MediaResult<()> {
        self.rendered.lock().unwrap().push(RenderRecord {
            codec: encoding.codec.clone(),
            width: job.dimensions.width,
            height: job.dimensions.height,
        });
        if self.fail_renders.load(Ordering::SeqCst)
            || (encoding.use_nvenc && self.fail_hardware.load(Ordering::SeqCst))
        {
            return Err(MediaError::ffmpeg_failed("encode failed", None, Some(1)));
        }
        touch(job.output, b"segment").await
    }

    async fn concat(
        &self,
        segments: &[PathBuf],
        _list_path: &Path,
        output: &Path,
        _format: ContainerFormat,
    ) -> MediaResult<()> {
        if segments.is_empty() {
            return Err(MediaError::internal("nothing to concatenate"));
        }
        touch(output, b"compilation").await
    }
}

pub struct Fixture {
    _dir: TempDir,
    pub api: Arc<FakeCoordinator>,
    pub media: Arc<FakeToolkit>,
    pub ctx: WorkerContext,
}

impl Fixture {
    pub fn log(&self, job_id: &JobId) -> JobLogger {
        JobLogger::new(job_id, JobKind::Download, "u1")
    }

    pub fn ctx_with_encoder(&self, encoder: EncoderStrategy) -> WorkerContext {
        WorkerContext::new(self.ctx.config.clone(), self.api.clone(), self.media.clone()).with_encoder(encoder)
    }
}

/// Fresh media root with a bumper asset, software encoding only.
pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let bumper_path = dir.path().join("system").join("bumper.mp4");
    std::fs::create_dir_all(bumper_path.parent().unwrap()).unwrap();
    std::fs::write(&bumper_path, b"bumper").unwrap();

    let config = WorkerConfig {
        media_root: dir.path().to_path_buf(),
        bumper_path,
        disable_hwaccel: true,
        ..WorkerConfig::default()
    };
    let api = Arc::new(FakeCoordinator::new());
    let media = Arc::new(FakeToolkit::default());
    let ctx = WorkerContext::new(config, api.clone(), media.clone());

    Fixture {
        _dir: dir,
        api,
        media,
        ctx,
    }
}

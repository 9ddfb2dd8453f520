//! Compilation render: resolve the project's timeline, render every segment
//! to a common format, join them losslessly and report the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use reel_media::{move_file, AssetClass, JobEncoder, SegmentJob};
use reel_models::api::{
    CompilationContext, CreateMediaFileRequest, RecordRenderUsageRequest, UpdateProcessingJobRequest,
    UpdateProjectStatusRequest,
};
use reel_models::{
    build_timeline, MediaFile, MediaId, MediaKind, OutputSettings, ProjectStatus, Segment, TimelineSpec,
};
use reel_queue::CompileJob;
use serde_json::json;

use super::{cleanup_work_dir, close_job, discard, make_thumbnail, start_job};
use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// Job progress once inputs are resolved.
const PROGRESS_RESOLVED: u8 = 10;
/// Job progress once every segment is rendered.
const PROGRESS_RENDERED: u8 = 85;

/// A rendered compilation moved into the media root.
#[derive(Debug)]
struct Rendered {
    file_path: String,
    duration_secs: f64,
    size_bytes: u64,
    segments: usize,
    hardware: bool,
}

pub async fn run_compile(ctx: &WorkerContext, job: &CompileJob, log: &JobLogger) -> WorkerResult<()> {
    let user_id = job.user_id.as_str();
    log.log_start(&format!("project {}", job.project_id));

    start_job(ctx, user_id, &job.job_id).await?;
    let context = ctx.api.get_compilation_context(user_id, &job.project_id).await?;
    ensure_rendering(&context, job, log)?;

    let limits = &context.tier_limits;
    let settings = context.project.settings.capped_to(limits.max_resolution);
    if settings.resolution != context.project.settings.resolution {
        log.log_progress(&format!(
            "resolution capped to {} for the {} plan",
            settings.resolution.as_str(),
            limits.tier.as_str()
        ));
    }

    let spec = TimelineSpec::from_project(&context.project, &context.clips, limits.max_clips as usize)?;
    if spec.clips.len() < context.project.clip_ids.len() {
        log.log_warning(&format!(
            "using {} of {} clips (plan limit)",
            spec.clips.len(),
            context.project.clip_ids.len()
        ));
    }

    let decorative = fetch_decorative(ctx, user_id, &spec).await?;
    let segments = build_timeline(&spec, &mut rand::rng())?;
    let inputs = resolve_inputs(ctx, &context, &decorative, &segments).await?;
    ctx.report_progress(user_id, &job.job_id, PROGRESS_RESOLVED).await;

    let work_dir = ctx.config.work_dir(job.job_id.as_str());
    let result = render(ctx, job, &settings, &segments, &inputs, &work_dir, log).await;
    cleanup_work_dir(&work_dir).await;
    let rendered = result?;

    // The owner may have cancelled or recompiled while segments rendered.
    let still_rendering = match ctx.api.get_compilation_context(user_id, &job.project_id).await {
        Ok(latest) => ensure_rendering(&latest, job, log),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = still_rendering {
        discard(ctx, &rendered.file_path, None).await;
        return Err(e);
    }

    let output_media_id = register(ctx, job, &rendered, log).await?;

    close_job(
        ctx,
        user_id,
        &job.job_id,
        UpdateProcessingJobRequest::succeeded(json!({
            "output_media_id": output_media_id,
            "duration_secs": rendered.duration_secs,
            "segments": rendered.segments,
            "encoder": if rendered.hardware { "h264_nvenc" } else { "libx264" },
        })),
    )
    .await?;

    log.log_completion(&format!(
        "{} segments, {:.1}s, media {}",
        rendered.segments, rendered.duration_secs, output_media_id
    ));
    Ok(())
}

/// A project that left `processing`, or is now rendered by a newer compile,
/// cancels this job.
fn ensure_rendering(context: &CompilationContext, job: &CompileJob, log: &JobLogger) -> WorkerResult<()> {
    let project = &context.project;
    if project.is_rendering(&job.job_id) {
        return Ok(());
    }
    if project.status == ProjectStatus::Processing {
        log.log_warning("project is rendered by a newer compile, not rendering");
    } else {
        log.log_warning(&format!("project is {}, not rendering", project.status));
    }
    Err(WorkerError::Cancelled)
}

/// Intro, outro and transition media in a single batch request.
async fn fetch_decorative(
    ctx: &WorkerContext,
    user_id: &str,
    spec: &TimelineSpec,
) -> WorkerResult<HashMap<MediaId, MediaFile>> {
    let mut ids: Vec<MediaId> = spec
        .intro
        .iter()
        .chain(spec.transitions.iter())
        .chain(spec.outro.iter())
        .cloned()
        .collect();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let batch = ctx.api.get_media_batch(user_id, &ids).await?;
    if !batch.missing.is_empty() {
        let missing: Vec<&str> = batch.missing.iter().map(MediaId::as_str).collect();
        return Err(WorkerError::processing_failed(format!(
            "decorative media not found: {}",
            missing.join(", ")
        )));
    }
    Ok(batch.media.into_iter().map(|m| (m.id.clone(), m)).collect())
}

/// Absolute input path for every segment.
async fn resolve_inputs(
    ctx: &WorkerContext,
    context: &CompilationContext,
    decorative: &HashMap<MediaId, MediaFile>,
    segments: &[Segment],
) -> WorkerResult<Vec<PathBuf>> {
    if segments.iter().any(Segment::is_bumper)
        && !tokio::fs::try_exists(&ctx.config.bumper_path).await.unwrap_or(false)
    {
        return Err(WorkerError::config_error(format!(
            "bumper asset {} not found",
            ctx.config.bumper_path.display()
        )));
    }

    segments
        .iter()
        .map(|segment| {
            let media = match segment {
                Segment::Bumper => return Ok(ctx.config.bumper_path.clone()),
                Segment::Clip { media_id, .. } => context.clip_media(media_id),
                Segment::Intro { media_id } | Segment::Transition { media_id } | Segment::Outro { media_id } => {
                    decorative.get(media_id)
                }
            };
            media
                .map(|m| ctx.config.media_path(&m.file_path))
                .ok_or_else(|| {
                    WorkerError::processing_failed(format!("no media for {} segment", segment.label()))
                })
        })
        .collect()
}

/// Render segments one at a time, concatenate, and move the result into the
/// media root.
async fn render(
    ctx: &WorkerContext,
    job: &CompileJob,
    settings: &OutputSettings,
    segments: &[Segment],
    inputs: &[PathBuf],
    work_dir: &Path,
    log: &JobLogger,
) -> WorkerResult<Rendered> {
    let user_id = job.user_id.as_str();
    tokio::fs::create_dir_all(work_dir).await?;

    let mut encoder = ctx.encoder.for_job().await;
    let dimensions = settings.dimensions();
    let count = segments.len();
    let mut outputs = Vec::with_capacity(count);

    for (index, (segment, input)) in segments.iter().zip(inputs).enumerate() {
        let output = work_dir.join(format!("seg-{:03}.mp4", index));
        let info = ctx.media.probe(input).await?;
        let segment_job = SegmentJob {
            input,
            output: &output,
            class: AssetClass::from(segment),
            dimensions,
            frame_rate: settings.frame_rate,
            audio_profile: settings.audio_profile,
            has_audio: info.has_audio,
        };

        let started = Instant::now();
        render_segment(ctx, &segment_job, &mut encoder, log).await?;
        metrics::histogram!("reel_segment_render_seconds", "class" => segment.label())
            .record(started.elapsed().as_secs_f64());

        outputs.push(output);
        ctx.report_progress(user_id, &job.job_id, segment_progress(index + 1, count)).await;
    }

    let extension = settings.format.extension();
    let joined = work_dir.join(format!("output.{}", extension));
    ctx.media
        .concat(&outputs, &work_dir.join("segments.txt"), &joined, settings.format)
        .await?;
    let info = ctx.media.probe(&joined).await?;

    let file_path = format!(
        "{}/{}/{}.{}",
        user_id,
        MediaKind::Compilation.directory(),
        job.job_id,
        extension
    );
    move_file(&joined, ctx.config.media_path(&file_path)).await?;

    Ok(Rendered {
        file_path,
        duration_secs: info.duration,
        size_bytes: info.size,
        segments: count,
        hardware: encoder.is_hardware(),
    })
}

/// Render one segment, retrying once in software when a hardware encode
/// fails. The job stays on software afterwards.
async fn render_segment(
    ctx: &WorkerContext,
    segment: &SegmentJob<'_>,
    encoder: &mut JobEncoder,
    log: &JobLogger,
) -> WorkerResult<()> {
    let err = match ctx.media.render_segment(segment, &encoder.config()).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if !encoder.downgrade() {
        return Err(err.into());
    }

    log.log_warning(&format!(
        "hardware encode of {} failed, switching to libx264: {}",
        segment.output.display(),
        err.detail()
    ));
    ctx.media.render_segment(segment, &encoder.config()).await?;
    Ok(())
}

fn segment_progress(done: usize, count: usize) -> u8 {
    let span = (PROGRESS_RENDERED - PROGRESS_RESOLVED) as usize;
    PROGRESS_RESOLVED + (span * done / count.max(1)) as u8
}

/// Register the output, record usage, and complete the project. Returns the
/// output media id.
///
/// On failure the stored output is removed again, along with its media
/// record when one was created.
async fn register(
    ctx: &WorkerContext,
    job: &CompileJob,
    rendered: &Rendered,
    log: &JobLogger,
) -> WorkerResult<MediaId> {
    let user_id = job.user_id.as_str();
    let stored = ctx.config.media_path(&rendered.file_path);
    let thumbnail_path = make_thumbnail(
        ctx,
        &stored,
        user_id,
        job.job_id.as_str(),
        rendered.duration_secs,
        log,
    )
    .await;

    let request = CreateMediaFileRequest {
        user_id: user_id.to_string(),
        kind: MediaKind::Compilation,
        file_path: rendered.file_path.clone(),
        duration_secs: rendered.duration_secs,
        size_bytes: rendered.size_bytes,
        thumbnail_path: thumbnail_path.clone(),
        source_url: None,
    };
    let media = match ctx.api.create_media_file(&request).await {
        Ok(response) => response.media,
        Err(e) => {
            discard(ctx, &rendered.file_path, thumbnail_path.as_deref()).await;
            return Err(e.into());
        }
    };

    if let Err(e) = complete_project(ctx, job, rendered, &media.id, log).await {
        if let Err(delete_err) = ctx.api.delete_media_file(user_id, &media.id).await {
            log.log_warning(&format!("could not remove media record {}: {}", media.id, delete_err));
        }
        discard(ctx, &rendered.file_path, thumbnail_path.as_deref()).await;
        return Err(e);
    }

    Ok(media.id)
}

async fn complete_project(
    ctx: &WorkerContext,
    job: &CompileJob,
    rendered: &Rendered,
    media_id: &MediaId,
    log: &JobLogger,
) -> WorkerResult<()> {
    let user_id = job.user_id.as_str();
    let usage = RecordRenderUsageRequest {
        job_id: job.job_id.clone(),
        project_id: job.project_id.clone(),
        seconds: rendered.duration_secs.ceil() as u64,
    };
    match ctx.api.record_render_usage(user_id, &usage).await {
        Ok(_) => {}
        Err(e) if e.is_conflict() => log.log_progress("render usage was not recorded again"),
        Err(e) => return Err(e.into()),
    }

    let request = UpdateProjectStatusRequest {
        status: ProjectStatus::Completed,
        job_id: Some(job.job_id.clone()),
        error: None,
        output_media_id: Some(media_id.clone()),
    };
    match ctx.api.update_project_status(user_id, &job.project_id, &request).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_conflict() => {
            log.log_warning("project left processing during the render");
            Err(WorkerError::Cancelled)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::report_failure;
    use crate::tasks::testing::{fixture, Call, Fixture};
    use reel_media::EncoderStrategy;
    use reel_models::{JobId, JobState, PlanTier, ProjectId, ResolutionPreset, TierLimits};
    use reel_queue::QueueJob;

    /// A compile job the project is waiting on.
    fn compile_job(f: &Fixture, project_id: &ProjectId) -> CompileJob {
        let job = CompileJob::new(JobId::new(), "u1", project_id.clone());
        f.api.set_active_job(project_id, &job.job_id);
        job
    }

    fn compilation_path(f: &Fixture, job: &CompileJob) -> PathBuf {
        f.ctx
            .config
            .media_path(&format!("u1/{}/{}.mp4", MediaKind::Compilation.directory(), job.job_id))
    }

    #[test]
    fn test_segment_progress_spans_render_range() {
        assert_eq!(segment_progress(0, 4), PROGRESS_RESOLVED);
        assert_eq!(segment_progress(4, 4), PROGRESS_RENDERED);
        assert!(segment_progress(2, 4) > PROGRESS_RESOLVED);
    }

    #[tokio::test]
    async fn test_compile_renders_every_segment_and_completes() {
        let f = fixture();
        let project = f.api.add_project("u1", 3, true);
        let job = compile_job(&f, &project.id);

        run_compile(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap();

        // intro, bumper, then 3 clips with a bumper between each
        assert_eq!(f.media.rendered().len(), 7);
        let project = f.api.project(&project.id);
        assert_eq!(project.status, ProjectStatus::Completed);
        let output = f.api.media(project.output_media_id.as_ref().unwrap());
        assert_eq!(output.kind, MediaKind::Compilation);
        assert!(f.ctx.config.media_path(&output.file_path).exists());

        let usage = f.api.render_usage();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].seconds, 61);
        assert_eq!(f.api.job_outcome(&job.job_id).unwrap().0, JobState::Succeeded);

        let batches = f.api.calls().iter().filter(|c| **c == Call::GetMediaBatch).count();
        assert_eq!(batches, 1);
    }

    #[tokio::test]
    async fn test_cancelled_project_is_left_untouched() {
        let f = fixture();
        let project = f.api.add_project("u1", 2, false);
        f.api.set_project_status(&project.id, ProjectStatus::Failed);
        let job = compile_job(&f, &project.id);

        let err = run_compile(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap_err();
        assert!(err.is_cancelled());
        report_failure(&f.ctx, &QueueJob::Compile(job.clone()), &err).await.unwrap();

        assert!(f.media.rendered().is_empty());
        assert_eq!(f.api.project(&project.id).status, ProjectStatus::Failed);
        assert!(!f.api.calls().contains(&Call::UpdateProjectStatus));
        let (state, _) = f.api.job_outcome(&job.job_id).unwrap();
        assert_eq!(state, JobState::Failed);
        assert_eq!(f.api.job_error(&job.job_id).as_deref(), Some("project cancelled"));
    }

    #[tokio::test]
    async fn test_tier_limits_cap_clips_and_resolution() {
        let f = fixture();
        let project = f.api.add_project("u1", 4, false);
        f.api.set_tier_limits(TierLimits {
            max_clips: 2,
            max_resolution: ResolutionPreset::P720,
            ..TierLimits::for_tier(PlanTier::Free)
        });
        let job = compile_job(&f, &project.id);

        run_compile(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap();

        let rendered = f.media.rendered();
        // bumper, clip, bumper, clip
        assert_eq!(rendered.len(), 4);
        assert!(rendered.iter().all(|r| r.height.min(r.width) == 720));
    }

    #[tokio::test]
    async fn test_hardware_failure_falls_back_for_rest_of_job() {
        let f = fixture();
        f.media.fail_hardware_encodes();
        let ctx = f.ctx_with_encoder(EncoderStrategy::with_detected(true));
        let project = f.api.add_project("u1", 2, false);
        let job = compile_job(&f, &project.id);

        run_compile(&ctx, &job, &f.log(&job.job_id)).await.unwrap();

        let codecs: Vec<String> = f.media.rendered().iter().map(|r| r.codec.clone()).collect();
        assert_eq!(codecs.first().map(String::as_str), Some("h264_nvenc"));
        assert!(codecs[1..].iter().all(|c| c == "libx264"));
        assert_eq!(codecs.iter().filter(|c| *c == "libx264").count(), 4);
        assert_eq!(f.api.job_outcome(&job.job_id).unwrap().1["encoder"], "libx264");
    }

    #[tokio::test]
    async fn test_render_failure_reports_without_usage() {
        let f = fixture();
        f.media.fail_renders();
        let project = f.api.add_project("u1", 2, false);
        let job = compile_job(&f, &project.id);

        let err = run_compile(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap_err();
        report_failure(&f.ctx, &QueueJob::Compile(job.clone()), &err).await.unwrap();

        let project = f.api.project(&project.id);
        assert_eq!(project.status, ProjectStatus::Failed);
        assert!(project.error.is_some());
        assert!(f.api.render_usage().is_empty());
        assert_eq!(f.api.job_outcome(&job.job_id).unwrap().0, JobState::Failed);
        assert!(!f.ctx.config.work_dir(job.job_id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_missing_decorative_media_fails() {
        let f = fixture();
        let project = f.api.add_project("u1", 1, true);
        f.api.forget_media(project.intro_id.as_ref().unwrap());
        let job = compile_job(&f, &project.id);

        let err = run_compile(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap_err();
        assert!(err.to_string().contains("decorative media not found"));
        assert!(f.media.rendered().is_empty());
    }

    #[tokio::test]
    async fn test_superseded_job_does_not_render() {
        let f = fixture();
        let project = f.api.add_project("u1", 2, false);
        let stale = compile_job(&f, &project.id);
        compile_job(&f, &project.id);

        let err = run_compile(&f.ctx, &stale, &f.log(&stale.job_id)).await.unwrap_err();
        assert!(err.is_cancelled());
        report_failure(&f.ctx, &QueueJob::Compile(stale.clone()), &err).await.unwrap();

        assert!(f.media.rendered().is_empty());
        assert_eq!(f.api.project(&project.id).status, ProjectStatus::Processing);
        assert!(f.api.render_usage().is_empty());
        assert_eq!(f.api.job_outcome(&stale.job_id).unwrap().0, JobState::Failed);
    }

    #[tokio::test]
    async fn test_failed_registration_removes_output() {
        let f = fixture();
        f.api.fail(Call::CreateMediaFile);
        let project = f.api.add_project("u1", 2, false);
        let job = compile_job(&f, &project.id);

        run_compile(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap_err();

        assert!(!compilation_path(&f, &job).exists());
        let thumbnail = f.ctx.config.media_path(&format!("u1/thumbnails/{}.jpg", job.job_id));
        assert!(!thumbnail.exists());
        assert!(!f.api.calls().contains(&Call::RecordRenderUsage));
    }

    #[tokio::test]
    async fn test_failed_completion_removes_output_and_record() {
        let f = fixture();
        f.api.fail(Call::UpdateProjectStatus);
        let project = f.api.add_project("u1", 2, false);
        let job = compile_job(&f, &project.id);

        run_compile(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap_err();

        assert!(!compilation_path(&f, &job).exists());
        assert_eq!(f.api.media_count(MediaKind::Compilation), 0);
        let project = f.api.project(&project.id);
        assert!(project.output_media_id.is_none());
        assert_eq!(project.status, ProjectStatus::Processing);
    }
}

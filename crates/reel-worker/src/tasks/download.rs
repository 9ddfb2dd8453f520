//! Clip download: reuse an earlier download of the same source, or fetch it
//! within the user's remaining storage.

use std::path::Path;

use reel_media::move_file;
use reel_models::api::{AttachThumbnailRequest, CreateMediaFileRequest, UpdateClipStatusRequest, UpdateProcessingJobRequest};
use reel_models::{format_bytes, Clip, ClipStatus, MediaFile, MediaId, MediaKind};
use reel_queue::DownloadJob;
use serde_json::json;

use super::{cleanup_work_dir, close_job, discard, make_thumbnail, start_job};
use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

pub async fn run_download(ctx: &WorkerContext, job: &DownloadJob, log: &JobLogger) -> WorkerResult<()> {
    let user_id = job.user_id.as_str();
    log.log_start(&format!("clip {}", job.clip_id));

    start_job(ctx, user_id, &job.job_id).await?;
    let clip = ctx.api.get_clip(user_id, &job.clip_id).await?;
    set_clip_status(ctx, &clip, ClipStatus::Downloading, None).await?;

    if let Some(media) = ctx.api.find_reusable_media(user_id, &clip.source_url).await? {
        log.log_progress(&format!("reusing media {} for {}", media.id, clip.source_url));
        if media.thumbnail_path.is_none() {
            restore_thumbnail(ctx, &media, log).await;
        }
        set_clip_status(ctx, &clip, ClipStatus::Ready, Some(media.id.clone())).await?;
        close_job(
            ctx,
            user_id,
            &job.job_id,
            UpdateProcessingJobRequest::succeeded(json!({ "reused": true, "media_id": media.id })),
        )
        .await?;
        log.log_completion("reused existing media");
        return Ok(());
    }

    let quota = ctx.api.get_user_quota(user_id).await?;
    let ceiling = quota.storage.remaining_bytes;
    if ceiling == 0 {
        return Err(WorkerError::quota_exceeded(format!(
            "no storage left ({} of {} used)",
            format_bytes(quota.storage.used_bytes),
            format_bytes(quota.storage.limit_bytes)
        )));
    }
    ctx.report_progress(user_id, &job.job_id, 10).await;

    let work_dir = ctx.config.work_dir(job.job_id.as_str());
    let result = fetch_and_register(ctx, job, &clip, ceiling, &work_dir, log).await;
    cleanup_work_dir(&work_dir).await;
    let (media, reused) = result?;

    set_clip_status(ctx, &clip, ClipStatus::Ready, Some(media.id.clone())).await?;
    close_job(
        ctx,
        user_id,
        &job.job_id,
        UpdateProcessingJobRequest::succeeded(json!({
            "reused": reused,
            "media_id": media.id,
            "size_bytes": media.size_bytes,
            "duration_secs": media.duration_secs,
        })),
    )
    .await?;

    log.log_completion(&format!(
        "media {} ({}, {:.1}s)",
        media.id,
        format_bytes(media.size_bytes),
        media.duration_secs
    ));
    Ok(())
}

async fn set_clip_status(
    ctx: &WorkerContext,
    clip: &Clip,
    status: ClipStatus,
    media_id: Option<MediaId>,
) -> WorkerResult<()> {
    let request = UpdateClipStatusRequest {
        status,
        media_id,
        error: None,
    };
    ctx.api.update_clip_status(&clip.user_id, &clip.id, &request).await?;
    Ok(())
}

/// Regenerate the thumbnail of reused media that never got one.
async fn restore_thumbnail(ctx: &WorkerContext, media: &MediaFile, log: &JobLogger) {
    let video = ctx.config.media_path(&media.file_path);
    let Some(thumbnail_path) = make_thumbnail(
        ctx,
        &video,
        &media.user_id,
        media.id.as_str(),
        media.duration_secs,
        log,
    )
    .await
    else {
        return;
    };

    let request = AttachThumbnailRequest { thumbnail_path };
    if let Err(e) = ctx
        .api
        .attach_media_thumbnail(&media.user_id, &media.id, &request)
        .await
    {
        log.log_warning(&format!("failed to attach thumbnail to {}: {}", media.id, e));
    }
}

/// Download, store and register the clip. Returns the media record the
/// Coordinator kept and whether it predates this download.
async fn fetch_and_register(
    ctx: &WorkerContext,
    job: &DownloadJob,
    clip: &Clip,
    ceiling: u64,
    work_dir: &Path,
    log: &JobLogger,
) -> WorkerResult<(MediaFile, bool)> {
    let user_id = job.user_id.as_str();
    tokio::fs::create_dir_all(work_dir).await?;

    let download_path = work_dir.join("source.mp4");
    let size_bytes = ctx.media.download(&clip.source_url, &download_path, ceiling).await?;
    log.log_progress(&format!("downloaded {}", format_bytes(size_bytes)));
    ctx.report_progress(user_id, &job.job_id, 60).await;

    let info = ctx.media.probe(&download_path).await?;

    let file_path = format!("{}/{}/{}.mp4", user_id, MediaKind::Clip.directory(), job.job_id);
    let stored = ctx.config.media_path(&file_path);
    move_file(&download_path, &stored).await?;

    let thumbnail_path = make_thumbnail(ctx, &stored, user_id, job.job_id.as_str(), info.duration, log).await;
    ctx.report_progress(user_id, &job.job_id, 90).await;

    let request = CreateMediaFileRequest {
        user_id: user_id.to_string(),
        kind: MediaKind::Clip,
        file_path: file_path.clone(),
        duration_secs: info.duration,
        size_bytes,
        thumbnail_path: thumbnail_path.clone(),
        source_url: Some(clip.source_url.clone()),
    };

    let response = match ctx.api.create_media_file(&request).await {
        Ok(response) => response,
        Err(e) => {
            discard(ctx, &file_path, thumbnail_path.as_deref()).await;
            return Err(e.into());
        }
    };

    // Another download of the same source registered first; keep theirs.
    if response.media.file_path != file_path {
        log.log_progress(&format!("source already stored as {}", response.media.id));
        discard(ctx, &file_path, thumbnail_path.as_deref()).await;
    }

    Ok((response.media, response.reused))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::report_failure;
    use crate::tasks::testing::{fixture, Call};
    use reel_models::{ClipId, JobId, JobState};
    use reel_queue::QueueJob;

    fn download_job(clip: &Clip) -> DownloadJob {
        DownloadJob::new(JobId::new(), clip.user_id.clone(), clip.id.clone())
    }

    #[tokio::test]
    async fn test_reuse_hit_skips_download() {
        let f = fixture();
        let clip = f.api.add_clip("u1", "https://youtu.be/dQw4w9WgXcQ");
        let existing = f.api.add_media("u1", MediaKind::Clip, 42.0, true);
        f.api.set_reusable(existing.clone());
        let job = download_job(&clip);

        run_download(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap();

        assert_eq!(f.media.downloads(), 0);
        let clip = f.api.clip(&clip.id);
        assert_eq!(clip.status, ClipStatus::Ready);
        assert_eq!(clip.media_id, Some(existing.id.clone()));
        let (state, result) = f.api.job_outcome(&job.job_id).unwrap();
        assert_eq!(state, JobState::Succeeded);
        assert_eq!(result["reused"], true);
        assert!(!f.api.calls().contains(&Call::GetUserQuota));
    }

    #[tokio::test]
    async fn test_reused_media_without_thumbnail_gets_one() {
        let f = fixture();
        let clip = f.api.add_clip("u1", "https://clips.twitch.tv/Slug");
        let existing = f.api.add_media("u1", MediaKind::Clip, 12.0, false);
        f.api.set_reusable(existing.clone());
        let job = download_job(&clip);

        run_download(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap();

        assert_eq!(
            f.api.media(&existing.id).thumbnail_path,
            Some(format!("u1/thumbnails/{}.jpg", existing.id))
        );
    }

    #[tokio::test]
    async fn test_fresh_download_is_stored_and_registered() {
        let f = fixture();
        let clip = f.api.add_clip("u1", "https://clips.twitch.tv/Fresh");
        let job = download_job(&clip);

        run_download(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap();

        assert_eq!(f.media.downloads(), 1);
        let clip = f.api.clip(&clip.id);
        assert_eq!(clip.status, ClipStatus::Ready);
        let media = f.api.media(clip.media_id.as_ref().unwrap());
        assert_eq!(media.file_path, format!("u1/clips/{}.mp4", job.job_id));
        assert!(media.thumbnail_path.is_some());
        assert!(f.ctx.config.media_path(&media.file_path).exists());
        assert!(!f.ctx.config.work_dir(job.job_id.as_str()).exists());
        assert_eq!(f.api.job_outcome(&job.job_id).unwrap().0, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_zero_ceiling_fails_before_network() {
        let f = fixture();
        f.api.set_storage_remaining(0);
        let clip = f.api.add_clip("u1", "https://clips.twitch.tv/Big");
        let job = download_job(&clip);

        let err = run_download(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap_err();
        assert!(matches!(err, WorkerError::QuotaExceeded(_)));
        assert_eq!(f.media.downloads(), 0);

        report_failure(&f.ctx, &QueueJob::Download(job.clone()), &err).await.unwrap();
        let clip = f.api.clip(&clip.id);
        assert_eq!(clip.status, ClipStatus::Failed);
        assert!(clip.error.unwrap().contains("quota"));
        assert_eq!(f.api.job_outcome(&job.job_id).unwrap().0, JobState::Failed);
    }

    #[tokio::test]
    async fn test_thumbnail_failure_is_not_fatal() {
        let f = fixture();
        f.media.fail_thumbnails();
        let clip = f.api.add_clip("u1", "https://clips.twitch.tv/NoThumb");
        let job = download_job(&clip);

        run_download(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap();

        let clip = f.api.clip(&clip.id);
        let media = f.api.media(clip.media_id.as_ref().unwrap());
        assert!(media.thumbnail_path.is_none());
        assert!(!media.is_ready());
    }

    #[tokio::test]
    async fn test_duplicate_registration_discards_local_copy() {
        let f = fixture();
        let clip = f.api.add_clip("u1", "https://clips.twitch.tv/Race");
        let winner = f.api.add_media("u1", MediaKind::Clip, 30.0, true);
        f.api.register_source_winner(winner.clone());
        let job = download_job(&clip);

        run_download(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap();

        assert_eq!(f.api.clip(&clip.id).media_id, Some(winner.id));
        let ours = f.ctx.config.media_path(format!("u1/clips/{}.mp4", job.job_id));
        assert!(!ours.exists());
    }

    #[tokio::test]
    async fn test_redelivered_finished_job_is_not_rerun() {
        let f = fixture();
        let clip = f.api.add_clip("u1", "https://clips.twitch.tv/Done");
        let job = download_job(&clip);
        f.api.finish_job(&job.job_id);

        let err = run_download(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap_err();
        assert!(err.is_already_finished());
        assert_eq!(f.media.downloads(), 0);
    }

    #[tokio::test]
    async fn test_unknown_clip_fails() {
        let f = fixture();
        let job = DownloadJob::new(JobId::new(), "u1", ClipId::from_string("missing"));
        let err = run_download(&f.ctx, &job, &f.log(&job.job_id)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Client(ref e) if e.is_not_found()));
    }
}

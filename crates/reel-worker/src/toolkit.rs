//! External media tools behind one seam, so tasks can run against fakes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reel_media::{
    concat_segments, download_video, generate_thumbnail, normalize_segment, probe_video,
    FfmpegRunner, MediaResult, SegmentJob, VideoInfo,
};
use reel_models::{ContainerFormat, EncodingConfig};

#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Fetch `url` into `output`, refusing anything over `max_bytes`.
    /// Returns the file size.
    async fn download(&self, url: &str, output: &Path, max_bytes: u64) -> MediaResult<u64>;

    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    async fn thumbnail(&self, video: &Path, output: &Path, duration_secs: f64) -> MediaResult<()>;

    async fn render_segment(&self, job: &SegmentJob<'_>, encoding: &EncodingConfig) -> MediaResult<()>;

    async fn concat(
        &self,
        segments: &[PathBuf],
        list_path: &Path,
        output: &Path,
        format: ContainerFormat,
    ) -> MediaResult<()>;
}

/// `yt-dlp`, `ffprobe` and `ffmpeg` on the host.
#[derive(Debug, Clone, Default)]
pub struct FfmpegToolkit {
    runner: FfmpegRunner,
}

impl FfmpegToolkit {
    pub fn new(segment_timeout_secs: u64) -> Self {
        Self {
            runner: FfmpegRunner::new().with_timeout(segment_timeout_secs),
        }
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn download(&self, url: &str, output: &Path, max_bytes: u64) -> MediaResult<u64> {
        download_video(url, output, max_bytes).await
    }

    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe_video(path).await
    }

    async fn thumbnail(&self, video: &Path, output: &Path, duration_secs: f64) -> MediaResult<()> {
        generate_thumbnail(video, output, duration_secs).await
    }

    async fn render_segment(&self, job: &SegmentJob<'_>, encoding: &EncodingConfig) -> MediaResult<()> {
        let output = job.output.display().to_string();
        normalize_segment(job, encoding, &self.runner, move |p| {
            tracing::trace!(segment = %output, out_time_ms = p.out_time_ms, "Segment progress");
        })
        .await
    }

    async fn concat(
        &self,
        segments: &[PathBuf],
        list_path: &Path,
        output: &Path,
        format: ContainerFormat,
    ) -> MediaResult<()> {
        concat_segments(segments, list_path, output, format, &self.runner).await
    }
}

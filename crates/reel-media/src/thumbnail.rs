//! Thumbnail generation.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use reel_models::encoding::{THUMBNAIL_SCALE_WIDTH, THUMBNAIL_TIMESTAMP};

/// Seek position for the thumbnail frame.
///
/// Clips shorter than two seconds are grabbed at their midpoint so the seek
/// never lands past the end.
pub fn thumbnail_timestamp(duration_secs: f64) -> String {
    if duration_secs >= 2.0 || duration_secs <= 0.0 {
        THUMBNAIL_TIMESTAMP.to_string()
    } else {
        format!("{:.3}", duration_secs / 2.0)
    }
}

/// Generate a JPEG thumbnail from a video file.
pub async fn generate_thumbnail(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    duration_secs: f64,
) -> MediaResult<()> {
    let video_path = video_path.as_ref();
    let output_path = output_path.as_ref();

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let cmd = FfmpegCommand::new(video_path, output_path)
        .input_arg("-ss")
        .input_arg(thumbnail_timestamp(duration_secs))
        .single_frame()
        .video_filter(format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH))
        .output_args(["-q:v", "3"])
        .log_level("error");

    FfmpegRunner::new().with_timeout(60).run(&cmd).await
}

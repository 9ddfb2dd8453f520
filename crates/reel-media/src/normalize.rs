//! Segment normalization.
//!
//! Every segment is re-encoded to the same frame size, SAR, frame rate, pixel
//! format, codec and audio layout so the segments can later be joined with
//! the concat demuxer without another encode.

use std::path::Path;

use reel_models::encoding::{AUDIO_SAMPLE_RATE, CLIP_PORTRAIT_ZOOM};
use reel_models::{AudioProfile, Dimensions, EncodingConfig, Segment};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::progress::FfmpegProgress;

/// MP4 track timescale shared by all segments.
const VIDEO_TRACK_TIMESCALE: &str = "90000";

/// How a segment is fitted into the output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    /// User clips: keep the whole picture where possible.
    Clip,
    /// Bumpers, transitions, intro and outro: always fill the frame.
    Decorative,
}

impl From<&Segment> for AssetClass {
    fn from(segment: &Segment) -> Self {
        match segment {
            Segment::Clip { .. } => AssetClass::Clip,
            _ => AssetClass::Decorative,
        }
    }
}

/// One segment render.
#[derive(Debug, Clone)]
pub struct SegmentJob<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub class: AssetClass,
    pub dimensions: Dimensions,
    pub frame_rate: u32,
    pub audio_profile: AudioProfile,
    /// Whether the input has an audio stream; silent inputs get one generated.
    pub has_audio: bool,
}

fn even(value: f64) -> u32 {
    ((value / 2.0).round() as u32).max(1) * 2
}

/// Video filter chain for a segment.
pub fn video_filter(class: AssetClass, dims: Dimensions, frame_rate: u32) -> String {
    let (w, h) = (dims.width, dims.height);
    let fit = match class {
        AssetClass::Clip if dims.is_portrait() => {
            let zoomed = even(w as f64 * CLIP_PORTRAIT_ZOOM);
            format!(
                "scale={zoomed}:-2,crop=min(iw\\,{w}):min(ih\\,{h}),pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black"
            )
        }
        AssetClass::Clip => format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease:force_divisible_by=2,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black"
        ),
        AssetClass::Decorative => {
            format!("scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}")
        }
    };
    format!("{fit},setsar=1,fps={frame_rate},format=yuv420p")
}

/// Audio filter chain for a segment.
///
/// Generated silence skips loudness normalization.
pub fn audio_filter(profile: AudioProfile, generated_silence: bool) -> String {
    let mut filter = format!(
        "aresample={AUDIO_SAMPLE_RATE},aformat=sample_fmts=fltp:channel_layouts=stereo"
    );
    if !generated_silence {
        if let Some(loudnorm) = profile.filter() {
            filter.push(',');
            filter.push_str(loudnorm);
        }
    }
    filter
}

/// Build the FFmpeg command for one segment.
pub fn build_segment_command(job: &SegmentJob<'_>, encoding: &EncodingConfig) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(job.input, job.output);

    if job.has_audio {
        cmd = cmd.map("0:v:0").map("0:a:0");
    } else {
        cmd = cmd
            .extra_lavfi_input(format!(
                "anullsrc=channel_layout=stereo:sample_rate={}",
                AUDIO_SAMPLE_RATE
            ))
            .map("0:v:0")
            .map("1:a:0")
            .output_arg("-shortest");
    }

    cmd.video_filter(video_filter(job.class, job.dimensions, job.frame_rate))
        .audio_filter(audio_filter(job.audio_profile, !job.has_audio))
        .output_args(encoding.to_ffmpeg_args())
        .output_args(["-video_track_timescale", VIDEO_TRACK_TIMESCALE])
        .output_args(["-map_metadata", "-1", "-sn", "-dn"])
}

/// Render one normalized segment.
pub async fn normalize_segment<F>(
    job: &SegmentJob<'_>,
    encoding: &EncodingConfig,
    runner: &FfmpegRunner,
    on_progress: F,
) -> MediaResult<()>
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    if let Some(parent) = job.output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let cmd = build_segment_command(job, encoding);
    runner.run_with_progress(&cmd, on_progress).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{ClipId, MediaId};

    const PORTRAIT: Dimensions = Dimensions {
        width: 1080,
        height: 1920,
    };
    const LANDSCAPE: Dimensions = Dimensions {
        width: 1920,
        height: 1080,
    };

    fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn test_portrait_clip_zooms_crops_and_pads() {
        let filter = video_filter(AssetClass::Clip, PORTRAIT, 30);
        assert!(filter.starts_with("scale=1242:-2,"), "{}", filter);
        assert!(filter.contains("crop=min(iw\\,1080):min(ih\\,1920)"));
        assert!(filter.contains("pad=1080:1920:(ow-iw)/2:(oh-ih)/2:color=black"));
        assert!(filter.ends_with("setsar=1,fps=30,format=yuv420p"));
    }

    #[test]
    fn test_landscape_clip_fits_and_pads() {
        let filter = video_filter(AssetClass::Clip, LANDSCAPE, 60);
        assert!(filter.contains("force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=1920:1080"));
        assert!(filter.contains("fps=60"));
    }

    #[test]
    fn test_decorative_fills_and_crops() {
        for dims in [PORTRAIT, LANDSCAPE] {
            let filter = video_filter(AssetClass::Decorative, dims, 30);
            assert!(filter.contains("force_original_aspect_ratio=increase"));
            assert!(filter.contains(&format!("crop={}:{}", dims.width, dims.height)));
            assert!(!filter.contains("pad="));
        }
    }

    #[test]
    fn test_audio_profile_applied_except_to_silence() {
        assert!(audio_filter(AudioProfile::Streaming, false).contains("loudnorm=I=-16"));
        assert!(audio_filter(AudioProfile::Broadcast, false).contains("loudnorm=I=-23"));
        assert!(!audio_filter(AudioProfile::Streaming, true).contains("loudnorm"));
        assert!(!audio_filter(AudioProfile::None, false).contains("loudnorm"));
        assert!(audio_filter(AudioProfile::None, false).starts_with("aresample=48000"));
    }

    #[test]
    fn test_silent_input_gets_generated_track() {
        let input = Path::new("bumper.mp4");
        let output = Path::new("seg-000.mp4");
        let job = SegmentJob {
            input,
            output,
            class: AssetClass::Decorative,
            dimensions: LANDSCAPE,
            frame_rate: 30,
            audio_profile: AudioProfile::Streaming,
            has_audio: false,
        };
        let args = build_segment_command(&job, &EncodingConfig::software()).build_args();
        assert_eq!(value_after(&args, "-map"), vec!["0:v:0", "1:a:0"]);
        assert!(args.contains(&"-shortest".to_string()));
        assert!(value_after(&args, "-i")[1].starts_with("anullsrc"));

        let job = SegmentJob { has_audio: true, ..job };
        let args = build_segment_command(&job, &EncodingConfig::software()).build_args();
        assert_eq!(value_after(&args, "-map"), vec!["0:v:0", "0:a:0"]);
        assert_eq!(value_after(&args, "-i").len(), 1);
    }

    #[test]
    fn test_asset_class_from_segment() {
        let clip = Segment::Clip {
            clip_id: ClipId::from_string("c"),
            media_id: MediaId::from_string("m"),
        };
        assert_eq!(AssetClass::from(&clip), AssetClass::Clip);
        assert_eq!(AssetClass::from(&Segment::Bumper), AssetClass::Decorative);
    }
}

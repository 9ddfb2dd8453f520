//! FFmpeg CLI wrapper for the compilation pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Probing, thumbnails and yt-dlp downloads with a byte ceiling
//! - Segment normalization and lossless concatenation
//! - Hardware encoder detection with software fallback

pub mod command;
pub mod concat;
pub mod download;
pub mod encoder;
pub mod error;
pub mod fs_utils;
pub mod normalize;
pub mod probe;
pub mod progress;
pub mod thumbnail;

pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use concat::concat_segments;
pub use download::{download_video, is_supported_url};
pub use encoder::{EncoderStrategy, JobEncoder};
pub use error::{MediaError, MediaResult};
pub use fs_utils::move_file;
pub use normalize::{normalize_segment, AssetClass, SegmentJob};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, ProgressCallback};
pub use thumbnail::generate_thumbnail;

//! Lossless concatenation of normalized segments.

use std::path::{Path, PathBuf};

use reel_models::ContainerFormat;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Render the concat demuxer list for `segments`.
///
/// Paths are single-quoted; embedded quotes are closed, escaped and reopened.
pub fn concat_list(segments: &[PathBuf]) -> String {
    let mut list = String::new();
    for segment in segments {
        let path = segment.to_string_lossy().replace('\'', "'\\''");
        list.push_str("file '");
        list.push_str(&path);
        list.push_str("'\n");
    }
    list
}

/// Build the FFmpeg command that stream-copies the listed segments.
pub fn build_concat_command(list_path: &Path, output: &Path, format: ContainerFormat) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(list_path, output)
        .input_args(["-f", "concat", "-safe", "0"])
        .output_args(["-map", "0", "-c", "copy"]);
    if format.supports_faststart() {
        cmd = cmd.output_args(["-movflags", "+faststart"]);
    }
    cmd
}

/// Join segments into `output` without re-encoding.
///
/// The list file is written to `list_path`, which should sit in the job's
/// work directory.
pub async fn concat_segments(
    segments: &[PathBuf],
    list_path: &Path,
    output: &Path,
    format: ContainerFormat,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    if segments.is_empty() {
        return Err(MediaError::internal("nothing to concatenate"));
    }

    tokio::fs::write(list_path, concat_list(segments)).await?;
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    debug!(segments = segments.len(), output = %output.display(), "Concatenating segments");
    runner.run(&build_concat_command(list_path, output, format)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_escapes_quotes() {
        let list = concat_list(&[
            PathBuf::from("/media/.work/j1/seg-000.mp4"),
            PathBuf::from("/media/.work/j1/it's.mp4"),
        ]);
        assert_eq!(
            list,
            "file '/media/.work/j1/seg-000.mp4'\nfile '/media/.work/j1/it'\\''s.mp4'\n"
        );
    }

    #[test]
    fn test_concat_is_stream_copy() {
        let args = build_concat_command(Path::new("list.txt"), Path::new("out.mp4"), ContainerFormat::Mp4)
            .build_args();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(&args[i - 4..i], &["-f", "concat", "-safe", "0"]);
        assert!(args.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
        assert!(args.contains(&"+faststart".to_string()));

        let mkv = build_concat_command(Path::new("list.txt"), Path::new("out.mkv"), ContainerFormat::Mkv)
            .build_args();
        assert!(!mkv.contains(&"+faststart".to_string()));
    }

    #[tokio::test]
    async fn test_empty_concat_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = concat_segments(
            &[],
            &dir.path().join("list.txt"),
            &dir.path().join("out.mp4"),
            ContainerFormat::Mp4,
            &FfmpegRunner::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::Internal(_)));
    }
}

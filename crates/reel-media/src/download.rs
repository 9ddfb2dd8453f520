//! Clip download using yt-dlp.
//!
//! Downloads are bounded by the user's remaining storage. yt-dlp enforces the
//! ceiling while fetching (`--max-filesize`) and the finished file is checked
//! again, since formats without a known size slip past yt-dlp's own check.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::check_ytdlp;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{file_size, remove_if_exists};

/// Format selection: progressive MP4 first, then best available.
const FORMAT_SELECTOR: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Marker yt-dlp prints when it skips a file over `--max-filesize`.
const MAX_FILESIZE_MARKER: &str = "max-filesize";

/// Build the yt-dlp argument list for a bounded download.
pub fn build_download_args(url: &str, output_path: &Path, max_bytes: u64) -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--no-progress".to_string(),
        "--no-part".to_string(),
        "--retries".to_string(),
        "3".to_string(),
        "--max-filesize".to_string(),
        max_bytes.to_string(),
        "-f".to_string(),
        FORMAT_SELECTOR.to_string(),
        "--merge-output-format".to_string(),
        "mp4".to_string(),
        "-o".to_string(),
        output_path.to_string_lossy().to_string(),
        url.to_string(),
    ]
}

/// Download a clip from `url` into `output_path`, refusing anything larger
/// than `max_bytes`. Returns the size of the downloaded file.
pub async fn download_video(url: &str, output_path: impl AsRef<Path>, max_bytes: u64) -> MediaResult<u64> {
    let output_path = output_path.as_ref();

    if max_bytes == 0 {
        return Err(MediaError::QuotaExhausted);
    }
    if !is_supported_url(url) {
        return Err(MediaError::download_failed(format!("unsupported URL: {}", url)));
    }

    check_ytdlp()?;

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    remove_if_exists(output_path).await?;

    info!(url = %url, output = %output_path.display(), max_bytes, "Downloading clip");

    let output = Command::new("yt-dlp")
        .args(build_download_args(url, output_path, max_bytes))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        debug!("yt-dlp stderr: {}", stderr);
        let error_msg = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("Unknown error");
        return Err(MediaError::download_failed(format!("yt-dlp failed: {}", error_msg)));
    }

    if !output_path.exists() {
        // yt-dlp exits 0 when it skips an oversized file
        if stdout.contains(MAX_FILESIZE_MARKER) || stderr.contains(MAX_FILESIZE_MARKER) {
            return Err(MediaError::FileTooLarge {
                size: max_bytes.saturating_add(1),
                limit: max_bytes,
            });
        }
        return Err(MediaError::download_failed("Output file not created"));
    }

    let size = file_size(output_path).await?;
    if let Err(e) = check_size(size, max_bytes) {
        remove_if_exists(output_path).await?;
        return Err(e);
    }

    info!(
        output = %output_path.display(),
        size_mb = size as f64 / (1024.0 * 1024.0),
        "Downloaded clip"
    );

    Ok(size)
}

fn check_size(size: u64, max_bytes: u64) -> MediaResult<()> {
    if size > max_bytes {
        warn!(size, limit = max_bytes, "Downloaded file exceeds storage ceiling");
        return Err(MediaError::FileTooLarge { size, limit: max_bytes });
    }
    Ok(())
}

/// Downloads only accept plain http(s) URLs.
pub fn is_supported_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_supported_url() {
        assert!(is_supported_url("https://clips.twitch.tv/abc"));
        assert!(is_supported_url("HTTP://example.com/a.mp4"));
        assert!(!is_supported_url("file:///etc/passwd"));
        assert!(!is_supported_url("--exec=rm"));
    }

    #[test]
    fn test_download_args_carry_ceiling() {
        let args = build_download_args("https://youtu.be/x", Path::new("/m/.work/j/clip.mp4"), 1_048_576);
        let idx = args.iter().position(|a| a == "--max-filesize").unwrap();
        assert_eq!(args[idx + 1], "1048576");
        assert_eq!(args.last().unwrap(), "https://youtu.be/x");
        assert!(args.contains(&"--no-playlist".to_string()));
    }

    #[tokio::test]
    async fn test_zero_ceiling_fails_before_network() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("clip.mp4");
        let err = download_video("https://example.com/a.mp4", &out, 0).await.unwrap_err();
        assert!(matches!(err, MediaError::QuotaExhausted));
        assert!(!out.exists());
    }

    #[test]
    fn test_post_download_size_check() {
        assert!(check_size(100, 100).is_ok());
        assert!(matches!(
            check_size(101, 100),
            Err(MediaError::FileTooLarge { size: 101, limit: 100 })
        ));
    }
}

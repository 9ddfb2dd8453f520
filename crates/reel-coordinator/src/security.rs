//! Input validation for user- and worker-supplied values.
//!
//! - Clip source URLs (SSRF protection before a worker fetches them)
//! - Media paths relative to the shared media root
//! - Title sanitization

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::Url;

/// Maximum URL length to prevent DoS attacks.
pub const MAX_URL_LENGTH: usize = 2048;

/// Maximum title length.
pub const MAX_TITLE_LENGTH: usize = 500;

/// Maximum relative media path length.
pub const MAX_PATH_LENGTH: usize = 512;

/// Internal networks and metadata endpoints a worker must never be pointed at.
static BLOCKED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^https?://127\.",
        r"^https?://localhost",
        r"^https?://0\.",
        r"^https?://10\.",
        r"^https?://172\.(1[6-9]|2[0-9]|3[0-1])\.",
        r"^https?://192\.168\.",
        r"^https?://169\.254\.",
        r"^https?://\[::1\]",
        r"^https?://\[fd",
        r"^https?://\[fe80",
        r"^https?://metadata\.",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Check a clip source URL, returning it trimmed.
pub fn validate_source_url(url: &str) -> Result<String, String> {
    let url = url.trim();
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(format!("URL exceeds maximum length of {} characters", MAX_URL_LENGTH));
    }

    let parsed = Url::parse(url).map_err(|e| format!("Invalid URL format: {}", e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(format!(
                "Invalid protocol '{}'. Only HTTP and HTTPS are allowed.",
                scheme
            ))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err("URL must have a valid host".to_string());
    }

    let lowered = url.to_lowercase();
    if BLOCKED_PATTERNS.iter().any(|p| p.is_match(&lowered)) {
        warn!(url = %url, "Blocked URL pattern detected");
        return Err("URL appears to target an internal or restricted endpoint".to_string());
    }

    Ok(url.to_string())
}

/// A path that stays inside the media root: relative, no parent or empty
/// components, no backslashes.
pub fn is_safe_media_path(path: &str) -> bool {
    if path.is_empty() || path.len() > MAX_PATH_LENGTH {
        return false;
    }
    if path.starts_with('/') || path.contains('\\') || path.contains('\0') {
        return false;
    }
    path.split('/')
        .all(|part| !part.is_empty() && part != "." && part != "..")
}

/// A media path must live under the owning user's directory.
pub fn is_user_media_path(user_id: &str, path: &str) -> bool {
    is_safe_media_path(path)
        && path
            .strip_prefix(user_id)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Sanitize a title for safe storage.
pub fn sanitize_title(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_TITLE_LENGTH)
        .collect()
}

//! Source URL normalization.
//!
//! Two URLs that point at the same upstream clip normalize to the same
//! string, which is what download reuse keys on.

use thiserror::Error;
use url::Url;

/// Query parameters that only carry tracking information.
const TRACKING_PARAMS: &[&str] = &["si", "feature", "ref", "ref_src", "fbclid", "gclid"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceKeyError {
    #[error("invalid source URL: {0}")]
    Invalid(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("source URL has no host")]
    MissingHost,
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

fn bare_host(host: &str) -> &str {
    host.strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(host)
}

fn youtube_id(host: &str, url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let id = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("shorts") | Some("embed") | Some("live") => segments.next().map(str::to_string),
            _ => None,
        },
        _ => None,
    }?;
    (!id.is_empty()).then_some(id)
}

fn twitch_clip_slug(host: &str, url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match (host, segments.as_slice()) {
        ("clips.twitch.tv", [slug, ..]) => Some(slug.to_string()),
        ("twitch.tv", [_channel, "clip", slug, ..]) => Some(slug.to_string()),
        _ => None,
    }
}

/// Normalize a clip source URL into its reuse key.
pub fn normalize_source_url(raw: &str) -> Result<String, SourceKeyError> {
    let url = Url::parse(raw.trim()).map_err(|e| SourceKeyError::Invalid(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(SourceKeyError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(SourceKeyError::MissingHost)?
        .to_ascii_lowercase();
    let host = bare_host(&host);

    if let Some(id) = youtube_id(host, &url) {
        return Ok(format!("https://youtube.com/watch?v={}", id));
    }
    if let Some(slug) = twitch_clip_slug(host, &url) {
        return Ok(format!("https://clips.twitch.tv/{}", slug));
    }

    let mut key = format!("https://{}", host);
    if let Some(port) = url.port() {
        key.push_str(&format!(":{}", port));
    }
    key.push_str(url.path().trim_end_matches('/'));

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        key.push('?');
        key.push_str(&query);
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_url_is_canonicalized() {
        let a = normalize_source_url("HTTP://WWW.Example.com/Video/123/?b=2&utm_source=x&a=1#t=3").unwrap();
        let b = normalize_source_url("https://example.com/Video/123?a=1&b=2&fbclid=zzz").unwrap();
        assert_eq!(a, "https://example.com/Video/123?a=1&b=2");
        assert_eq!(a, b);
    }

    #[test]
    fn test_youtube_forms_collapse() {
        let expected = "https://youtube.com/watch?v=dQw4w9WgXcQ";
        for raw in [
            "https://youtu.be/dQw4w9WgXcQ?si=abcdef",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&feature=share",
            "https://m.youtube.com/shorts/dQw4w9WgXcQ",
            "https://youtube.com/embed/dQw4w9WgXcQ",
        ] {
            assert_eq!(normalize_source_url(raw).unwrap(), expected, "{}", raw);
        }
    }

    #[test]
    fn test_twitch_clip_forms_collapse() {
        let a = normalize_source_url("https://www.twitch.tv/somechannel/clip/FunnySlug-abc?filter=clips").unwrap();
        let b = normalize_source_url("https://clips.twitch.tv/FunnySlug-abc").unwrap();
        assert_eq!(a, "https://clips.twitch.tv/FunnySlug-abc");
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_default_port_is_kept() {
        let key = normalize_source_url("http://media.local:8080/a.mp4").unwrap();
        assert_eq!(key, "https://media.local:8080/a.mp4");
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            normalize_source_url("ftp://example.com/a.mp4"),
            Err(SourceKeyError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            normalize_source_url("file:///etc/passwd"),
            Err(SourceKeyError::UnsupportedScheme(_))
        ));
        assert!(matches!(normalize_source_url("not a url"), Err(SourceKeyError::Invalid(_))));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize_source_url("https://www.example.com/clip/?z=1&a=2&ref=home").unwrap();
        assert_eq!(normalize_source_url(&once).unwrap(), once);
    }
}

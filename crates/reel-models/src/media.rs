//! Media files stored under the shared media root.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::MediaId;

/// What a media file is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Clip,
    Intro,
    Outro,
    Transition,
    Compilation,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Clip => "clip",
            MediaKind::Intro => "intro",
            MediaKind::Outro => "outro",
            MediaKind::Transition => "transition",
            MediaKind::Compilation => "compilation",
        }
    }

    /// Intro, outro and transition assets.
    pub fn is_decorative(&self) -> bool {
        matches!(self, MediaKind::Intro | MediaKind::Outro | MediaKind::Transition)
    }

    /// Directory under `<media_root>/<user>/` that holds files of this kind.
    pub fn directory(&self) -> &'static str {
        match self {
            MediaKind::Clip => "clips",
            MediaKind::Compilation => "compilations",
            MediaKind::Intro | MediaKind::Outro | MediaKind::Transition => "assets",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaFile {
    pub id: MediaId,
    pub user_id: String,
    pub kind: MediaKind,
    /// Path relative to the media root.
    pub file_path: String,
    pub duration_secs: f64,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    /// Normalized source URL, only for downloaded clips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaFile {
    pub fn new(
        user_id: impl Into<String>,
        kind: MediaKind,
        file_path: impl Into<String>,
        duration_secs: f64,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: MediaId::new(),
            user_id: user_id.into(),
            kind,
            file_path: file_path.into(),
            duration_secs,
            size_bytes,
            thumbnail_path: None,
            source_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A media file is usable in a compilation once its thumbnail exists.
    pub fn is_ready(&self) -> bool {
        self.thumbnail_path.as_deref().is_some_and(|p| !p.is_empty())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_thumbnail() {
        let mut media = MediaFile::new("u1", MediaKind::Clip, "u1/clips/a.mp4", 12.5, 1024);
        assert!(!media.is_ready());
        media.thumbnail_path = Some(String::new());
        assert!(!media.is_ready());
        media.thumbnail_path = Some("u1/thumbnails/a.jpg".into());
        assert!(media.is_ready());
    }

    #[test]
    fn test_kind_directories() {
        assert_eq!(MediaKind::Clip.directory(), "clips");
        assert_eq!(MediaKind::Compilation.directory(), "compilations");
        assert!(MediaKind::Transition.is_decorative());
        assert!(!MediaKind::Compilation.is_decorative());
    }
}

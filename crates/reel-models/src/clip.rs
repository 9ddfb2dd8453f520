//! Clips selected into a project.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{ClipId, MediaId, ProjectId};

/// Download status of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    #[default]
    Pending,
    Downloading,
    Ready,
    Failed,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Pending => "pending",
            ClipStatus::Downloading => "downloading",
            ClipStatus::Ready => "ready",
            ClipStatus::Failed => "failed",
        }
    }

    /// Only failed clips may have their download re-issued.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClipStatus::Failed)
    }
}

impl std::fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Clip metadata handed over by a clip-source integration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClipSource {
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A clip inside a project.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    pub id: ClipId,
    pub project_id: ProjectId,
    pub user_id: String,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<MediaId>,
    #[serde(default)]
    pub status: ClipStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clip {
    /// Create a pending clip from a source record.
    pub fn from_source(project_id: ProjectId, user_id: impl Into<String>, source: ClipSource) -> Self {
        let now = Utc::now();
        Self {
            id: ClipId::new(),
            project_id,
            user_id: user_id.into(),
            source_url: source.source_url,
            title: source.title,
            creator: source.creator,
            game: source.game,
            view_count: source.view_count,
            source_created_at: source.created_at,
            media_id: None,
            status: ClipStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ready clips always carry their media.
    pub fn ready_media(&self) -> Option<&MediaId> {
        match self.status {
            ClipStatus::Ready => self.media_id.as_ref(),
            _ => None,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ClipSource {
        ClipSource {
            source_url: "https://clips.twitch.tv/AwesomeSlug".into(),
            title: Some("clutch".into()),
            creator: None,
            game: None,
            view_count: Some(42),
            created_at: None,
        }
    }

    #[test]
    fn test_from_source_starts_pending() {
        let clip = Clip::from_source(ProjectId::new(), "u1", source());
        assert_eq!(clip.status, ClipStatus::Pending);
        assert!(clip.media_id.is_none());
        assert_eq!(clip.view_count, Some(42));
        assert!(clip.ready_media().is_none());
    }

    #[test]
    fn test_ready_media_requires_ready_status() {
        let mut clip = Clip::from_source(ProjectId::new(), "u1", source());
        clip.media_id = Some(MediaId::from_string("m1"));
        assert!(clip.ready_media().is_none());
        clip.status = ClipStatus::Ready;
        assert_eq!(clip.ready_media().map(|m| m.as_str()), Some("m1"));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&ClipStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
        assert!(ClipStatus::Failed.is_retryable());
        assert!(!ClipStatus::Ready.is_retryable());
    }
}

//! Compilation projects and their output settings.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{ClipId, JobId, MediaId, ProjectId};

/// Lowest accepted output frame rate.
pub const MIN_FRAME_RATE: u32 = 1;
/// Highest accepted output frame rate.
pub const MAX_FRAME_RATE: u32 = 60;

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Ready,
    Processing,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }

    /// A compile may start from any status except an in-flight one.
    pub fn can_start_compile(&self) -> bool {
        !matches!(self, ProjectStatus::Processing)
    }

    /// Worker reports may only finish a processing project.
    pub fn can_finish(&self) -> bool {
        matches!(self, ProjectStatus::Processing)
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How transitions are picked at each transition point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    /// Walk the transition set in order, wrapping around.
    #[default]
    Cycle,
    /// Sample independently at every transition point.
    Randomize,
}

/// Output resolution, named by its short side.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
pub enum ResolutionPreset {
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[default]
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
}

impl ResolutionPreset {
    pub fn short_side(&self) -> u32 {
        match self {
            ResolutionPreset::P480 => 480,
            ResolutionPreset::P720 => 720,
            ResolutionPreset::P1080 => 1080,
            ResolutionPreset::P1440 => 1440,
            ResolutionPreset::P2160 => 2160,
        }
    }

    /// Long side at 16:9, rounded to an even pixel count.
    pub fn long_side(&self) -> u32 {
        match self {
            ResolutionPreset::P480 => 854,
            ResolutionPreset::P720 => 1280,
            ResolutionPreset::P1080 => 1920,
            ResolutionPreset::P1440 => 2560,
            ResolutionPreset::P2160 => 3840,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionPreset::P480 => "480p",
            ResolutionPreset::P720 => "720p",
            ResolutionPreset::P1080 => "1080p",
            ResolutionPreset::P1440 => "1440p",
            ResolutionPreset::P2160 => "2160p",
        }
    }
}

/// Frame orientation of the compiled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mov,
    Mkv,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mkv => "mkv",
        }
    }

    /// Whether the muxer supports moving the index to the front.
    pub fn supports_faststart(&self) -> bool {
        matches!(self, ContainerFormat::Mp4 | ContainerFormat::Mov)
    }
}

/// Loudness normalization applied to every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioProfile {
    None,
    /// -16 LUFS, the common target of streaming platforms.
    #[default]
    Streaming,
    /// -23 LUFS (EBU R128).
    Broadcast,
}

impl AudioProfile {
    /// FFmpeg audio filter for this profile, if any.
    pub fn filter(&self) -> Option<&'static str> {
        match self {
            AudioProfile::None => None,
            AudioProfile::Streaming => Some("loudnorm=I=-16:TP=-1.5:LRA=11"),
            AudioProfile::Broadcast => Some("loudnorm=I=-23:TP=-2:LRA=7"),
        }
    }
}

/// Rendering parameters for a compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OutputSettings {
    #[serde(default)]
    pub resolution: ResolutionPreset,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default)]
    pub format: ContainerFormat,
    #[serde(default)]
    pub audio_profile: AudioProfile,
}

fn default_frame_rate() -> u32 {
    30
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            resolution: ResolutionPreset::default(),
            orientation: Orientation::default(),
            frame_rate: default_frame_rate(),
            format: ContainerFormat::default(),
            audio_profile: AudioProfile::default(),
        }
    }
}

impl OutputSettings {
    /// Target frame size for the configured resolution and orientation.
    pub fn dimensions(&self) -> Dimensions {
        let (short, long) = (self.resolution.short_side(), self.resolution.long_side());
        match self.orientation {
            Orientation::Landscape => Dimensions {
                width: long,
                height: short,
            },
            Orientation::Portrait => Dimensions {
                width: short,
                height: long,
            },
        }
    }

    /// Copy of these settings with the resolution capped to `max`.
    pub fn capped_to(&self, max: ResolutionPreset) -> Self {
        Self {
            resolution: self.resolution.min(max),
            ..self.clone()
        }
    }

    pub fn has_valid_frame_rate(&self) -> bool {
        (MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&self.frame_rate)
    }
}

/// A named compilation owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: ProjectId,
    pub user_id: String,
    pub name: String,
    /// Clips in playback order.
    #[serde(default)]
    pub clip_ids: Vec<ClipId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_id: Option<MediaId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outro_id: Option<MediaId>,
    #[serde(default)]
    pub transition_ids: Vec<MediaId>,
    #[serde(default)]
    pub transition_mode: TransitionMode,
    #[serde(default)]
    pub settings: OutputSettings,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_media_id: Option<MediaId>,
    /// Compile job that currently owns the render. Replaced by every new
    /// compile and cleared on cancel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            user_id: user_id.into(),
            name: name.into(),
            clip_ids: Vec::new(),
            intro_id: None,
            outro_id: None,
            transition_ids: Vec::new(),
            transition_mode: TransitionMode::default(),
            settings: OutputSettings::default(),
            status: ProjectStatus::Draft,
            error: None,
            output_media_id: None,
            active_job_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `job_id` is the compile this project is still waiting on.
    pub fn is_rendering(&self, job_id: &JobId) -> bool {
        self.status == ProjectStatus::Processing && self.active_job_id.as_ref() == Some(job_id)
    }

    /// Decorative media referenced by the project (intro, outro, transitions).
    pub fn decorative_media_ids(&self) -> Vec<MediaId> {
        let mut ids = Vec::with_capacity(self.transition_ids.len() + 2);
        ids.extend(self.intro_id.iter().cloned());
        ids.extend(self.outro_id.iter().cloned());
        for id in &self.transition_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// Append a clip and promote a draft once it has something to compile.
    pub fn push_clip(&mut self, clip_id: ClipId) {
        if !self.clip_ids.contains(&clip_id) {
            self.clip_ids.push(clip_id);
        }
        if self.status == ProjectStatus::Draft {
            self.status = ProjectStatus::Ready;
        }
        self.updated_at = Utc::now();
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

//! Timeline assembly.
//!
//! Turns a project's selection into the ordered list of segments a worker
//! renders. The interleave is fixed:
//!
//! ```text
//! [intro, bumper] | [bumper]
//! clip_1, bumper, (transition, bumper), clip_2, bumper, ... clip_n
//! [bumper, outro]
//! ```
//!
//! A bumper never trails the final segment, and neither two clips nor two
//! bumpers are ever adjacent.

use rand::Rng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clip::Clip;
use crate::ids::{ClipId, MediaId};
use crate::project::{Project, TransitionMode};

/// One rendered piece of the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Intro { media_id: MediaId },
    Bumper,
    Clip { clip_id: ClipId, media_id: MediaId },
    Transition { media_id: MediaId },
    Outro { media_id: MediaId },
}

impl Segment {
    pub fn is_clip(&self) -> bool {
        matches!(self, Segment::Clip { .. })
    }

    pub fn is_bumper(&self) -> bool {
        matches!(self, Segment::Bumper)
    }

    /// Media backing this segment. Bumpers come from the worker's own asset.
    pub fn media_id(&self) -> Option<&MediaId> {
        match self {
            Segment::Bumper => None,
            Segment::Intro { media_id }
            | Segment::Clip { media_id, .. }
            | Segment::Transition { media_id }
            | Segment::Outro { media_id } => Some(media_id),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Segment::Intro { .. } => "intro",
            Segment::Bumper => "bumper",
            Segment::Clip { .. } => "clip",
            Segment::Transition { .. } => "transition",
            Segment::Outro { .. } => "outro",
        }
    }
}

/// A clip resolved to its downloaded media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClipRef {
    pub clip_id: ClipId,
    pub media_id: MediaId,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineError {
    #[error("project has no clips")]
    NoClips,

    #[error("clip {0} is not part of this project")]
    UnknownClip(ClipId),

    #[error("clip {0} has not finished downloading")]
    ClipNotReady(ClipId),
}

/// Everything the assembler needs, detached from storage records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimelineSpec {
    #[serde(default)]
    pub intro: Option<MediaId>,
    pub clips: Vec<ClipRef>,
    #[serde(default)]
    pub transitions: Vec<MediaId>,
    #[serde(default)]
    pub outro: Option<MediaId>,
    #[serde(default)]
    pub mode: TransitionMode,
}

impl TimelineSpec {
    /// Resolve a project's ordered clip ids against its clips, keeping at most
    /// `max_clips` of them.
    pub fn from_project(project: &Project, clips: &[Clip], max_clips: usize) -> Result<Self, TimelineError> {
        let refs = project
            .clip_ids
            .iter()
            .take(max_clips)
            .map(|id| {
                let clip = clips
                    .iter()
                    .find(|c| &c.id == id && c.project_id == project.id)
                    .ok_or_else(|| TimelineError::UnknownClip(id.clone()))?;
                let media_id = clip
                    .ready_media()
                    .ok_or_else(|| TimelineError::ClipNotReady(id.clone()))?;
                Ok(ClipRef {
                    clip_id: id.clone(),
                    media_id: media_id.clone(),
                })
            })
            .collect::<Result<Vec<_>, TimelineError>>()?;

        if refs.is_empty() {
            return Err(TimelineError::NoClips);
        }

        Ok(Self {
            intro: project.intro_id.clone(),
            clips: refs,
            transitions: project.transition_ids.clone(),
            outro: project.outro_id.clone(),
            mode: project.transition_mode,
        })
    }

    /// Same selection with a different transition mode.
    pub fn with_mode(mut self, mode: TransitionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Number of segments `build_timeline` produces for this spec.
    pub fn segment_count(&self) -> usize {
        let n = self.clips.len();
        if n == 0 {
            return 0;
        }
        let gaps = n - 1;
        let lead = if self.intro.is_some() { 2 } else { 1 };
        let transitions = if self.transitions.is_empty() { 0 } else { 2 * gaps };
        let tail = if self.outro.is_some() { 2 } else { 0 };
        lead + n + gaps + transitions + tail
    }
}

/// Build the ordered segment list for a spec.
pub fn build_timeline<R: Rng>(spec: &TimelineSpec, rng: &mut R) -> Result<Vec<Segment>, TimelineError> {
    if spec.clips.is_empty() {
        return Err(TimelineError::NoClips);
    }

    let mut segments = Vec::with_capacity(spec.segment_count());
    if let Some(intro) = &spec.intro {
        segments.push(Segment::Intro {
            media_id: intro.clone(),
        });
    }
    segments.push(Segment::Bumper);

    let last = spec.clips.len() - 1;
    let mut cursor = 0usize;
    for (i, clip) in spec.clips.iter().enumerate() {
        if i > 0 && !spec.transitions.is_empty() {
            let pick = match spec.mode {
                TransitionMode::Cycle => {
                    let idx = cursor % spec.transitions.len();
                    cursor += 1;
                    idx
                }
                TransitionMode::Randomize => rng.random_range(0..spec.transitions.len()),
            };
            segments.push(Segment::Transition {
                media_id: spec.transitions[pick].clone(),
            });
            segments.push(Segment::Bumper);
        }

        segments.push(Segment::Clip {
            clip_id: clip.clip_id.clone(),
            media_id: clip.media_id.clone(),
        });

        if i < last || spec.outro.is_some() {
            segments.push(Segment::Bumper);
        }
    }

    if let Some(outro) = &spec.outro {
        segments.push(Segment::Outro {
            media_id: outro.clone(),
        });
    }

    Ok(segments)
}

//! Render-time estimation for compile pre-flight.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::MediaId;
use crate::project::TransitionMode;
use crate::timeline::{build_timeline, Segment, TimelineError, TimelineSpec};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimateError {
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error("no duration known for media {0}")]
    MissingDuration(MediaId),
}

/// Expected output length of a compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderEstimate {
    /// Whole seconds, rounded up. This is what gets reserved.
    pub total_seconds: u64,
    pub exact_seconds: f64,
    pub segment_count: usize,
}

/// Estimate the rendered duration of a selection.
///
/// Transitions are counted at the average duration of the selected set, so
/// the figure does not depend on which transition a randomized render picks.
pub fn estimate_render(
    spec: &TimelineSpec,
    durations: &HashMap<MediaId, f64>,
    bumper_secs: f64,
) -> Result<RenderEstimate, EstimateError> {
    let lookup = |id: &MediaId| {
        durations
            .get(id)
            .copied()
            .ok_or_else(|| EstimateError::MissingDuration(id.clone()))
    };

    let transition_avg = if spec.transitions.is_empty() {
        0.0
    } else {
        let mut sum = 0.0;
        for id in &spec.transitions {
            sum += lookup(id)?;
        }
        sum / spec.transitions.len() as f64
    };

    let cycle = spec.clone().with_mode(TransitionMode::Cycle);
    let segments = build_timeline(&cycle, &mut StdRng::seed_from_u64(0))?;

    let mut exact = 0.0;
    for segment in &segments {
        exact += match segment {
            Segment::Bumper => bumper_secs,
            Segment::Transition { .. } => transition_avg,
            Segment::Intro { media_id } | Segment::Clip { media_id, .. } | Segment::Outro { media_id } => {
                lookup(media_id)?
            }
        }
        .max(0.0);
    }

    Ok(RenderEstimate {
        total_seconds: exact.ceil() as u64,
        exact_seconds: exact,
        segment_count: segments.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClipId;
    use crate::timeline::ClipRef;

    fn durations(entries: &[(&str, f64)]) -> HashMap<MediaId, f64> {
        entries
            .iter()
            .map(|(id, secs)| (MediaId::from_string(*id), *secs))
            .collect()
    }

    fn clip(n: &str) -> ClipRef {
        ClipRef {
            clip_id: ClipId::from_string(format!("clip-{}", n)),
            media_id: MediaId::from_string(n),
        }
    }

    #[test]
    fn test_sums_segments_and_rounds_up() {
        let spec = TimelineSpec {
            intro: Some(MediaId::from_string("intro")),
            clips: vec![clip("a"), clip("b"), clip("c")],
            transitions: vec![MediaId::from_string("t1"), MediaId::from_string("t2")],
            outro: Some(MediaId::from_string("outro")),
            mode: TransitionMode::Randomize,
        };
        let d = durations(&[
            ("intro", 5.0),
            ("a", 30.0),
            ("b", 20.5),
            ("c", 10.0),
            ("t1", 1.0),
            ("t2", 3.0),
            ("outro", 4.0),
        ]);
        let estimate = estimate_render(&spec, &d, 1.0).unwrap();
        // intro 5 + clips 60.5 + 2 transitions at avg 2 + outro 4 + 6 bumpers
        assert_eq!(estimate.segment_count, 13);
        assert!((estimate.exact_seconds - 79.5).abs() < 1e-9);
        assert_eq!(estimate.total_seconds, 80);
    }

    #[test]
    fn test_missing_duration_is_reported() {
        let spec = TimelineSpec {
            clips: vec![clip("a")],
            ..Default::default()
        };
        assert_eq!(
            estimate_render(&spec, &HashMap::new(), 1.0),
            Err(EstimateError::MissingDuration(MediaId::from_string("a")))
        );
    }

    #[test]
    fn test_empty_selection() {
        let spec = TimelineSpec::default();
        assert!(matches!(
            estimate_render(&spec, &HashMap::new(), 1.0),
            Err(EstimateError::Timeline(TimelineError::NoClips))
        ));
    }
}

//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }

    /// Map this segment's progress onto a slice of an overall job.
    ///
    /// A job rendering `count` segments spends `[start, end)` percent on
    /// segment work; segment `index` gets an equal share of that range.
    pub fn job_percent(&self, total_duration_ms: i64, index: usize, count: usize, start: u8, end: u8) -> u8 {
        if count == 0 || end <= start {
            return start;
        }
        let span = (end - start) as f64;
        let share = span / count as f64;
        let done = share * index as f64 + share * (self.percentage(total_duration_ms) / 100.0);
        (start as f64 + done).floor().min(end as f64) as u8
    }
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(FfmpegProgress) + Send + 'static>;

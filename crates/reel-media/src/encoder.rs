//! Hardware encoder detection and per-job fallback.

use std::path::Path;

use reel_models::EncodingConfig;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};

/// Lavfi source encoded by the capability probe.
const PROBE_SOURCE: &str = "color=c=black:s=256x256:r=30:d=0.1";

/// Seconds the capability probe may run.
const PROBE_TIMEOUT_SECS: u64 = 20;

/// Process-wide encoder choice.
///
/// The NVENC probe runs at most once per process; every job afterwards starts
/// from the cached answer.
#[derive(Debug, Default)]
pub struct EncoderStrategy {
    disabled: bool,
    detected: OnceCell<bool>,
}

impl EncoderStrategy {
    pub fn new(disable_hwaccel: bool) -> Self {
        Self {
            disabled: disable_hwaccel,
            detected: OnceCell::new(),
        }
    }

    /// Strategy with a known probe result.
    pub fn with_detected(available: bool) -> Self {
        Self {
            disabled: false,
            detected: OnceCell::new_with(Some(available)),
        }
    }

    /// Whether NVENC can be used, probing on first call.
    pub async fn nvenc_available(&self) -> bool {
        if self.disabled {
            return false;
        }
        *self.detected.get_or_init(probe_nvenc).await
    }

    /// Whether the hardware answer is already settled.
    pub fn is_resolved(&self) -> bool {
        self.disabled || self.detected.initialized()
    }

    /// Encoder state for a new job. Every job starts on hardware when
    /// hardware is available.
    pub async fn for_job(&self) -> JobEncoder {
        JobEncoder {
            hardware: self.nvenc_available().await,
        }
    }
}

/// Encoder choice for one job, downgraded to software after a hardware
/// failure and kept there for the rest of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobEncoder {
    hardware: bool,
}

impl JobEncoder {
    pub fn software() -> Self {
        Self { hardware: false }
    }

    pub fn is_hardware(&self) -> bool {
        self.hardware
    }

    pub fn config(&self) -> EncodingConfig {
        if self.hardware {
            EncodingConfig::nvenc()
        } else {
            EncodingConfig::software()
        }
    }

    /// Switch to software. Returns false when already on software, in which
    /// case a failure is not an encoder problem.
    pub fn downgrade(&mut self) -> bool {
        if !self.hardware {
            return false;
        }
        self.hardware = false;
        metrics::counter!("reel_encoder_fallbacks_total").increment(1);
        true
    }
}

/// Encode a tiny test source with `h264_nvenc` into the null muxer.
pub async fn probe_nvenc() -> bool {
    let cmd = FfmpegCommand::lavfi(PROBE_SOURCE, Path::new("-"))
        .output_args(EncodingConfig::nvenc().to_ffmpeg_args())
        .output_arg("-an")
        .output_args(["-f", "null"]);

    match FfmpegRunner::new().with_timeout(PROBE_TIMEOUT_SECS).run(&cmd).await {
        Ok(()) => {
            info!("NVENC available, using hardware encoding");
            true
        }
        Err(e) => {
            warn!(error = %e.detail(), "NVENC unavailable, using libx264");
            false
        }
    }
}

//! Shared state handed to every task.

use std::sync::Arc;

use reel_client::CoordinatorApi;
use reel_media::EncoderStrategy;
use reel_models::api::UpdateProcessingJobRequest;
use reel_models::JobId;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::toolkit::MediaToolkit;

pub struct WorkerContext {
    pub config: WorkerConfig,
    pub api: Arc<dyn CoordinatorApi>,
    pub media: Arc<dyn MediaToolkit>,
    pub encoder: EncoderStrategy,
}

impl WorkerContext {
    pub fn new(config: WorkerConfig, api: Arc<dyn CoordinatorApi>, media: Arc<dyn MediaToolkit>) -> Self {
        let encoder = EncoderStrategy::new(config.disable_hwaccel);
        Self {
            config,
            api,
            media,
            encoder,
        }
    }

    /// Same context with a fixed encoder choice.
    pub fn with_encoder(mut self, encoder: EncoderStrategy) -> Self {
        self.encoder = encoder;
        self
    }

    /// Settle the NVENC capability check now so no job pays for it.
    pub async fn detect_encoder(&self) -> bool {
        let available = self.encoder.nvenc_available().await;
        if available {
            info!("NVENC available, compiles start on h264_nvenc");
        } else if self.config.disable_hwaccel {
            info!("Hardware encoding disabled, using libx264");
        } else {
            info!("NVENC unavailable, using libx264");
        }
        available
    }

    /// Best-effort progress report. A lost progress update never fails a job.
    pub async fn report_progress(&self, user_id: &str, job_id: &JobId, progress: u8) {
        if let Err(e) = self
            .api
            .update_processing_job(user_id, job_id, &UpdateProcessingJobRequest::progress(progress))
            .await
        {
            warn!(job_id = %job_id, progress, "Failed to report progress: {}", e);
        }
    }
}

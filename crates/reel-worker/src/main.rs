//! Worker agent binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_client::CoordinatorClient;
use reel_media::{check_ffmpeg, check_ffprobe, check_ytdlp};
use reel_queue::JobQueue;
use reel_worker::{metrics, FfmpegToolkit, JobExecutor, WorkerConfig, WorkerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reel=info,reel_worker=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting reel-worker");

    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        anyhow::bail!("invalid configuration: {e}");
    }
    info!("Worker config: {:?}", config);

    for check in [check_ffmpeg, check_ffprobe, check_ytdlp] {
        check().context("required media tool is missing")?;
    }

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(port).context("failed to install metrics exporter")?;
        info!("Prometheus metrics on port {}", port);
    }

    let api = CoordinatorClient::from_env().context("failed to create coordinator client")?;
    let queue = JobQueue::from_env().context("failed to create job queue")?;
    let media = FfmpegToolkit::new(config.job_timeout.as_secs());

    let ctx = WorkerContext::new(config, Arc::new(api), Arc::new(media));
    ctx.detect_encoder().await;
    let executor = Arc::new(JobExecutor::new(ctx, queue));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_executor.shutdown();
        }
    });

    executor.run().await.context("executor error")?;

    info!("Worker shutdown complete");
    Ok(())
}

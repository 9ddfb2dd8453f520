//! Worker agent.
//!
//! This crate provides:
//! - Job executor over the prioritized Redis queues
//! - Clip downloads with storage-ceiling enforcement and reuse
//! - Compilation renders with hardware encoder fallback
//! - Liveness heartbeats and graceful shutdown

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod tasks;
pub mod toolkit;

pub use config::WorkerConfig;
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use toolkit::{FfmpegToolkit, MediaToolkit};

//! Worker configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reel_models::QueueName;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity in the consumer group and the liveness registry
    pub worker_id: String,
    /// Queues this worker consumes, highest priority first
    pub queues: Vec<QueueName>,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Shared media root; every stored path is relative to it
    pub media_root: PathBuf,
    /// Bumper clip placed between segments
    pub bumper_path: PathBuf,
    /// Skip the NVENC probe and always encode in software
    pub disable_hwaccel: bool,
    /// Job timeout
    pub job_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before a pending job can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Interval for refreshing job ownership while processing (prevents premature reclamation)
    pub job_heartbeat_interval: Duration,
    /// Port of the Prometheus listener, if any
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let media_root = PathBuf::from("/var/lib/reel/media");
        Self {
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            queues: vec![QueueName::Cpu, QueueName::Default],
            max_concurrent_jobs: 2,
            bumper_path: media_root.join("system").join("bumper.mp4"),
            media_root,
            disable_hwaccel: false,
            job_timeout: Duration::from_secs(3600), // 1 hour
            shutdown_timeout: Duration::from_secs(60),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            job_heartbeat_interval: Duration::from_secs(30),
            metrics_port: None,
        }
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

/// Parse a comma-separated queue list. Unknown names are skipped; the result
/// is sorted by priority with duplicates removed.
pub fn parse_queues(raw: &str) -> Vec<QueueName> {
    let mut queues: Vec<QueueName> = raw
        .split(',')
        .filter_map(|s| QueueName::parse(s.trim()))
        .collect();
    queues.sort();
    queues.dedup();
    queues
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let media_root = std::env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.media_root);
        let bumper_path = std::env::var("WORKER_BUMPER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| media_root.join("system").join("bumper.mp4"));

        Self {
            worker_id: std::env::var("WORKER_ID").unwrap_or(defaults.worker_id),
            queues: std::env::var("WORKER_QUEUES")
                .map(|s| parse_queues(&s))
                .unwrap_or(defaults.queues),
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            media_root,
            bumper_path,
            disable_hwaccel: std::env::var("WORKER_DISABLE_HWACCEL")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT", 3600),
            shutdown_timeout: env_secs("WORKER_SHUTDOWN_TIMEOUT", 60),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS", 30),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS", 300),
            job_heartbeat_interval: env_secs("WORKER_JOB_HEARTBEAT_SECS", 30),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Check the settings the executor relies on.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.queues.is_empty() {
            return Err(WorkerError::config_error("WORKER_QUEUES names no known queue"));
        }
        if !self.media_root.is_absolute() {
            return Err(WorkerError::config_error("MEDIA_ROOT must be an absolute path"));
        }
        if self.job_heartbeat_interval >= self.claim_min_idle {
            return Err(WorkerError::config_error(
                "WORKER_JOB_HEARTBEAT_SECS must be shorter than WORKER_CLAIM_MIN_IDLE_SECS",
            ));
        }
        Ok(())
    }

    /// Scratch directory for one job, on the media root's filesystem.
    pub fn work_dir(&self, job_id: &str) -> PathBuf {
        self.media_root.join(".work").join(job_id)
    }

    /// Absolute path of a media-root-relative path.
    pub fn media_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.media_root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queues_orders_by_priority() {
        assert_eq!(
            parse_queues("default, gpu,cpu,gpu,bogus"),
            vec![QueueName::Gpu, QueueName::Cpu, QueueName::Default]
        );
        assert!(parse_queues("").is_empty());
    }

    #[test]
    fn test_work_dir_is_under_media_root() {
        let config = WorkerConfig {
            media_root: PathBuf::from("/srv/media"),
            ..WorkerConfig::default()
        };
        assert_eq!(config.work_dir("j1"), PathBuf::from("/srv/media/.work/j1"));
        assert_eq!(
            config.media_path("u1/clips/a.mp4"),
            PathBuf::from("/srv/media/u1/clips/a.mp4")
        );
    }

    #[test]
    fn test_validate() {
        assert!(WorkerConfig::default().validate().is_ok());

        let config = WorkerConfig {
            queues: Vec::new(),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            media_root: PathBuf::from("relative/media"),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            job_heartbeat_interval: Duration::from_secs(600),
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

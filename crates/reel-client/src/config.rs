//! Client configuration.

use std::time::Duration;

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone)]
pub struct CoordinatorClientConfig {
    /// Base URL, e.g. `http://coordinator:8000`.
    pub base_url: String,
    /// Pre-shared worker credential.
    pub worker_token: String,
    pub timeout: Duration,
    /// Retries for idempotent calls after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl CoordinatorClientConfig {
    pub fn new(base_url: impl Into<String>, worker_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            worker_token: worker_token.into(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }

    /// Reads `COORDINATOR_URL`, `WORKER_TOKEN`, `COORDINATOR_TIMEOUT_SECS` and
    /// `COORDINATOR_RETRIES`.
    pub fn from_env() -> ClientResult<Self> {
        let base_url = std::env::var("COORDINATOR_URL")
            .map_err(|_| ClientError::config("COORDINATOR_URL must be set"))?;
        let worker_token = std::env::var("WORKER_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::config("WORKER_TOKEN must be set"))?;

        let mut config = Self::new(base_url, worker_token);
        if let Some(secs) = std::env::var("COORDINATOR_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = std::env::var("COORDINATOR_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.max_retries = retries;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_requires_token() {
        std::env::set_var("COORDINATOR_URL", "http://localhost:8000/");
        std::env::remove_var("WORKER_TOKEN");
        assert!(CoordinatorClientConfig::from_env().is_err());

        std::env::set_var("WORKER_TOKEN", "secret");
        std::env::set_var("COORDINATOR_RETRIES", "5");
        let config = CoordinatorClientConfig::from_env().unwrap();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.timeout, Duration::from_secs(30));

        std::env::remove_var("COORDINATOR_URL");
        std::env::remove_var("WORKER_TOKEN");
        std::env::remove_var("COORDINATOR_RETRIES");
    }
}

//! Coordinator configuration.

use std::time::Duration;

use reel_models::encoding::DEFAULT_BUMPER_SECS;

/// Where the Coordinator persists its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firestore,
    /// Process-local; for development and tests.
    Memory,
}

impl StoreBackend {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => StoreBackend::Memory,
            _ => StoreBackend::Firestore,
        }
    }
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second (per client IP, user routes only)
    pub rate_limit_rps: u32,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Pre-shared credential for workers.
    pub worker_token: String,
    /// HS256 secret for user session tokens.
    pub jwt_secret: String,
    pub store_backend: StoreBackend,
    /// Duration counted for every bumper in render estimates.
    pub bumper_duration_secs: f64,
    pub notify_webhook_url: Option<String>,
    /// Optimistic-concurrency attempts for a render ledger write.
    pub ledger_max_attempts: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            request_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
            worker_token: String::new(),
            jwt_secret: String::new(),
            store_backend: StoreBackend::Firestore,
            bumper_duration_secs: DEFAULT_BUMPER_SECS,
            notify_webhook_url: None,
            ledger_max_attempts: 5,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: std::env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rate_limit_rps),
            request_timeout: std::env::var("REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            worker_token: std::env::var("WORKER_TOKEN").unwrap_or_default(),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_default(),
            store_backend: std::env::var("STORE_BACKEND")
                .map(|s| StoreBackend::parse(&s))
                .unwrap_or(defaults.store_backend),
            bumper_duration_secs: std::env::var("BUMPER_DURATION_SECS")
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .unwrap_or(defaults.bumper_duration_secs),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            ledger_max_attempts: std::env::var("LEDGER_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.ledger_max_attempts),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Settings the server cannot start without.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_token.len() < 16 {
            return Err("WORKER_TOKEN must be set to at least 16 characters".to_string());
        }
        if self.jwt_secret.is_empty() {
            return Err("JWT_SECRET must be set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_reads_pipeline_settings() {
        std::env::set_var("WORKER_TOKEN", "0123456789abcdef");
        std::env::set_var("JWT_SECRET", "secret");
        std::env::set_var("STORE_BACKEND", "memory");
        std::env::set_var("BUMPER_DURATION_SECS", "1.5");
        std::env::set_var("NOTIFY_WEBHOOK_URL", " ");

        let config = ApiConfig::from_env();
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.bumper_duration_secs, 1.5);
        assert!(config.notify_webhook_url.is_none());
        assert!(config.validate().is_ok());

        std::env::set_var("BUMPER_DURATION_SECS", "-3");
        assert_eq!(ApiConfig::from_env().bumper_duration_secs, DEFAULT_BUMPER_SECS);

        for key in ["WORKER_TOKEN", "JWT_SECRET", "STORE_BACKEND", "BUMPER_DURATION_SECS", "NOTIFY_WEBHOOK_URL"] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_validate_rejects_short_worker_token() {
        let config = ApiConfig {
            worker_token: "short".into(),
            jwt_secret: "secret".into(),
            ..ApiConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

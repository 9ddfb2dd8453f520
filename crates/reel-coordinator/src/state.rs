//! Application state.

use std::sync::Arc;

use reel_queue::{JobDispatcher, JobQueue};
use reel_store::{FirestoreStore, MemoryStore, Store};
use tracing::{info, warn};

use crate::config::{ApiConfig, StoreBackend};
use crate::services::{
    CompileService, JobService, LogNotifier, MediaService, Notifier, ProjectService, QuotaService,
    WebhookNotifier,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub quota: QuotaService,
    pub jobs: JobService,
    pub media: MediaService,
    pub projects: ProjectService,
    pub compile: CompileService,
}

impl AppState {
    /// Wire the services over the given backends.
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn JobDispatcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let quota = QuotaService::new(Arc::clone(&store), config.ledger_max_attempts);
        let jobs = JobService::new(Arc::clone(&store), Arc::clone(&dispatcher), notifier, quota.clone());
        let media = MediaService::new(Arc::clone(&store));
        let projects = ProjectService::new(Arc::clone(&store), jobs.clone(), media.clone(), quota.clone());
        let compile = CompileService::new(
            Arc::clone(&store),
            projects.clone(),
            jobs.clone(),
            quota.clone(),
            config.bumper_duration_secs,
        );

        Self {
            config,
            store,
            dispatcher,
            quota,
            jobs,
            media,
            projects,
            compile,
        }
    }

    /// Build state from configuration and the environment.
    pub async fn from_config(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store: Arc<dyn Store> = match config.store_backend {
            StoreBackend::Firestore => Arc::new(FirestoreStore::from_env().await?),
            StoreBackend::Memory => {
                warn!("Using in-memory store; records are lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let queue = JobQueue::from_env()?;
        queue.init().await?;

        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => {
                info!("Job notifications posted to webhook");
                Arc::new(WebhookNotifier::new(url.clone())?)
            }
            None => Arc::new(LogNotifier),
        };

        Ok(Self::new(config, store, Arc::new(queue), notifier))
    }
}

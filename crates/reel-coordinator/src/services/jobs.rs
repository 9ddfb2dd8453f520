//! Processing job lifecycle: creation, dispatch and worker-reported updates.

use std::sync::Arc;

use chrono::Utc;
use reel_models::api::UpdateProcessingJobRequest;
use reel_models::{JobId, JobKind, JobState, ProcessingJob, QueueName};
use reel_queue::{JobDispatcher, QueueJob};
use reel_store::Store;
use tracing::{info, warn};

use super::notifier::Notifier;
use super::quota::QuotaService;
use crate::error::{ApiError, ApiResult};
use crate::metrics;

#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn JobDispatcher>,
    notifier: Arc<dyn Notifier>,
    quota: QuotaService,
}

impl JobService {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn JobDispatcher>,
        notifier: Arc<dyn Notifier>,
        quota: QuotaService,
    ) -> Self {
        Self {
            store,
            dispatcher,
            notifier,
            quota,
        }
    }

    /// Queue a job of `kind` should go to, falling back to `default` when
    /// worker liveness cannot be read.
    pub async fn route(&self, kind: JobKind) -> QueueName {
        match self.dispatcher.route(kind).await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(kind = %kind, "Queue routing failed, using default queue: {}", e);
                QueueName::Default
            }
        }
    }

    /// Create a job on the routed queue and dispatch it.
    pub async fn create(&self, user_id: &str, kind: JobKind, target_id: &str) -> ApiResult<ProcessingJob> {
        let queue = self.route(kind).await;
        self.dispatch(ProcessingJob::new(user_id, kind, target_id, queue)).await
    }

    /// Persist a queued job and hand it to the broker.
    ///
    /// When the broker refuses it, the job is closed `failed` (releasing any
    /// render reservation) and the caller gets 503.
    pub async fn dispatch(&self, mut job: ProcessingJob) -> ApiResult<ProcessingJob> {
        self.store.put_job(&job).await?;

        match self.dispatcher.enqueue(job.queue, &QueueJob::for_record(&job)).await {
            Ok(()) => {
                metrics::record_job_dispatched(job.kind.as_str(), job.queue.as_str());
                info!(
                    job_id = %job.id,
                    user_id = %job.user_id,
                    kind = %job.kind,
                    queue = %job.queue,
                    "Job dispatched"
                );
                Ok(job)
            }
            Err(e) => {
                metrics::record_dispatch_failed(job.kind.as_str());
                warn!(job_id = %job.id, "Failed to enqueue job: {}", e);

                job.state = JobState::Failed;
                job.error = Some(format!("dispatch failed: {}", e));
                job.updated_at = Utc::now();
                if let Err(store_err) = self.store.put_job(&job).await {
                    warn!(job_id = %job.id, "Failed to mark undispatched job failed: {}", store_err);
                }
                self.finish(&job).await;

                Err(ApiError::unavailable("Job queue is unavailable, please retry"))
            }
        }
    }

    pub async fn get(&self, user_id: &str, job_id: &JobId) -> ApiResult<ProcessingJob> {
        self.store
            .get_job(user_id, job_id)
            .await?
            .filter(|job| job.is_owned_by(user_id))
            .ok_or_else(|| ApiError::not_found("Job not found"))
    }

    /// Apply a worker-reported state change.
    pub async fn update(
        &self,
        user_id: &str,
        job_id: &JobId,
        update: &UpdateProcessingJobRequest,
    ) -> ApiResult<ProcessingJob> {
        let mut job = self.get(user_id, job_id).await?;

        if job.state.is_terminal() {
            return Err(ApiError::conflict(format!("Job is already {}", job.state)));
        }
        if !job.state.can_transition_to(update.state) {
            return Err(ApiError::conflict(format!(
                "Illegal job transition {} -> {}",
                job.state, update.state
            )));
        }

        job.state = update.state;
        if let Some(progress) = update.progress {
            job.progress = job.progress.max(progress.min(100));
        }
        if job.state == JobState::Succeeded {
            job.progress = 100;
        }
        if update.result.is_some() {
            job.result = update.result.clone();
        }
        if update.error.is_some() {
            job.error = update.error.clone();
        }
        if job.state == JobState::Failed && job.error.is_none() {
            job.error = Some("unknown error".to_string());
        }
        job.updated_at = Utc::now();

        self.store.put_job(&job).await?;

        if job.state.is_terminal() {
            self.finish(&job).await;
        }
        Ok(job)
    }

    async fn finish(&self, job: &ProcessingJob) {
        metrics::record_job_finished(job.kind.as_str(), job.state.as_str());

        // Succeeded compiles normally released already when usage was recorded.
        if job.kind == JobKind::Compile {
            if let Err(e) = self.quota.release(job).await {
                warn!(job_id = %job.id, "Failed to release render reservation: {}", e);
            }
        }

        self.notifier.job_finished(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reel_queue::MemoryDispatcher;
    use reel_store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(JobId, JobState)>>);

    #[async_trait]
    impl Notifier for Recorder {
        async fn job_finished(&self, job: &ProcessingJob) {
            self.0.lock().unwrap().push((job.id.clone(), job.state));
        }
    }

    fn service() -> (JobService, Arc<MemoryDispatcher>, Arc<Recorder>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(MemoryDispatcher::new());
        let recorder = Arc::new(Recorder::default());
        let quota = QuotaService::new(store.clone(), 3);
        let jobs = JobService::new(store.clone(), dispatcher.clone(), recorder.clone(), quota);
        (jobs, dispatcher, recorder, store)
    }

    #[tokio::test]
    async fn test_create_routes_and_enqueues() {
        let (jobs, dispatcher, _, _) = service();
        dispatcher.set_live(&[QueueName::Gpu, QueueName::Cpu]);

        let download = jobs.create("u1", JobKind::Download, "c1").await.unwrap();
        assert_eq!(download.queue, QueueName::Cpu);
        assert_eq!(download.state, JobState::Queued);

        let compile = jobs.create("u1", JobKind::Compile, "p1").await.unwrap();
        assert_eq!(compile.queue, QueueName::Gpu);
        assert_eq!(dispatcher.enqueued().len(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_failure_marks_job_failed() {
        let (jobs, dispatcher, recorder, store) = service();
        dispatcher.set_unavailable(true);

        let err = jobs.create("u1", JobKind::Download, "c1").await.unwrap_err();
        assert!(matches!(err, ApiError::Unavailable(_)));

        let (job_id, state) = recorder.0.lock().unwrap()[0].clone();
        assert_eq!(state, JobState::Failed);
        let stored = store.get_job("u1", &job_id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_terminal_jobs_reject_updates() {
        let (jobs, _, recorder, _) = service();
        let job = jobs.create("u1", JobKind::Download, "c1").await.unwrap();

        jobs.update("u1", &job.id, &UpdateProcessingJobRequest::started()).await.unwrap();
        let progressed = jobs
            .update("u1", &job.id, &UpdateProcessingJobRequest::progress(40))
            .await
            .unwrap();
        assert_eq!(progressed.progress, 40);

        let done = jobs
            .update("u1", &job.id, &UpdateProcessingJobRequest::succeeded(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(done.progress, 100);

        let err = jobs
            .update("u1", &job.id, &UpdateProcessingJobRequest::failed("late"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_jobs_are_scoped_to_owner() {
        let (jobs, _, _, _) = service();
        let job = jobs.create("u1", JobKind::Download, "c1").await.unwrap();
        assert!(matches!(jobs.get("u2", &job.id).await, Err(ApiError::NotFound(_))));
    }
}

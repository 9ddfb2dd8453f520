//! Job executor.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use reel_queue::{Delivery, JobQueue, HEARTBEAT_INTERVAL_SECS};

use crate::context::WorkerContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::tasks;

/// How long one consume call blocks when every queue is empty.
const CONSUME_BLOCK_MS: u64 = 1000;

/// Pending messages taken over per claim pass.
const CLAIM_BATCH: usize = 5;

/// Pulls jobs from the served queues and runs them with bounded concurrency.
pub struct JobExecutor {
    ctx: Arc<WorkerContext>,
    queue: Arc<JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(ctx: WorkerContext, queue: JobQueue) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            ctx: Arc::new(ctx),
            queue: Arc::new(queue),
            job_semaphore,
            shutdown,
        }
    }

    /// Run until [`JobExecutor::shutdown`] is called, then drain in-flight
    /// jobs for up to the configured shutdown timeout.
    pub async fn run(&self) -> WorkerResult<()> {
        let config = &self.ctx.config;
        info!(
            worker_id = %config.worker_id,
            queues = ?config.queues,
            "Starting job executor with {} max concurrent jobs",
            config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let heartbeat_task = tokio::spawn(Self::heartbeat_loop(
            Arc::clone(&self.ctx),
            Arc::clone(&self.queue),
            self.shutdown.subscribe(),
        ));
        let claim_task = tokio::spawn(Self::claim_loop(
            Arc::clone(&self.ctx),
            Arc::clone(&self.queue),
            Arc::clone(&self.job_semaphore),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_next() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timeout reached with {} jobs still running; they will be reclaimed",
                config.max_concurrent_jobs - self.job_semaphore.available_permits()
            );
        }

        heartbeat_task.abort();
        if let Err(e) = self.queue.deregister(&config.worker_id, &config.queues).await {
            warn!("Failed to deregister worker: {}", e);
        }

        info!("Job executor stopped");
        Ok(())
    }

    /// Take a concurrency slot, then wait for one message.
    async fn consume_next(&self) -> WorkerResult<()> {
        let permit = Arc::clone(&self.job_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

        let config = &self.ctx.config;
        let Some(delivery) = self
            .queue
            .consume(&config.worker_id, &config.queues, CONSUME_BLOCK_MS)
            .await?
        else {
            return Ok(());
        };

        debug!(message_id = %delivery.message_id, queue = %delivery.queue.as_str(), "Consumed job");

        let ctx = Arc::clone(&self.ctx);
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_job(ctx, queue, delivery).await;
        });

        Ok(())
    }

    /// Keep this worker in the liveness registry of every served queue.
    async fn heartbeat_loop(ctx: Arc<WorkerContext>, queue: Arc<JobQueue>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = queue.heartbeat(&ctx.config.worker_id, &ctx.config.queues).await {
                        warn!("Failed to send worker heartbeat: {}", e);
                    }
                }
            }
        }
    }

    /// Take over messages whose consumer stopped heartbeating them.
    async fn claim_loop(
        ctx: Arc<WorkerContext>,
        queue: Arc<JobQueue>,
        semaphore: Arc<Semaphore>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(ctx.config.claim_interval);
        let min_idle_ms = ctx.config.claim_min_idle.as_millis() as u64;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let free = semaphore.available_permits().min(CLAIM_BATCH);
                    if free == 0 {
                        continue;
                    }
                    match queue
                        .claim_pending(&ctx.config.worker_id, &ctx.config.queues, min_idle_ms, free)
                        .await
                    {
                        Ok(deliveries) if !deliveries.is_empty() => {
                            info!("Claimed {} pending jobs", deliveries.len());
                            for delivery in deliveries {
                                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                                    return;
                                };
                                let ctx = Arc::clone(&ctx);
                                let queue = Arc::clone(&queue);
                                tokio::spawn(async move {
                                    let _permit = permit;
                                    Self::execute_job(ctx, queue, delivery).await;
                                });
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to claim pending jobs: {}", e),
                    }
                }
            }
        }
    }

    /// Run one delivery to completion and settle it with the queue.
    ///
    /// The message is acked once the Coordinator holds the job's terminal
    /// state. If the failure report itself cannot be delivered the message
    /// stays pending and is reclaimed later.
    async fn execute_job(ctx: Arc<WorkerContext>, queue: Arc<JobQueue>, delivery: Delivery) {
        let job = &delivery.job;
        let kind = job.kind().as_str();
        let log = JobLogger::new(job.job_id(), job.kind(), job.user_id());
        let span = log.create_span();

        async {
            log.log_start(&format!(
                "queue={} delivery={}",
                delivery.queue.as_str(),
                delivery.delivery_count
            ));
            metrics::job_started(kind);
            let started = Instant::now();

            let keepalive = tokio::spawn(Self::keep_claimed(Arc::clone(&ctx), Arc::clone(&queue), delivery.clone()));
            let result = Self::run_guarded(&ctx, &delivery, &log).await;
            keepalive.abort();

            let elapsed = started.elapsed().as_secs_f64();
            let settled = match result {
                Ok(()) => {
                    log.log_completion(&format!("took {:.1}s", elapsed));
                    metrics::job_finished(kind, "succeeded", elapsed);
                    true
                }
                Err(WorkerError::AlreadyFinished) => {
                    info!("Job already finished, acknowledging redelivery");
                    metrics::job_finished(kind, "skipped", elapsed);
                    true
                }
                Err(e) => {
                    log.log_error(&e.to_string());
                    metrics::job_finished(kind, "failed", elapsed);
                    match tasks::report_failure(&ctx, job, &e).await {
                        Ok(()) => true,
                        Err(report_err) => {
                            metrics::report_failed(kind);
                            error!("Failed to report job failure, leaving message pending: {}", report_err);
                            false
                        }
                    }
                }
            };

            if settled {
                if let Err(e) = queue.ack(delivery.queue, &delivery.message_id).await {
                    error!("Failed to ack job: {}", e);
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run the task under the job timeout, turning a panic into a failure.
    ///
    /// A timed-out task is dropped mid-flight, so its scratch directory is
    /// removed here.
    async fn run_guarded(ctx: &WorkerContext, delivery: &Delivery, log: &JobLogger) -> WorkerResult<()> {
        let timeout = ctx.config.job_timeout;
        let task = AssertUnwindSafe(tasks::run(ctx, &delivery.job, log)).catch_unwind();

        match tokio::time::timeout(timeout, task).await {
            Err(_) => {
                tasks::cleanup_work_dir(&ctx.config.work_dir(delivery.job.job_id().as_str())).await;
                Err(WorkerError::Timeout(timeout.as_secs()))
            }
            Ok(Err(panic)) => Err(WorkerError::job_failed(format!(
                "worker panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Ok(Ok(result)) => result,
        }
    }

    /// Reset the message's idle time while the job runs so no other worker
    /// reclaims it.
    async fn keep_claimed(ctx: Arc<WorkerContext>, queue: Arc<JobQueue>, delivery: Delivery) {
        let mut interval = tokio::time::interval(ctx.config.job_heartbeat_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = queue
                .touch(&ctx.config.worker_id, delivery.queue, &delivery.message_id)
                .await
            {
                warn!(message_id = %delivery.message_id, "Failed to refresh job claim: {}", e);
            }
        }
    }

    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.ctx.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

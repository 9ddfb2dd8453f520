//! The Coordinator's view of the queue: route a job, then enqueue it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reel_models::{JobKind, QueueName};

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;
use crate::queue::JobQueue;
use crate::routing::select_queue;

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Queue a new job of `kind` should go to.
    async fn route(&self, kind: JobKind) -> QueueResult<QueueName>;

    async fn enqueue(&self, queue: QueueName, job: &QueueJob) -> QueueResult<()>;

    /// Readiness probe.
    async fn ping(&self) -> QueueResult<()>;
}

#[async_trait]
impl JobDispatcher for JobQueue {
    async fn route(&self, kind: JobKind) -> QueueResult<QueueName> {
        let live = self.live_queues().await?;
        Ok(select_queue(kind, |q| live.contains(&q)))
    }

    async fn enqueue(&self, queue: QueueName, job: &QueueJob) -> QueueResult<()> {
        JobQueue::enqueue(self, queue, job).await.map(|_| ())
    }

    async fn ping(&self) -> QueueResult<()> {
        JobQueue::ping(self).await
    }
}

/// Records enqueued jobs in memory.
#[derive(Default)]
pub struct MemoryDispatcher {
    live: Mutex<Vec<QueueName>>,
    enqueued: Mutex<Vec<(QueueName, QueueJob)>>,
    unavailable: AtomicBool,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_live(&self, queues: &[QueueName]) {
        *self.live.lock().unwrap_or_else(|p| p.into_inner()) = queues.to_vec();
    }

    /// Make every enqueue and ping fail, as if the broker were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn enqueued(&self) -> Vec<(QueueName, QueueJob)> {
        self.enqueued.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::connection_failed("queue unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl JobDispatcher for MemoryDispatcher {
    async fn route(&self, kind: JobKind) -> QueueResult<QueueName> {
        let live = self.live.lock().unwrap_or_else(|p| p.into_inner()).clone();
        Ok(select_queue(kind, |q| live.contains(&q)))
    }

    async fn enqueue(&self, queue: QueueName, job: &QueueJob) -> QueueResult<()> {
        self.check_available()?;
        let mut enqueued = self.enqueued.lock().unwrap_or_else(|p| p.into_inner());
        if enqueued.iter().any(|(_, j)| j.job_id() == job.job_id()) {
            return Err(QueueError::Duplicate(job.job_id().to_string()));
        }
        enqueued.push((queue, job.clone()));
        Ok(())
    }

    async fn ping(&self) -> QueueResult<()> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CompileJob;
    use reel_models::{JobId, ProjectId};

    #[tokio::test]
    async fn test_memory_dispatcher_routes_and_records() {
        let dispatcher = MemoryDispatcher::new();
        assert_eq!(dispatcher.route(JobKind::Compile).await.unwrap(), QueueName::Default);

        dispatcher.set_live(&[QueueName::Gpu]);
        let queue = dispatcher.route(JobKind::Compile).await.unwrap();
        assert_eq!(queue, QueueName::Gpu);

        let job = QueueJob::Compile(CompileJob::new(JobId::new(), "u1", ProjectId::new()));
        dispatcher.enqueue(queue, &job).await.unwrap();
        assert!(matches!(
            dispatcher.enqueue(queue, &job).await,
            Err(QueueError::Duplicate(_))
        ));
        assert_eq!(dispatcher.enqueued(), vec![(QueueName::Gpu, job)]);
    }

    #[tokio::test]
    async fn test_unavailable_dispatcher_fails() {
        let dispatcher = MemoryDispatcher::new();
        dispatcher.set_unavailable(true);
        assert!(dispatcher.ping().await.unwrap_err().is_transient());
    }
}

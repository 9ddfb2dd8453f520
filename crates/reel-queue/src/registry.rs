//! Worker liveness registry.
//!
//! Each queue has a sorted set of worker ids scored by the unix time of
//! their last heartbeat.

use chrono::Utc;
use reel_models::QueueName;
use tracing::debug;

use crate::error::QueueResult;
use crate::queue::JobQueue;

/// Seconds between worker heartbeats.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// A worker counts as live this long after its last heartbeat.
pub const WORKER_LIVENESS_SECS: u64 = 60;

/// Lowest heartbeat score that still counts as live at `now`.
pub fn liveness_cutoff(now_unix: i64) -> i64 {
    now_unix - WORKER_LIVENESS_SECS as i64
}

impl JobQueue {
    /// Record that `worker_id` is alive and serving `queues`.
    pub async fn heartbeat(&self, worker_id: &str, queues: &[QueueName]) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp();

        let mut pipe = redis::pipe();
        for queue in queues {
            let key = self.config.workers_key(*queue);
            pipe.cmd("ZADD").arg(&key).arg(now).arg(worker_id).ignore();
            pipe.cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg("-inf")
                .arg(format!("({}", liveness_cutoff(now)))
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        debug!(worker_id = %worker_id, "Heartbeat");
        Ok(())
    }

    /// Remove a worker on clean shutdown.
    pub async fn deregister(&self, worker_id: &str, queues: &[QueueName]) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for queue in queues {
            pipe.cmd("ZREM")
                .arg(self.config.workers_key(*queue))
                .arg(worker_id)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Number of workers with a recent heartbeat on `queue`.
    pub async fn live_workers(&self, queue: QueueName) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let cutoff = liveness_cutoff(Utc::now().timestamp());
        Ok(redis::cmd("ZCOUNT")
            .arg(self.config.workers_key(queue))
            .arg(cutoff)
            .arg("+inf")
            .query_async(&mut conn)
            .await?)
    }

    /// Queues that currently have at least one live worker.
    pub async fn live_queues(&self) -> QueueResult<Vec<QueueName>> {
        let mut live = Vec::new();
        for queue in QueueName::ALL {
            if self.live_workers(queue).await? > 0 {
                live.push(queue);
            }
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_window_covers_missed_heartbeats() {
        assert!(WORKER_LIVENESS_SECS >= 3 * HEARTBEAT_INTERVAL_SECS);
        assert_eq!(liveness_cutoff(1_000), 940);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_heartbeat_marks_queue_live() {
        use crate::queue::QueueConfig;

        let queue = JobQueue::new(QueueConfig {
            prefix: format!("reel-test-{}", reel_models::JobId::new()),
            ..QueueConfig::from_env()
        })
        .unwrap();

        assert!(queue.live_queues().await.unwrap().is_empty());
        queue.heartbeat("w1", &[QueueName::Cpu]).await.unwrap();
        assert_eq!(queue.live_workers(QueueName::Cpu).await.unwrap(), 1);
        assert_eq!(queue.live_queues().await.unwrap(), vec![QueueName::Cpu]);

        queue.deregister("w1", &[QueueName::Cpu]).await.unwrap();
        assert_eq!(queue.live_workers(QueueName::Cpu).await.unwrap(), 0);
    }
}

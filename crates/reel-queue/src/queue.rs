//! Job queue using Redis Streams.

use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use reel_models::QueueName;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::{Delivery, QueueJob};

/// How long an enqueued job id blocks a second enqueue.
const DEDUP_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub redis_url: String,
    /// Prefix for every key the queue owns.
    pub prefix: String,
    pub consumer_group: String,
    /// Deliveries after which a message is dead-lettered.
    pub max_deliveries: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "reel".to_string(),
            consumer_group: "reel:workers".to_string(),
            max_deliveries: 5,
        }
    }
}

impl QueueConfig {
    /// Reads `REDIS_URL`, `QUEUE_PREFIX`, `QUEUE_CONSUMER_GROUP` and
    /// `QUEUE_MAX_DELIVERIES`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            prefix: std::env::var("QUEUE_PREFIX").unwrap_or(defaults.prefix),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            max_deliveries: std::env::var("QUEUE_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_deliveries),
        }
    }

    pub fn stream_name(&self, queue: QueueName) -> String {
        format!("{}:jobs:{}", self.prefix, queue.as_str())
    }

    pub fn dlq_stream_name(&self) -> String {
        format!("{}:dlq", self.prefix)
    }

    pub fn workers_key(&self, queue: QueueName) -> String {
        format!("{}:workers:{}", self.prefix, queue.as_str())
    }

    fn dedup_key(&self, job: &QueueJob) -> String {
        format!("{}:dedup:{}", self.prefix, job.idempotency_key())
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    pub(crate) config: QueueConfig,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub(crate) async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Create the consumer group on every queue stream.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        for queue in QueueName::ALL {
            let stream = self.config.stream_name(queue);
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(()) => info!(stream = %stream, "Created consumer group {}", self.config.consumer_group),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!(stream = %stream, "Consumer group already exists");
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }

        Ok(())
    }

    /// Append a job to `queue`. Returns the stream message id.
    pub async fn enqueue(&self, queue: QueueName, job: &QueueJob) -> QueueResult<String> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(job)?;

        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.config.dedup_key(job))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(DEDUP_TTL_SECS)
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            warn!(job_id = %job.job_id(), "Duplicate enqueue rejected");
            return Err(QueueError::Duplicate(job.job_id().to_string()));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(self.config.stream_name(queue))
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("kind")
            .arg(job.kind().as_str())
            .query_async(&mut conn)
            .await?;

        info!(
            job_id = %job.job_id(),
            queue = %queue,
            message_id = %message_id,
            "Enqueued job"
        );
        Ok(message_id)
    }

    /// Next message for this consumer, strictly by queue priority.
    ///
    /// Every served queue is polled without blocking in priority order; only
    /// when all are empty does the call block (up to `block_ms`) across them.
    pub async fn consume(
        &self,
        consumer: &str,
        queues: &[QueueName],
        block_ms: u64,
    ) -> QueueResult<Option<Delivery>> {
        let mut ordered = queues.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut conn = self.conn().await?;
        for queue in &ordered {
            if let Some(delivery) = self
                .read_group(&mut conn, consumer, std::slice::from_ref(queue), None)
                .await?
            {
                return Ok(Some(delivery));
            }
        }
        self.read_group(&mut conn, consumer, &ordered, Some(block_ms))
            .await
    }

    async fn read_group(
        &self,
        conn: &mut MultiplexedConnection,
        consumer: &str,
        queues: &[QueueName],
        block_ms: Option<u64>,
    ) -> QueueResult<Option<Delivery>> {
        if queues.is_empty() {
            return Ok(None);
        }

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1);
        if let Some(ms) = block_ms {
            cmd.arg("BLOCK").arg(ms);
        }
        cmd.arg("STREAMS");
        for queue in queues {
            cmd.arg(self.config.stream_name(*queue));
        }
        for _ in queues {
            cmd.arg(">");
        }

        let reply: Option<StreamReadReply> = cmd.query_async(conn).await?;
        let Some(reply) = reply else {
            return Ok(None);
        };

        // With several streams the reply may carry one entry per stream;
        // keep the highest-priority one and leave the rest pending for
        // re-claim.
        let mut entries: Vec<(QueueName, StreamId)> = Vec::new();
        for key in reply.keys {
            let Some(queue) = self.queue_for_stream(&key.key) else {
                continue;
            };
            for entry in key.ids {
                entries.push((queue, entry));
            }
        }
        entries.sort_by_key(|(queue, _)| *queue);

        let mut first = None;
        for (queue, entry) in entries {
            if first.is_some() {
                debug!(message_id = %entry.id, queue = %queue, "Extra entry left pending");
                continue;
            }
            first = self.decode_entry(queue, entry, 1).await?;
        }
        Ok(first)
    }

    fn queue_for_stream(&self, stream: &str) -> Option<QueueName> {
        QueueName::ALL
            .into_iter()
            .find(|q| self.config.stream_name(*q) == stream)
    }

    /// Parse a stream entry, dead-lettering it when the payload is unusable.
    async fn decode_entry(&self, queue: QueueName, entry: StreamId, delivery_count: u64) -> QueueResult<Option<Delivery>> {
        let payload = match entry.map.get("job") {
            Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).to_string(),
            Some(redis::Value::SimpleString(s)) => s.clone(),
            _ => String::new(),
        };

        match serde_json::from_str::<QueueJob>(&payload) {
            Ok(job) => Ok(Some(Delivery {
                message_id: entry.id,
                queue,
                job,
                delivery_count,
            })),
            Err(e) => {
                warn!(message_id = %entry.id, queue = %queue, "Malformed job payload: {}", e);
                self.dead_letter_raw(queue, &entry.id, &payload, &format!("malformed payload: {}", e))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Take over messages idle longer than `min_idle_ms` (their consumer is
    /// presumed dead). Messages past `max_deliveries` are dead-lettered
    /// instead of returned.
    pub async fn claim_pending(
        &self,
        consumer: &str,
        queues: &[QueueName],
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;
        let mut claimed = Vec::new();

        for queue in queues {
            let stream = self.config.stream_name(*queue);
            let pending: StreamPendingCountReply = redis::cmd("XPENDING")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg("IDLE")
                .arg(min_idle_ms)
                .arg("-")
                .arg("+")
                .arg(count)
                .query_async(&mut conn)
                .await?;

            if pending.ids.is_empty() {
                continue;
            }

            let deliveries: HashMap<String, u64> = pending
                .ids
                .iter()
                .map(|p| (p.id.clone(), p.times_delivered as u64))
                .collect();

            let mut cmd = redis::cmd("XCLAIM");
            cmd.arg(&stream)
                .arg(&self.config.consumer_group)
                .arg(consumer)
                .arg(min_idle_ms);
            for id in deliveries.keys() {
                cmd.arg(id);
            }
            let reply: StreamClaimReply = cmd.query_async(&mut conn).await?;

            for entry in reply.ids {
                let delivery_count = deliveries.get(&entry.id).copied().unwrap_or(0) + 1;
                let Some(delivery) = self.decode_entry(*queue, entry, delivery_count).await? else {
                    continue;
                };

                if delivery.delivery_count > self.config.max_deliveries {
                    let reason = format!("exceeded {} deliveries", self.config.max_deliveries);
                    self.dead_letter(&delivery, &reason).await?;
                    continue;
                }

                info!(
                    job_id = %delivery.job.job_id(),
                    queue = %queue,
                    delivery_count = delivery.delivery_count,
                    "Claimed pending job"
                );
                claimed.push(delivery);
            }
        }

        Ok(claimed)
    }

    /// Acknowledge and delete a finished message.
    pub async fn ack(&self, queue: QueueName, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let stream = self.config.stream_name(queue);

        redis::cmd("XACK")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        redis::cmd("XDEL")
            .arg(&stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!(queue = %queue, message_id = %message_id, "Acknowledged message");
        Ok(())
    }

    /// Reset a pending message's idle time so `claim_pending` on other
    /// workers leaves it alone while it is still being processed.
    pub async fn touch(&self, consumer: &str, queue: QueueName, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("XCLAIM")
            .arg(self.config.stream_name(queue))
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Move a delivery to the dead-letter stream.
    pub async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let payload = serde_json::to_string(&delivery.job)?;
        self.dead_letter_raw(delivery.queue, &delivery.message_id, &payload, reason)
            .await?;
        warn!(
            job_id = %delivery.job.job_id(),
            queue = %delivery.queue,
            "Moved job to dead-letter stream: {}",
            reason
        );
        Ok(())
    }

    async fn dead_letter_raw(&self, queue: QueueName, message_id: &str, payload: &str, reason: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("XADD")
            .arg(self.config.dlq_stream_name())
            .arg("*")
            .arg("job")
            .arg(payload)
            .arg("error")
            .arg(reason)
            .arg("queue")
            .arg(queue.as_str())
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        metrics::counter!("reel_queue_dead_letters_total", "queue" => queue.as_str())
            .increment(1);
        self.ack(queue, message_id).await
    }

    pub async fn len(&self, queue: QueueName) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(redis::cmd("XLEN")
            .arg(self.config.stream_name(queue))
            .query_async(&mut conn)
            .await?)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(redis::cmd("XLEN")
            .arg(self.config.dlq_stream_name())
            .query_async(&mut conn)
            .await?)
    }

    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

//! Prioritized job queue on Redis Streams.
//!
//! This crate provides:
//! - One stream per named queue (`gpu` > `cpu` > `default`) with a shared
//!   consumer group
//! - Strict-priority consumption, crash recovery via `XCLAIM` and a
//!   dead-letter stream
//! - A worker liveness registry used to route new jobs
//! - An in-memory dispatcher for tests and local runs

pub mod dispatch;
pub mod error;
pub mod job;
pub mod queue;
pub mod registry;
pub mod routing;

pub use dispatch::{JobDispatcher, MemoryDispatcher};
pub use error::{QueueError, QueueResult};
pub use job::{CompileJob, Delivery, DownloadJob, QueueJob};
pub use queue::{JobQueue, QueueConfig};
pub use registry::{HEARTBEAT_INTERVAL_SECS, WORKER_LIVENESS_SECS};
pub use routing::select_queue;

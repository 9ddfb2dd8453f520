//! Queue selection for new jobs.

use reel_models::{JobKind, QueueName};

/// Queues a job kind may run on, highest priority first.
pub fn candidate_queues(kind: JobKind) -> &'static [QueueName] {
    match kind {
        JobKind::Compile => &[QueueName::Gpu, QueueName::Cpu, QueueName::Default],
        // Downloads are network bound and never take a GPU slot.
        JobKind::Download => &[QueueName::Cpu, QueueName::Default],
    }
}

/// Pick the highest-priority candidate queue with a live worker, falling
/// back to `default` when none is live.
pub fn select_queue(kind: JobKind, is_live: impl Fn(QueueName) -> bool) -> QueueName {
    candidate_queues(kind)
        .iter()
        .copied()
        .find(|q| is_live(*q))
        .unwrap_or(QueueName::Default)
}

//! Render and storage quota accounting.
//!
//! Remaining render time is `limit - used - reserved` for the current month.
//! Compiles reserve their estimate in the month's ledger at pre-flight, and
//! the reservation is dropped when the actual usage is recorded or the job
//! fails. Ledger writes carry the version they were read at, so two
//! concurrent pre-flights cannot both spend the same seconds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reel_models::api::QuotaExceededDetail;
use reel_models::{
    month_key, ProcessingJob, ProjectId, RenderQuota, RenderUsage, StorageUsage, TierLimits, UserQuota,
};
use reel_store::{Store, StoreError, Versioned};
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Relative estimate error above which a finished compile is flagged.
const DRIFT_WARN_RATIO: f64 = 0.10;

const LEDGER_BACKOFF_BASE_MS: u64 = 10;

#[derive(Clone)]
pub struct QuotaService {
    store: Arc<dyn Store>,
    max_attempts: u32,
}

impl QuotaService {
    pub fn new(store: Arc<dyn Store>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn tier_limits(&self, user_id: &str) -> ApiResult<TierLimits> {
        Ok(self.store.get_plan(user_id).await?.limits())
    }

    pub async fn user_quota(&self, user_id: &str) -> ApiResult<UserQuota> {
        let limits = self.tier_limits(user_id).await?;
        let month = month_key(Utc::now());

        let ledger = self.store.get_ledger(user_id, &month).await?;
        let used = self.store.render_used(user_id, &month).await?;
        let storage_used = self.store.storage_used(user_id).await?;

        Ok(UserQuota {
            tier: limits.tier,
            storage: StorageUsage::new(storage_used, limits.storage_bytes),
            render: RenderQuota::new(
                month,
                limits.monthly_render_seconds,
                used,
                ledger.value.reserved_seconds(),
            ),
        })
    }

    /// Reserve `estimated` seconds for `job`, or fail with `QuotaExceeded`.
    pub async fn reserve(&self, job: &ProcessingJob, estimated: u64) -> ApiResult<RenderQuota> {
        let user_id = job.user_id.as_str();
        let limits = self.tier_limits(user_id).await?;
        let month = month_key(job.created_at);

        for attempt in 0..self.max_attempts {
            // Ledger before usage: a usage recorded in between is counted
            // twice rather than not at all, and the ledger write then fails.
            let Versioned { value: mut ledger, version } = self.store.get_ledger(user_id, &month).await?;
            let used = self.store.render_used(user_id, &month).await?;

            let quota = RenderQuota::new(
                month.clone(),
                limits.monthly_render_seconds,
                used,
                ledger.reserved_seconds(),
            );
            if !quota.allows(estimated) {
                metrics::record_quota_rejection(limits.tier.as_str());
                info!(
                    user_id = %user_id,
                    estimated = estimated,
                    remaining = quota.remaining_seconds,
                    "Compile rejected by render quota"
                );
                return Err(ApiError::QuotaExceeded(QuotaExceededDetail {
                    remaining: quota.remaining_seconds,
                    limit: limits.monthly_render_seconds,
                    estimated,
                }));
            }

            ledger.month = month.clone();
            ledger.reserve(&job.id, estimated);
            match self.store.put_ledger(user_id, &ledger, version.as_deref()).await {
                Ok(()) => {
                    debug!(user_id = %user_id, job_id = %job.id, seconds = estimated, "Render time reserved");
                    return Ok(RenderQuota::new(
                        month,
                        limits.monthly_render_seconds,
                        used,
                        ledger.reserved_seconds(),
                    ));
                }
                Err(e) if e.is_conflict() => {
                    metrics::record_ledger_conflict();
                    debug!(user_id = %user_id, attempt = attempt + 1, "Render ledger changed concurrently, retrying");
                    tokio::time::sleep(ledger_backoff(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(user_id = %user_id, job_id = %job.id, "Render ledger stayed contended");
        Err(ApiError::unavailable("Render quota is busy, please retry"))
    }

    /// Drop `job`'s reservation. Returns the released seconds, `None` when
    /// nothing was reserved.
    pub async fn release(&self, job: &ProcessingJob) -> ApiResult<Option<u64>> {
        let user_id = job.user_id.as_str();
        let month = month_key(job.created_at);

        for attempt in 0..self.max_attempts {
            let Versioned { value: mut ledger, version } = self.store.get_ledger(user_id, &month).await?;
            let Some(seconds) = ledger.release(&job.id) else {
                return Ok(None);
            };

            match self.store.put_ledger(user_id, &ledger, version.as_deref()).await {
                Ok(()) => {
                    debug!(user_id = %user_id, job_id = %job.id, seconds = seconds, "Render reservation released");
                    return Ok(Some(seconds));
                }
                Err(e) if e.is_conflict() => {
                    metrics::record_ledger_conflict();
                    tokio::time::sleep(ledger_backoff(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ApiError::unavailable("Render quota is busy, please retry"))
    }

    /// Append the actual usage of a finished compile and drop its reservation.
    pub async fn record_usage(
        &self,
        job: &ProcessingJob,
        project_id: ProjectId,
        seconds: u64,
    ) -> ApiResult<RenderUsage> {
        let usage = RenderUsage::new(job.user_id.clone(), job.id.clone(), project_id, seconds);
        match self.store.create_render_usage(&usage).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {
                return Err(ApiError::conflict(format!(
                    "Render usage for job {} is already recorded",
                    job.id
                )))
            }
            Err(e) => return Err(e.into()),
        }
        metrics::record_render_seconds(seconds);

        if let Some(estimated) = job.reserved_render_secs {
            check_drift(job, estimated, seconds);
        }

        if let Err(e) = self.release(job).await {
            // The job's terminal report releases again.
            warn!(job_id = %job.id, "Failed to release render reservation after usage: {}", e);
        }

        Ok(usage)
    }
}

fn check_drift(job: &ProcessingJob, estimated: u64, actual: u64) {
    if estimated == 0 {
        return;
    }
    let drift = (actual as f64 - estimated as f64).abs() / estimated as f64;
    if drift > DRIFT_WARN_RATIO {
        metrics::record_estimate_drift();
        warn!(
            job_id = %job.id,
            estimated = estimated,
            actual = actual,
            drift_pct = (drift * 100.0).round(),
            "Render estimate drifted from actual duration"
        );
    }
}

fn ledger_backoff(attempt: u32) -> Duration {
    let cap = LEDGER_BACKOFF_BASE_MS.saturating_mul(1 << attempt.min(6));
    Duration::from_millis(rand::rng().random_range(LEDGER_BACKOFF_BASE_MS..=cap.max(LEDGER_BACKOFF_BASE_MS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{JobKind, PlanTier, QueueName};
    use reel_store::MemoryStore;

    fn compile_job(user_id: &str) -> ProcessingJob {
        ProcessingJob::new(user_id, JobKind::Compile, "p1", QueueName::Default)
    }

    #[tokio::test]
    async fn test_reserve_rejects_over_limit() {
        let store = Arc::new(MemoryStore::new());
        let quota = QuotaService::new(store, 3);

        let err = quota.reserve(&compile_job("u1"), 1200).await.unwrap_err();
        match err {
            ApiError::QuotaExceeded(detail) => {
                assert_eq!(detail.remaining, 600);
                assert_eq!(detail.limit, 600);
                assert_eq!(detail.estimated, 1200);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reservations_count_against_remaining() {
        let store = Arc::new(MemoryStore::new());
        let quota = QuotaService::new(store, 3);

        let first = compile_job("u1");
        let after = quota.reserve(&first, 400).await.unwrap();
        assert_eq!(after.remaining_seconds, 200);

        assert!(matches!(
            quota.reserve(&compile_job("u1"), 300).await,
            Err(ApiError::QuotaExceeded(_))
        ));

        assert_eq!(quota.release(&first).await.unwrap(), Some(400));
        assert_eq!(quota.release(&first).await.unwrap(), None);
        assert!(quota.reserve(&compile_job("u1"), 300).await.is_ok());
    }

    #[tokio::test]
    async fn test_record_usage_replaces_reservation() {
        let store = Arc::new(MemoryStore::new());
        store.set_plan("u1", PlanTier::Pro);
        let quota = QuotaService::new(store.clone(), 3);

        let mut job = compile_job("u1");
        quota.reserve(&job, 100).await.unwrap();
        job.reserved_render_secs = Some(100);

        quota.record_usage(&job, ProjectId::from_string("p1"), 130).await.unwrap();
        let current = quota.user_quota("u1").await.unwrap();
        assert_eq!(current.render.used_seconds, 130);
        assert_eq!(current.render.reserved_seconds, 0);
        assert_eq!(current.render.remaining_seconds, 7_200 - 130);

        assert!(matches!(
            quota.record_usage(&job, ProjectId::from_string("p1"), 130).await,
            Err(ApiError::Conflict(_))
        ));
        assert_eq!(store.usage_records("u1").len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_cannot_overdraft() {
        let store = Arc::new(MemoryStore::new());
        let quota = QuotaService::new(store, 10);

        let (first, second) = (compile_job("u1"), compile_job("u1"));
        let (a, b) = tokio::join!(quota.reserve(&first, 400), quota.reserve(&second, 400));
        assert_eq!(
            [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "exactly one reservation fits in 600 seconds"
        );
    }
}

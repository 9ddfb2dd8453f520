//! Render-time accounting.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{JobId, ProjectId};
use crate::plan::{PlanTier, StorageUsage};

/// Calendar month key (`YYYY-MM`) used to bucket render usage.
pub fn month_key(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// First instant of the calendar month containing `at`.
pub fn month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(at)
}

/// One finished compile's actual rendered duration. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderUsage {
    /// Same as `job_id`, which makes recording call-once.
    pub id: String,
    pub user_id: String,
    pub job_id: JobId,
    pub project_id: ProjectId,
    pub seconds: u64,
    pub recorded_at: DateTime<Utc>,
}

impl RenderUsage {
    pub fn new(user_id: impl Into<String>, job_id: JobId, project_id: ProjectId, seconds: u64) -> Self {
        Self {
            id: job_id.as_str().to_string(),
            user_id: user_id.into(),
            job_id,
            project_id,
            seconds,
            recorded_at: Utc::now(),
        }
    }
}

/// Render seconds reserved by compiles that passed pre-flight but have not
/// finished, for one user and one month.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenderLedger {
    pub month: String,
    #[serde(default)]
    pub reservations: BTreeMap<String, u64>,
}

impl RenderLedger {
    pub fn new(month: impl Into<String>) -> Self {
        Self {
            month: month.into(),
            reservations: BTreeMap::new(),
        }
    }

    pub fn reserved_seconds(&self) -> u64 {
        self.reservations.values().copied().sum()
    }

    pub fn reserve(&mut self, job_id: &JobId, seconds: u64) {
        self.reservations.insert(job_id.as_str().to_string(), seconds);
    }

    /// Drop a reservation, returning what it held.
    pub fn release(&mut self, job_id: &JobId) -> Option<u64> {
        self.reservations.remove(job_id.as_str())
    }
}

/// Render allowance for the current month.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RenderQuota {
    pub month: String,
    pub limit_seconds: u64,
    pub used_seconds: u64,
    pub reserved_seconds: u64,
    pub remaining_seconds: u64,
}

impl RenderQuota {
    pub fn new(month: impl Into<String>, limit_seconds: u64, used_seconds: u64, reserved_seconds: u64) -> Self {
        Self {
            month: month.into(),
            limit_seconds,
            used_seconds,
            reserved_seconds,
            remaining_seconds: limit_seconds
                .saturating_sub(used_seconds)
                .saturating_sub(reserved_seconds),
        }
    }

    pub fn allows(&self, estimated_seconds: u64) -> bool {
        estimated_seconds <= self.remaining_seconds
    }
}

/// Combined storage and render quota for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UserQuota {
    pub tier: PlanTier,
    pub storage: StorageUsage,
    pub render: RenderQuota,
}

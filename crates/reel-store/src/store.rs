//! The persistence seam used by the Coordinator.

use async_trait::async_trait;
use reel_models::{
    Clip, ClipId, JobId, MediaFile, MediaId, PlanTier, ProcessingJob, Project, ProjectId,
    RenderLedger, RenderUsage,
};
use sha2::{Digest, Sha256};

use crate::error::StoreResult;

/// A value read together with the version needed to overwrite it.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    /// `None` when the record does not exist yet.
    pub version: Option<String>,
}

/// Document id of the dedup-index entry for a source key.
pub fn source_key_hash(source_key: &str) -> String {
    format!("{:x}", Sha256::digest(source_key.as_bytes()))
}

/// Per-user persistence. Every lookup is scoped by the owning user id.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_project(&self, user_id: &str, project_id: &ProjectId) -> StoreResult<Option<Project>>;

    /// Insert or replace.
    async fn put_project(&self, project: &Project) -> StoreResult<()>;

    /// Whether any of the user's projects names `media_id` as its output.
    async fn is_project_output(&self, user_id: &str, media_id: &MediaId) -> StoreResult<bool>;

    async fn get_clip(&self, user_id: &str, clip_id: &ClipId) -> StoreResult<Option<Clip>>;

    async fn put_clip(&self, clip: &Clip) -> StoreResult<()>;

    /// All clips of a project, in no particular order.
    async fn list_clips(&self, user_id: &str, project_id: &ProjectId) -> StoreResult<Vec<Clip>>;

    async fn get_media(&self, user_id: &str, media_id: &MediaId) -> StoreResult<Option<MediaFile>>;

    /// Found media only; missing ids are left out.
    async fn get_media_batch(&self, user_id: &str, media_ids: &[MediaId]) -> StoreResult<Vec<MediaFile>>;

    async fn put_media(&self, media: &MediaFile) -> StoreResult<()>;

    /// Remove a media record. Removing a missing record succeeds.
    async fn delete_media(&self, user_id: &str, media_id: &MediaId) -> StoreResult<()>;

    /// Insert a media file, keeping `source_key` unique per user.
    ///
    /// When another media file already owns the key it is returned with
    /// `true` and `media` is not stored.
    async fn create_media_deduped(&self, media: &MediaFile) -> StoreResult<(MediaFile, bool)>;

    async fn find_media_by_source(&self, user_id: &str, source_key: &str) -> StoreResult<Option<MediaFile>>;

    /// Sum of the user's media sizes.
    async fn storage_used(&self, user_id: &str) -> StoreResult<u64>;

    async fn get_job(&self, user_id: &str, job_id: &JobId) -> StoreResult<Option<ProcessingJob>>;

    async fn put_job(&self, job: &ProcessingJob) -> StoreResult<()>;

    /// The user's plan; users without a record are on the free tier.
    async fn get_plan(&self, user_id: &str) -> StoreResult<PlanTier>;

    /// The month's ledger, empty and unversioned when none exists.
    async fn get_ledger(&self, user_id: &str, month: &str) -> StoreResult<Versioned<RenderLedger>>;

    /// Write a ledger read at `version`.
    ///
    /// `None` creates the ledger and fails with `Conflict` if one appeared
    /// meanwhile; `Some` fails with `Conflict` when the stored version moved.
    async fn put_ledger(&self, user_id: &str, ledger: &RenderLedger, version: Option<&str>) -> StoreResult<()>;

    /// Append a usage record. Fails with `AlreadyExists` for a job that was
    /// already recorded.
    async fn create_render_usage(&self, usage: &RenderUsage) -> StoreResult<()>;

    /// Render seconds recorded in `month` (`YYYY-MM`).
    async fn render_used(&self, user_id: &str, month: &str) -> StoreResult<u64>;

    /// Readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_key_hash_is_path_safe() {
        let hash = source_key_hash("https://youtube.com/watch?v=abc");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, source_key_hash("https://youtube.com/watch?v=abc"));
        assert_ne!(hash, source_key_hash("https://youtube.com/watch?v=abd"));
    }
}

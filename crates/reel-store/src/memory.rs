//! In-memory `Store` for tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reel_models::{
    month_key, Clip, ClipId, JobId, MediaFile, MediaId, PlanTier, ProcessingJob, Project,
    ProjectId, RenderLedger, RenderUsage,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{Store, Versioned};

type Key = (String, String);

fn key(user_id: &str, id: &str) -> Key {
    (user_id.to_string(), id.to_string())
}

#[derive(Default)]
struct Inner {
    projects: HashMap<Key, Project>,
    clips: HashMap<Key, Clip>,
    media: HashMap<Key, MediaFile>,
    /// (user, source key) -> media id
    sources: HashMap<Key, MediaId>,
    jobs: HashMap<Key, ProcessingJob>,
    plans: HashMap<String, PlanTier>,
    /// (user, month) -> (ledger, version)
    ledgers: HashMap<Key, (RenderLedger, u64)>,
    usage: HashMap<Key, RenderUsage>,
}

/// All state behind one mutex, so every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_plan(&self, user_id: &str, tier: PlanTier) {
        self.lock().plans.insert(user_id.to_string(), tier);
    }

    /// Recorded usage rows for a user, for assertions.
    pub fn usage_records(&self, user_id: &str) -> Vec<RenderUsage> {
        self.lock()
            .usage
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, u)| u.clone())
            .collect()
    }

    pub fn job_count(&self, user_id: &str) -> usize {
        self.lock().jobs.keys().filter(|(user, _)| user == user_id).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the maps half-written.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_project(&self, user_id: &str, project_id: &ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.lock().projects.get(&key(user_id, project_id.as_str())).cloned())
    }

    async fn put_project(&self, project: &Project) -> StoreResult<()> {
        self.lock()
            .projects
            .insert(key(&project.user_id, project.id.as_str()), project.clone());
        Ok(())
    }

    async fn get_clip(&self, user_id: &str, clip_id: &ClipId) -> StoreResult<Option<Clip>> {
        Ok(self.lock().clips.get(&key(user_id, clip_id.as_str())).cloned())
    }

    async fn put_clip(&self, clip: &Clip) -> StoreResult<()> {
        self.lock()
            .clips
            .insert(key(&clip.user_id, clip.id.as_str()), clip.clone());
        Ok(())
    }

    async fn is_project_output(&self, user_id: &str, media_id: &MediaId) -> StoreResult<bool> {
        Ok(self
            .lock()
            .projects
            .values()
            .any(|p| p.user_id == user_id && p.output_media_id.as_ref() == Some(media_id)))
    }

    async fn list_clips(&self, user_id: &str, project_id: &ProjectId) -> StoreResult<Vec<Clip>> {
        Ok(self
            .lock()
            .clips
            .values()
            .filter(|c| c.user_id == user_id && &c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn get_media(&self, user_id: &str, media_id: &MediaId) -> StoreResult<Option<MediaFile>> {
        Ok(self.lock().media.get(&key(user_id, media_id.as_str())).cloned())
    }

    async fn get_media_batch(&self, user_id: &str, media_ids: &[MediaId]) -> StoreResult<Vec<MediaFile>> {
        let inner = self.lock();
        Ok(media_ids
            .iter()
            .filter_map(|id| inner.media.get(&key(user_id, id.as_str())).cloned())
            .collect())
    }

    async fn put_media(&self, media: &MediaFile) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(source_key) = &media.source_key {
            inner
                .sources
                .insert(key(&media.user_id, source_key), media.id.clone());
        }
        inner
            .media
            .insert(key(&media.user_id, media.id.as_str()), media.clone());
        Ok(())
    }

    async fn create_media_deduped(&self, media: &MediaFile) -> StoreResult<(MediaFile, bool)> {
        let mut inner = self.lock();
        if let Some(source_key) = &media.source_key {
            let index_key = key(&media.user_id, source_key);
            let existing = inner
                .sources
                .get(&index_key)
                .and_then(|id| inner.media.get(&key(&media.user_id, id.as_str())))
                .cloned();
            if let Some(existing) = existing {
                return Ok((existing, true));
            }
            inner.sources.insert(index_key, media.id.clone());
        }
        inner
            .media
            .insert(key(&media.user_id, media.id.as_str()), media.clone());
        Ok((media.clone(), false))
    }

    async fn find_media_by_source(&self, user_id: &str, source_key: &str) -> StoreResult<Option<MediaFile>> {
        let inner = self.lock();
        Ok(inner
            .sources
            .get(&key(user_id, source_key))
            .and_then(|id| inner.media.get(&key(user_id, id.as_str())))
            .cloned())
    }

    async fn delete_media(&self, user_id: &str, media_id: &MediaId) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(media) = inner.media.remove(&key(user_id, media_id.as_str())) {
            if let Some(source_key) = &media.source_key {
                inner.sources.remove(&key(user_id, source_key));
            }
        }
        Ok(())
    }

    async fn storage_used(&self, user_id: &str) -> StoreResult<u64> {
        Ok(self
            .lock()
            .media
            .values()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.size_bytes)
            .sum())
    }

    async fn get_job(&self, user_id: &str, job_id: &JobId) -> StoreResult<Option<ProcessingJob>> {
        Ok(self.lock().jobs.get(&key(user_id, job_id.as_str())).cloned())
    }

    async fn put_job(&self, job: &ProcessingJob) -> StoreResult<()> {
        self.lock()
            .jobs
            .insert(key(&job.user_id, job.id.as_str()), job.clone());
        Ok(())
    }

    async fn get_plan(&self, user_id: &str) -> StoreResult<PlanTier> {
        Ok(self.lock().plans.get(user_id).copied().unwrap_or_default())
    }

    async fn get_ledger(&self, user_id: &str, month: &str) -> StoreResult<Versioned<RenderLedger>> {
        Ok(match self.lock().ledgers.get(&key(user_id, month)) {
            Some((ledger, version)) => Versioned {
                value: ledger.clone(),
                version: Some(version.to_string()),
            },
            None => Versioned {
                value: RenderLedger::new(month),
                version: None,
            },
        })
    }

    async fn put_ledger(&self, user_id: &str, ledger: &RenderLedger, version: Option<&str>) -> StoreResult<()> {
        let mut inner = self.lock();
        let slot = key(user_id, &ledger.month);
        let current = inner.ledgers.get(&slot).map(|(_, v)| v.to_string());
        if current.as_deref() != version {
            return Err(StoreError::conflict(format!(
                "render ledger {}/{}",
                user_id, ledger.month
            )));
        }
        let next = current.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0) + 1;
        inner.ledgers.insert(slot, (ledger.clone(), next));
        Ok(())
    }

    async fn create_render_usage(&self, usage: &RenderUsage) -> StoreResult<()> {
        let mut inner = self.lock();
        let slot = key(&usage.user_id, &usage.id);
        if inner.usage.contains_key(&slot) {
            return Err(StoreError::AlreadyExists(format!("render usage {}", usage.id)));
        }
        inner.usage.insert(slot, usage.clone());
        Ok(())
    }

    async fn render_used(&self, user_id: &str, month: &str) -> StoreResult<u64> {
        Ok(self
            .lock()
            .usage
            .values()
            .filter(|u| u.user_id == user_id && month_key(u.recorded_at) == month)
            .map(|u| u.seconds)
            .sum())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

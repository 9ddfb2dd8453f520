//! Firestore-backed `Store`.
//!
//! Layout, all under `users/{uid}`:
//!
//! | collection | document id | contents |
//! |---|---|---|
//! | `projects` | project id | `Project` |
//! | `clips` | clip id | `Clip` |
//! | `media` | media id | `MediaFile` |
//! | `media_sources` | sha256(source key) | `{media_id, source_key}` dedup index |
//! | `jobs` | job id | `ProcessingJob` |
//! | `render_ledger` | `YYYY-MM` | `RenderLedger` |
//! | `render_usage` | job id | `RenderUsage` plus `month` |
//!
//! The user document itself carries the `plan` field.

use async_trait::async_trait;
use reel_models::{
    month_key, Clip, ClipId, JobId, MediaFile, MediaId, PlanTier, ProcessingJob, Project,
    ProjectId, RenderLedger, RenderUsage,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, StoreError, StoreResult};
use crate::metrics::record_conflict;
use crate::store::{source_key_hash, Store, Versioned};
use crate::types::{decode, encode, StructuredQuery, Value};

const USERS: &str = "users";
const PROJECTS: &str = "projects";
const CLIPS: &str = "clips";
const MEDIA: &str = "media";
const MEDIA_SOURCES: &str = "media_sources";
const JOBS: &str = "jobs";
const RENDER_LEDGER: &str = "render_ledger";
const RENDER_USAGE: &str = "render_usage";

/// Page size used when summing a user's media.
const LIST_PAGE_SIZE: u32 = 300;

#[derive(Debug, Serialize, Deserialize)]
struct SourceIndexEntry {
    media_id: MediaId,
    source_key: String,
}

#[derive(Serialize)]
struct UsageRow<'a> {
    #[serde(flatten)]
    usage: &'a RenderUsage,
    month: String,
}

#[derive(Clone)]
pub struct FirestoreStore {
    client: FirestoreClient,
}

impl FirestoreStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn from_env() -> StoreResult<Self> {
        Ok(Self::new(FirestoreClient::from_env().await?))
    }

    fn collection(user_id: &str, name: &str) -> String {
        format!("{}/{}/{}", USERS, user_id, name)
    }

    async fn get_model<T: DeserializeOwned>(&self, user_id: &str, name: &str, id: &str) -> StoreResult<Option<T>> {
        let collection = Self::collection(user_id, name);
        let doc = self
            .client
            .with_retry("get_document", || self.client.get_document(&collection, id))
            .await?;
        doc.map(|d| decode(&d)).transpose()
    }

    async fn set_model<T: Serialize>(&self, user_id: &str, name: &str, id: &str, model: &T) -> StoreResult<()> {
        let collection = Self::collection(user_id, name);
        let fields = encode(model)?;
        self.client
            .with_retry("set_document", || {
                self.client.set_document(&collection, id, fields.clone())
            })
            .await?;
        Ok(())
    }

    async fn read_source_index(&self, user_id: &str, hash: &str) -> StoreResult<Option<SourceIndexEntry>> {
        self.get_model(user_id, MEDIA_SOURCES, hash).await
    }
}

#[async_trait]
impl Store for FirestoreStore {
    async fn get_project(&self, user_id: &str, project_id: &ProjectId) -> StoreResult<Option<Project>> {
        self.get_model(user_id, PROJECTS, project_id.as_str()).await
    }

    async fn put_project(&self, project: &Project) -> StoreResult<()> {
        self.set_model(&project.user_id, PROJECTS, project.id.as_str(), project)
            .await
    }

    async fn get_clip(&self, user_id: &str, clip_id: &ClipId) -> StoreResult<Option<Clip>> {
        self.get_model(user_id, CLIPS, clip_id.as_str()).await
    }

    async fn put_clip(&self, clip: &Clip) -> StoreResult<()> {
        self.set_model(&clip.user_id, CLIPS, clip.id.as_str(), clip).await
    }

    async fn is_project_output(&self, user_id: &str, media_id: &MediaId) -> StoreResult<bool> {
        let parent = format!("{}/{}", USERS, user_id);
        let docs = self
            .client
            .with_retry("run_query", || {
                self.client.run_query(
                    &parent,
                    StructuredQuery::field_equals(
                        PROJECTS,
                        "output_media_id",
                        Value::StringValue(media_id.as_str().to_string()),
                    ),
                )
            })
            .await?;
        Ok(!docs.is_empty())
    }

    async fn list_clips(&self, user_id: &str, project_id: &ProjectId) -> StoreResult<Vec<Clip>> {
        let parent = format!("{}/{}", USERS, user_id);
        let docs = self
            .client
            .with_retry("run_query", || {
                self.client.run_query(
                    &parent,
                    StructuredQuery::field_equals(
                        CLIPS,
                        "project_id",
                        Value::StringValue(project_id.as_str().to_string()),
                    ),
                )
            })
            .await?;
        docs.iter().map(decode).collect()
    }

    async fn get_media(&self, user_id: &str, media_id: &MediaId) -> StoreResult<Option<MediaFile>> {
        self.get_model(user_id, MEDIA, media_id.as_str()).await
    }

    async fn get_media_batch(&self, user_id: &str, media_ids: &[MediaId]) -> StoreResult<Vec<MediaFile>> {
        let collection = Self::collection(user_id, MEDIA);
        let ids: Vec<String> = media_ids.iter().map(|id| id.as_str().to_string()).collect();
        let docs = self
            .client
            .with_retry("batch_get_documents", || {
                self.client.batch_get_documents(&collection, &ids)
            })
            .await?;
        docs.iter().map(decode).collect()
    }

    async fn put_media(&self, media: &MediaFile) -> StoreResult<()> {
        self.set_model(&media.user_id, MEDIA, media.id.as_str(), media).await
    }

    async fn delete_media(&self, user_id: &str, media_id: &MediaId) -> StoreResult<()> {
        let collection = Self::collection(user_id, MEDIA);
        self.client
            .with_retry("delete_document", || {
                self.client.delete_document(&collection, media_id.as_str())
            })
            .await?;
        Ok(())
    }

    /// The media document is written before its index entry, so an index
    /// entry always points at media that existed when it was written.
    async fn create_media_deduped(&self, media: &MediaFile) -> StoreResult<(MediaFile, bool)> {
        let Some(source_key) = media.source_key.as_deref() else {
            self.put_media(media).await?;
            return Ok((media.clone(), false));
        };

        let user_id = media.user_id.as_str();
        let hash = source_key_hash(source_key);
        let index_collection = Self::collection(user_id, MEDIA_SOURCES);
        let entry = encode(&SourceIndexEntry {
            media_id: media.id.clone(),
            source_key: source_key.to_string(),
        })?;

        self.put_media(media).await?;

        match self
            .client
            .create_document(&index_collection, &hash, entry.clone())
            .await
        {
            Ok(_) => return Ok((media.clone(), false)),
            Err(FirestoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let existing = match self.read_source_index(user_id, &hash).await? {
            Some(index) => self.get_media(user_id, &index.media_id).await?,
            None => None,
        };

        let media_collection = Self::collection(user_id, MEDIA);
        match existing {
            Some(existing) if existing.id != media.id => {
                debug!(
                    media_id = %existing.id,
                    source_key = %source_key,
                    "Source already stored, dropping duplicate media record"
                );
                self.client
                    .delete_document(&media_collection, media.id.as_str())
                    .await?;
                Ok((existing, true))
            }
            Some(existing) => Ok((existing, false)),
            None => {
                warn!(source_key = %source_key, "Repointing stale source index entry");
                self.client
                    .set_document(&index_collection, &hash, entry)
                    .await?;
                Ok((media.clone(), false))
            }
        }
    }

    async fn find_media_by_source(&self, user_id: &str, source_key: &str) -> StoreResult<Option<MediaFile>> {
        match self.read_source_index(user_id, &source_key_hash(source_key)).await? {
            Some(index) => self.get_media(user_id, &index.media_id).await,
            None => Ok(None),
        }
    }

    async fn storage_used(&self, user_id: &str) -> StoreResult<u64> {
        let collection = Self::collection(user_id, MEDIA);
        let mut total = 0u64;
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .client
                .with_retry("list_documents", || {
                    self.client
                        .list_documents(&collection, Some(LIST_PAGE_SIZE), page_token.as_deref())
                })
                .await?;

            for doc in page.documents.unwrap_or_default() {
                let media: MediaFile = decode(&doc)?;
                total = total.saturating_add(media.size_bytes);
            }

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(total),
            }
        }
    }

    async fn get_job(&self, user_id: &str, job_id: &JobId) -> StoreResult<Option<ProcessingJob>> {
        self.get_model(user_id, JOBS, job_id.as_str()).await
    }

    async fn put_job(&self, job: &ProcessingJob) -> StoreResult<()> {
        self.set_model(&job.user_id, JOBS, job.id.as_str(), job).await
    }

    async fn get_plan(&self, user_id: &str) -> StoreResult<PlanTier> {
        let doc = self
            .client
            .with_retry("get_document", || self.client.get_document(USERS, user_id))
            .await?;
        Ok(match doc.as_ref().and_then(|d| d.field("plan")) {
            Some(Value::StringValue(plan)) => PlanTier::parse(plan),
            _ => PlanTier::Free,
        })
    }

    async fn get_ledger(&self, user_id: &str, month: &str) -> StoreResult<Versioned<RenderLedger>> {
        let collection = Self::collection(user_id, RENDER_LEDGER);
        let doc = self
            .client
            .with_retry("get_document", || self.client.get_document(&collection, month))
            .await?;
        match doc {
            Some(doc) => Ok(Versioned {
                value: decode(&doc)?,
                version: doc.update_time.clone(),
            }),
            None => Ok(Versioned {
                value: RenderLedger::new(month),
                version: None,
            }),
        }
    }

    async fn put_ledger(&self, user_id: &str, ledger: &RenderLedger, version: Option<&str>) -> StoreResult<()> {
        let collection = Self::collection(user_id, RENDER_LEDGER);
        let fields = encode(ledger)?;
        let result = match version {
            None => self
                .client
                .create_document(&collection, &ledger.month, fields)
                .await
                .map_err(|e| match e {
                    FirestoreError::AlreadyExists(what) => FirestoreError::PreconditionFailed(what),
                    other => other,
                }),
            Some(update_time) => self
                .client
                .update_document_with_precondition(&collection, &ledger.month, fields, update_time)
                .await,
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_precondition_failed() => {
                record_conflict("put_ledger");
                Err(StoreError::conflict(format!(
                    "render ledger {}/{}",
                    user_id, ledger.month
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_render_usage(&self, usage: &RenderUsage) -> StoreResult<()> {
        let collection = Self::collection(&usage.user_id, RENDER_USAGE);
        let fields = encode(&UsageRow {
            usage,
            month: month_key(usage.recorded_at),
        })?;
        // Not retried: a retry after a lost response would report a
        // duplicate for the first write.
        self.client
            .create_document(&collection, &usage.id, fields)
            .await?;
        Ok(())
    }

    async fn render_used(&self, user_id: &str, month: &str) -> StoreResult<u64> {
        let parent = format!("{}/{}", USERS, user_id);
        let docs = self
            .client
            .with_retry("run_query", || {
                self.client.run_query(
                    &parent,
                    StructuredQuery::field_equals(
                        RENDER_USAGE,
                        "month",
                        Value::StringValue(month.to_string()),
                    ),
                )
            })
            .await?;

        docs.iter().try_fold(0u64, |acc, doc| {
            let usage: RenderUsage = decode(doc)?;
            Ok(acc.saturating_add(usage.seconds))
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.client.ping().await?;
        Ok(())
    }
}

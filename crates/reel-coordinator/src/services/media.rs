//! Media file records and download reuse.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use reel_models::api::{CreateMediaFileRequest, CreateMediaFileResponse, MediaBatchResponse};
use reel_models::{normalize_source_url, MediaFile, MediaId, MediaKind};
use reel_store::Store;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::security::{is_safe_media_path, is_user_media_path};

/// Upper bound on ids accepted by one batch lookup.
pub const MAX_BATCH_IDS: usize = 200;

#[derive(Clone)]
pub struct MediaService {
    store: Arc<dyn Store>,
}

impl MediaService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: &str, media_id: &MediaId) -> ApiResult<MediaFile> {
        self.store
            .get_media(user_id, media_id)
            .await?
            .filter(|m| m.is_owned_by(user_id))
            .ok_or_else(|| ApiError::not_found("Media not found"))
    }

    /// Look up many media files at once. Ids that do not exist or belong to
    /// another user are reported as missing.
    pub async fn batch(&self, user_id: &str, media_ids: &[MediaId]) -> ApiResult<MediaBatchResponse> {
        if media_ids.len() > MAX_BATCH_IDS {
            return Err(ApiError::bad_request(format!(
                "At most {} media ids per batch",
                MAX_BATCH_IDS
            )));
        }

        let mut seen = HashSet::new();
        let unique: Vec<MediaId> = media_ids.iter().filter(|id| seen.insert(*id)).cloned().collect();

        let media: Vec<MediaFile> = self
            .store
            .get_media_batch(user_id, &unique)
            .await?
            .into_iter()
            .filter(|m| m.is_owned_by(user_id))
            .collect();
        let missing = unique
            .into_iter()
            .filter(|id| !media.iter().any(|m| &m.id == id))
            .collect();

        Ok(MediaBatchResponse { media, missing })
    }

    /// Existing media downloaded from the same source, if any.
    ///
    /// The key is always computed here; a client-supplied normalization that
    /// disagrees is ignored.
    pub async fn find_reusable(
        &self,
        user_id: &str,
        source_url: &str,
        client_normalized: Option<&str>,
    ) -> ApiResult<Option<MediaFile>> {
        let key = normalize_source_url(source_url).map_err(|e| ApiError::bad_request(e.to_string()))?;
        if client_normalized.is_some_and(|n| n != key) {
            debug!(user_id = %user_id, "Ignoring client source normalization that differs from server key");
        }

        Ok(self
            .store
            .find_media_by_source(user_id, &key)
            .await?
            .filter(|m| m.is_owned_by(user_id)))
    }

    /// Register a media file. Downloads carrying a `source_url` are deduped on
    /// their source key: if one exists it is returned with `reused = true`.
    pub async fn create(&self, request: &CreateMediaFileRequest) -> ApiResult<CreateMediaFileResponse> {
        let user_id = request.user_id.as_str();
        if user_id.is_empty() {
            return Err(ApiError::bad_request("user_id is required"));
        }
        if !is_user_media_path(user_id, &request.file_path) {
            return Err(ApiError::bad_request("file_path must be a relative path under the user's directory"));
        }
        if let Some(thumbnail) = &request.thumbnail_path {
            if !is_user_media_path(user_id, thumbnail) {
                return Err(ApiError::bad_request("thumbnail_path must be a relative path under the user's directory"));
            }
        }
        if !request.duration_secs.is_finite() || request.duration_secs < 0.0 {
            return Err(ApiError::bad_request("duration_secs must be a non-negative number"));
        }

        let mut media = MediaFile::new(
            user_id,
            request.kind,
            request.file_path.clone(),
            request.duration_secs,
            request.size_bytes,
        );
        media.thumbnail_path = request.thumbnail_path.clone();

        let Some(source_url) = &request.source_url else {
            self.store.put_media(&media).await?;
            info!(user_id = %user_id, media_id = %media.id, kind = %media.kind, "Media file registered");
            return Ok(CreateMediaFileResponse { media, reused: false });
        };

        if request.kind != MediaKind::Clip {
            return Err(ApiError::bad_request("source_url is only accepted for clip media"));
        }
        let key = normalize_source_url(source_url).map_err(|e| ApiError::bad_request(e.to_string()))?;
        media.source_key = Some(key);

        let (media, reused) = self.store.create_media_deduped(&media).await?;
        if reused {
            metrics::record_media_reused();
            info!(user_id = %user_id, media_id = %media.id, "Existing media returned for source");
        } else {
            info!(user_id = %user_id, media_id = %media.id, "Downloaded media registered");
        }
        Ok(CreateMediaFileResponse { media, reused })
    }

    pub async fn attach_thumbnail(
        &self,
        user_id: &str,
        media_id: &MediaId,
        thumbnail_path: &str,
    ) -> ApiResult<MediaFile> {
        if !is_safe_media_path(thumbnail_path) || !is_user_media_path(user_id, thumbnail_path) {
            return Err(ApiError::bad_request("thumbnail_path must be a relative path under the user's directory"));
        }

        let mut media = self.get(user_id, media_id).await?;
        media.thumbnail_path = Some(thumbnail_path.to_string());
        media.updated_at = Utc::now();
        self.store.put_media(&media).await?;
        Ok(media)
    }

    /// Drop a compilation record whose render never completed its project.
    /// A compilation that is some project's output stays.
    pub async fn delete_orphaned_compilation(&self, user_id: &str, media_id: &MediaId) -> ApiResult<MediaFile> {
        let media = self.get(user_id, media_id).await?;
        if media.kind != MediaKind::Compilation {
            return Err(ApiError::bad_request("Only compilation media can be removed"));
        }
        if self.store.is_project_output(user_id, media_id).await? {
            return Err(ApiError::conflict("Media is a project's output"));
        }

        self.store.delete_media(user_id, media_id).await?;
        info!(user_id = %user_id, media_id = %media_id, "Orphaned compilation removed");
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_store::MemoryStore;

    fn download_request(user_id: &str, path: &str, url: &str) -> CreateMediaFileRequest {
        CreateMediaFileRequest {
            user_id: user_id.to_string(),
            kind: MediaKind::Clip,
            file_path: path.to_string(),
            duration_secs: 12.0,
            size_bytes: 4096,
            thumbnail_path: Some(format!("{}/thumbnails/a.jpg", user_id)),
            source_url: Some(url.to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_dedupes_on_source_key() {
        let media = MediaService::new(Arc::new(MemoryStore::new()));

        let first = media
            .create(&download_request("u1", "u1/clips/a.mp4", "https://youtu.be/abc123"))
            .await
            .unwrap();
        assert!(!first.reused);

        let second = media
            .create(&download_request(
                "u1",
                "u1/clips/b.mp4",
                "https://www.youtube.com/watch?v=abc123&utm_source=x",
            ))
            .await
            .unwrap();
        assert!(second.reused);
        assert_eq!(second.media.id, first.media.id);
        assert_eq!(second.media.file_path, "u1/clips/a.mp4");
    }

    #[tokio::test]
    async fn test_find_reusable_is_idempotent_and_scoped() {
        let media = MediaService::new(Arc::new(MemoryStore::new()));
        let created = media
            .create(&download_request("u1", "u1/clips/a.mp4", "https://clips.twitch.tv/Slug"))
            .await
            .unwrap();

        for _ in 0..2 {
            let hit = media
                .find_reusable("u1", "https://clips.twitch.tv/Slug/", Some("https://bogus.example"))
                .await
                .unwrap();
            assert_eq!(hit.map(|m| m.id), Some(created.media.id.clone()));
        }
        assert!(media
            .find_reusable("u2", "https://clips.twitch.tv/Slug", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_foreign_paths() {
        let media = MediaService::new(Arc::new(MemoryStore::new()));
        let err = media
            .create(&download_request("u1", "u2/clips/a.mp4", "https://youtu.be/abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_only_unattached_compilations_are_removed() {
        let store = Arc::new(MemoryStore::new());
        let media = MediaService::new(store.clone());

        let orphan = MediaFile::new("u1", MediaKind::Compilation, "u1/compilations/j1.mp4", 60.0, 4096);
        let output = MediaFile::new("u1", MediaKind::Compilation, "u1/compilations/j2.mp4", 60.0, 4096);
        let intro = MediaFile::new("u1", MediaKind::Intro, "u1/assets/intro.mp4", 3.0, 10);
        for m in [&orphan, &output, &intro] {
            store.put_media(m).await.unwrap();
        }
        let mut project = reel_models::Project::new("u1", "Highlights");
        project.output_media_id = Some(output.id.clone());
        store.put_project(&project).await.unwrap();

        media.delete_orphaned_compilation("u1", &orphan.id).await.unwrap();
        assert!(store.get_media("u1", &orphan.id).await.unwrap().is_none());
        assert_eq!(store.storage_used("u1").await.unwrap(), 4096 + 10);

        assert!(matches!(
            media.delete_orphaned_compilation("u1", &output.id).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            media.delete_orphaned_compilation("u1", &intro.id).await,
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            media.delete_orphaned_compilation("u2", &output.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_reports_missing_and_foreign_ids() {
        let store = Arc::new(MemoryStore::new());
        let media = MediaService::new(store.clone());

        let mine = MediaFile::new("u1", MediaKind::Intro, "u1/assets/intro.mp4", 3.0, 10);
        let theirs = MediaFile::new("u2", MediaKind::Outro, "u2/assets/outro.mp4", 3.0, 10);
        store.put_media(&mine).await.unwrap();
        store.put_media(&theirs).await.unwrap();

        let response = media
            .batch("u1", &[mine.id.clone(), theirs.id.clone(), mine.id.clone()])
            .await
            .unwrap();
        assert_eq!(response.media.len(), 1);
        assert_eq!(response.missing, vec![theirs.id]);
    }
}

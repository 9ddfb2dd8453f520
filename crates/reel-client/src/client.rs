//! HTTP implementation of [`CoordinatorApi`].

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info_span, warn, Instrument};

use reel_models::api::{
    AttachThumbnailRequest, CompilationContext, CreateMediaFileRequest, CreateMediaFileResponse,
    CreateProcessingJobRequest, FindReusableMediaRequest, MediaBatchRequest, MediaBatchResponse,
    RecordRenderUsageRequest, ReusableMediaResponse, UpdateClipStatusRequest,
    UpdateProcessingJobRequest, UpdateProjectStatusRequest,
};
use reel_models::{
    normalize_source_url, Clip, ClipId, JobId, MediaFile, MediaId, ProcessingJob, Project,
    ProjectId, RenderUsage, TierLimits, UserQuota,
};

use crate::api::CoordinatorApi;
use crate::config::CoordinatorClientConfig;
use crate::error::{ClientError, ClientResult};

/// Error body rendered by the Coordinator.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Clone)]
pub struct CoordinatorClient {
    http: Client,
    config: CoordinatorClientConfig,
}

impl CoordinatorClient {
    pub fn new(config: CoordinatorClientConfig) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("reel-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> ClientResult<Self> {
        Self::new(CoordinatorClientConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/internal{}", self.config.base_url, path)
    }

    fn user_path(user_id: &str, rest: &str) -> String {
        format!("/users/{}{}", urlencoding::encode(user_id), rest)
    }

    /// Send the request built by `build`, retrying transient failures when
    /// `retry` is set.
    async fn execute<T, F>(&self, operation: &'static str, retry: bool, build: F) -> ClientResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let max_retries = if retry { self.config.max_retries } else { 0 };
        let mut attempt = 0;

        loop {
            let span = info_span!("coordinator_request", operation = operation, attempt = attempt + 1);
            let result = async {
                let response = build().bearer_auth(&self.config.worker_token).send().await?;
                Self::decode(response).await
            }
            .instrument(span)
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Coordinator call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| {
                ClientError::InvalidResponse(format!(
                    "{} (body prefix: {})",
                    e,
                    body.chars().take(200).collect::<String>()
                ))
            });
        }

        let body = response.text().await.unwrap_or_default();
        let (detail, code) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => (err.detail, err.code),
            Err(_) if body.is_empty() => (status.to_string(), None),
            Err(_) => (body, None),
        };
        debug!(status = %status, detail = %detail, "Coordinator error response");
        Err(ClientError::Api { status, code, detail })
    }

    /// Full-jitter exponential backoff, at least the base delay.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.config.max_delay_ms);
        let jittered = if exp > 0 { rand::rng().random_range(0..=exp) } else { 0 };
        Duration::from_millis(jittered.max(self.config.base_delay_ms))
    }
}

#[async_trait]
impl CoordinatorApi for CoordinatorClient {
    async fn get_compilation_context(&self, user_id: &str, project_id: &ProjectId) -> ClientResult<CompilationContext> {
        let url = self.url(&Self::user_path(
            user_id,
            &format!("/projects/{}/context", urlencoding::encode(project_id.as_str())),
        ));
        self.execute("get_compilation_context", true, || self.http.get(&url))
            .await
    }

    async fn get_media_batch(&self, user_id: &str, media_ids: &[MediaId]) -> ClientResult<MediaBatchResponse> {
        let url = self.url("/media/batch");
        let body = MediaBatchRequest {
            user_id: user_id.to_string(),
            media_ids: media_ids.to_vec(),
        };
        self.execute("get_media_batch", true, || self.http.post(&url).json(&body))
            .await
    }

    async fn find_reusable_media(&self, user_id: &str, source_url: &str) -> ClientResult<Option<MediaFile>> {
        let url = self.url("/media/reusable");
        let body = FindReusableMediaRequest {
            user_id: user_id.to_string(),
            source_url: source_url.to_string(),
            normalized_url: normalize_source_url(source_url).ok(),
        };
        let response: ReusableMediaResponse = self
            .execute("find_reusable_media", true, || self.http.post(&url).json(&body))
            .await?;
        Ok(response.media)
    }

    async fn create_media_file(&self, request: &CreateMediaFileRequest) -> ClientResult<CreateMediaFileResponse> {
        let url = self.url("/media");
        // Source-keyed creates are deduplicated server side, so a repeat is safe.
        let retry = request.source_url.is_some();
        self.execute("create_media_file", retry, || self.http.post(&url).json(request))
            .await
    }

    async fn attach_media_thumbnail(
        &self,
        user_id: &str,
        media_id: &MediaId,
        request: &AttachThumbnailRequest,
    ) -> ClientResult<MediaFile> {
        let url = self.url(&Self::user_path(
            user_id,
            &format!("/media/{}/thumbnail", urlencoding::encode(media_id.as_str())),
        ));
        self.execute("attach_media_thumbnail", true, || self.http.put(&url).json(request))
            .await
    }

    async fn delete_media_file(&self, user_id: &str, media_id: &MediaId) -> ClientResult<MediaFile> {
        let url = self.url(&Self::user_path(
            user_id,
            &format!("/media/{}", urlencoding::encode(media_id.as_str())),
        ));
        self.execute("delete_media_file", true, || self.http.delete(&url)).await
    }

    async fn get_clip(&self, user_id: &str, clip_id: &ClipId) -> ClientResult<Clip> {
        let url = self.url(&Self::user_path(
            user_id,
            &format!("/clips/{}", urlencoding::encode(clip_id.as_str())),
        ));
        self.execute("get_clip", true, || self.http.get(&url)).await
    }

    async fn update_clip_status(
        &self,
        user_id: &str,
        clip_id: &ClipId,
        request: &UpdateClipStatusRequest,
    ) -> ClientResult<Clip> {
        let url = self.url(&Self::user_path(
            user_id,
            &format!("/clips/{}/status", urlencoding::encode(clip_id.as_str())),
        ));
        self.execute("update_clip_status", true, || self.http.patch(&url).json(request))
            .await
    }

    async fn create_processing_job(&self, request: &CreateProcessingJobRequest) -> ClientResult<ProcessingJob> {
        let url = self.url("/jobs");
        self.execute("create_processing_job", false, || self.http.post(&url).json(request))
            .await
    }

    async fn update_processing_job(
        &self,
        user_id: &str,
        job_id: &JobId,
        request: &UpdateProcessingJobRequest,
    ) -> ClientResult<ProcessingJob> {
        let url = self.url(&Self::user_path(
            user_id,
            &format!("/jobs/{}", urlencoding::encode(job_id.as_str())),
        ));
        self.execute("update_processing_job", true, || self.http.patch(&url).json(request))
            .await
    }

    async fn update_project_status(
        &self,
        user_id: &str,
        project_id: &ProjectId,
        request: &UpdateProjectStatusRequest,
    ) -> ClientResult<Project> {
        let url = self.url(&Self::user_path(
            user_id,
            &format!("/projects/{}/status", urlencoding::encode(project_id.as_str())),
        ));
        self.execute("update_project_status", true, || self.http.patch(&url).json(request))
            .await
    }

    async fn get_user_quota(&self, user_id: &str) -> ClientResult<UserQuota> {
        let url = self.url(&Self::user_path(user_id, "/quota"));
        self.execute("get_user_quota", true, || self.http.get(&url)).await
    }

    async fn get_user_tier_limits(&self, user_id: &str) -> ClientResult<TierLimits> {
        let url = self.url(&Self::user_path(user_id, "/tier-limits"));
        self.execute("get_user_tier_limits", true, || self.http.get(&url))
            .await
    }

    async fn record_render_usage(&self, user_id: &str, request: &RecordRenderUsageRequest) -> ClientResult<RenderUsage> {
        let url = self.url(&Self::user_path(user_id, "/render-usage"));
        self.execute("record_render_usage", false, || self.http.post(&url).json(request))
            .await
    }
}

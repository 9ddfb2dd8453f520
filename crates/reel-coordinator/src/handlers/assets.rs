//! Decorative asset registration.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use reel_models::api::CreateMediaFileRequest;
use reel_models::{MediaFile, MediaKind};
use serde::Deserialize;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::extract::ValidatedJson;
use crate::state::AppState;

/// An intro, outro or transition already present under the media root.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterAssetRequest {
    pub kind: MediaKind,
    #[validate(length(min = 1, max = 512))]
    pub file_path: String,
    #[validate(range(min = 0.0, max = 3600.0))]
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub thumbnail_path: Option<String>,
}

pub async fn register_asset(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<RegisterAssetRequest>,
) -> ApiResult<(StatusCode, Json<MediaFile>)> {
    if !request.kind.is_decorative() {
        return Err(ApiError::bad_request("Only intro, outro and transition assets can be registered"));
    }

    let created = state
        .media
        .create(&CreateMediaFileRequest {
            user_id: user.uid,
            kind: request.kind,
            file_path: request.file_path,
            duration_secs: request.duration_secs,
            size_bytes: request.size_bytes,
            thumbnail_path: request.thumbnail_path,
            source_url: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created.media)))
}

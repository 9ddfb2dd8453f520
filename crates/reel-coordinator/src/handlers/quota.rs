//! Quota handlers.

use axum::extract::State;
use axum::Json;
use reel_models::UserQuota;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Storage and render allowance of the signed-in user.
pub async fn get_quota(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<UserQuota>> {
    Ok(Json(state.quota.user_quota(&user.uid).await?))
}

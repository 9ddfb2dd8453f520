//! Request handlers.

pub mod assets;
pub mod health;
pub mod internal;
pub mod jobs;
pub mod projects;
pub mod quota;

pub use health::*;

use reel_models::ids::is_valid_id;

use crate::error::{ApiError, ApiResult};

/// Path and body ids must be usable as document names. Anything else cannot
/// exist, so it is reported the same way as a missing record.
pub(crate) fn checked_id(raw: &str) -> ApiResult<&str> {
    if is_valid_id(raw) {
        Ok(raw)
    } else {
        Err(ApiError::not_found("Resource not found"))
    }
}

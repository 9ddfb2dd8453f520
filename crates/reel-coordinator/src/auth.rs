//! Request authentication.
//!
//! Two credentials exist and neither is accepted where the other belongs:
//! - user routes take an HS256 session token whose `sub` is the user id
//! - worker routes take the pre-shared worker token

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const WORKER_TOKEN_CONTEXT: &[u8] = b"reel-worker-token";

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User ID
    pub sub: String,
    /// Expiration
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Authenticated end user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
}

/// A request made with the worker credential.
#[derive(Debug, Clone, Copy)]
pub struct WorkerAuth;

/// Verify a session token against `secret`.
pub fn verify_session_token(token: &str, secret: &str) -> Result<SessionClaims, ApiError> {
    if secret.is_empty() {
        return Err(ApiError::unauthorized("User authentication is not configured"));
    }

    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))?;

    if data.claims.sub.trim().is_empty() {
        return Err(ApiError::unauthorized("Token has no subject"));
    }
    Ok(data.claims)
}

fn worker_tag(token: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes()).ok()?;
    mac.update(WORKER_TOKEN_CONTEXT);
    Some(mac)
}

/// Compare worker tokens in constant time.
///
/// Both sides are reduced to fixed-length MACs first, so neither the content
/// nor the length of the expected token leaks through timing.
pub fn worker_token_matches(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let (Some(expected_mac), Some(provided_mac)) = (worker_tag(expected), worker_tag(provided)) else {
        return false;
    };
    let expected_tag = expected_mac.finalize().into_bytes();
    provided_mac.verify_slice(&expected_tag).is_ok()
}

async fn bearer_token(parts: &mut Parts, state: &AppState) -> Result<String, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                debug!("Missing or malformed Authorization header: {}", e);
                ApiError::unauthorized("Missing or invalid Authorization header")
            })?;
    Ok(bearer.token().to_string())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state).await?;
        let claims = verify_session_token(&token, &state.config.jwt_secret)?;
        Ok(AuthUser { uid: claims.sub })
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state).await?;
        if !worker_token_matches(&token, &state.config.worker_token) {
            warn!(path = %parts.uri.path(), "Rejected worker request with invalid token");
            return Err(ApiError::unauthorized("Invalid worker token"));
        }
        Ok(WorkerAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(sub: &str, secret: &str, exp_offset: i64) -> String {
        let claims = SessionClaims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
            iat: None,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_session_token_round_trip() {
        let claims = verify_session_token(&token("u1", "s3cret", 3600), "s3cret").unwrap();
        assert_eq!(claims.sub, "u1");
    }

    #[test]
    fn test_session_token_rejections() {
        assert!(verify_session_token(&token("u1", "other", 3600), "s3cret").is_err());
        assert!(verify_session_token(&token("u1", "s3cret", -3600), "s3cret").is_err());
        assert!(verify_session_token(&token(" ", "s3cret", 3600), "s3cret").is_err());
        assert!(verify_session_token(&token("u1", "s3cret", 3600), "").is_err());
        assert!(verify_session_token("not-a-jwt", "s3cret").is_err());
    }

    #[test]
    fn test_worker_token_comparison() {
        assert!(worker_token_matches("0123456789abcdef", "0123456789abcdef"));
        assert!(!worker_token_matches("0123456789abcdeg", "0123456789abcdef"));
        assert!(!worker_token_matches("0123456789abcde", "0123456789abcdef"));
        assert!(!worker_token_matches("", ""));
    }
}

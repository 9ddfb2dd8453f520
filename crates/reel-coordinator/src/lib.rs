//! Reel Coordinator API server.
//!
//! This crate provides:
//! - User routes for projects, clips, assets and the compile entry point
//! - Render quota pre-flight with ledger reservations
//! - The worker-facing `/internal` API
//! - Session and worker-token authentication, rate limiting and security headers

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

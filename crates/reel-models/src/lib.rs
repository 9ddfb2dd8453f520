//! Shared data models for the Reel compilation pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Projects, clips, media files and processing jobs
//! - Plan tiers, tier limits and the render-time ledger
//! - Timeline assembly and render-time estimation
//! - Source URL normalization for download reuse
//! - Worker <-> Coordinator wire messages

pub mod api;
pub mod clip;
pub mod encoding;
pub mod estimate;
pub mod ids;
pub mod job;
pub mod media;
pub mod plan;
pub mod project;
pub mod quota;
pub mod source_key;
pub mod timeline;

pub use clip::{Clip, ClipSource, ClipStatus};
pub use encoding::EncodingConfig;
pub use estimate::{estimate_render, EstimateError, RenderEstimate};
pub use ids::{ClipId, JobId, MediaId, ProjectId};
pub use job::{JobKind, JobState, ProcessingJob, QueueName};
pub use media::{MediaFile, MediaKind};
pub use plan::{format_bytes, PlanTier, StorageUsage, TierLimits};
pub use project::{
    AudioProfile, ContainerFormat, Dimensions, Orientation, OutputSettings, Project,
    ProjectStatus, ResolutionPreset, TransitionMode,
};
pub use quota::{month_key, month_start, RenderLedger, RenderQuota, RenderUsage, UserQuota};
pub use source_key::{normalize_source_url, SourceKeyError};
pub use timeline::{build_timeline, ClipRef, Segment, TimelineError, TimelineSpec};

//! Business logic behind the HTTP handlers.

pub mod compile;
pub mod jobs;
pub mod media;
pub mod notifier;
pub mod projects;
pub mod quota;

pub use compile::{CompileService, CompileStarted};
pub use jobs::JobService;
pub use media::MediaService;
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use projects::{ProjectService, ProjectUpdate};
pub use quota::QuotaService;

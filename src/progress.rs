//! Progress-callback trait for per-application pipeline events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::IntakeConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves applications through the pipeline.
//!
//! With more than one worker, `on_application_*` may be called concurrently
//! from different tasks; implementations must protect shared mutable state
//! (`Mutex`, atomics).

use std::sync::Arc;

/// Called by the orchestrator as it processes each application.
///
/// All methods default to no-ops so callers only override what they need.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after discovery, before any application starts.
    fn on_run_start(&self, total_applications: usize) {
        let _ = total_applications;
    }

    /// Called when an application has been allocated its id.
    fn on_application_start(&self, app_id: u64, sources: &[std::path::PathBuf]) {
        let _ = (app_id, sources);
    }

    /// Called when an application reaches the archived state.
    fn on_application_complete(&self, app_id: u64, draft_path: &std::path::Path) {
        let _ = (app_id, draft_path);
    }

    /// Called when an application ends in the failed state.
    ///
    /// `app_id` is `None` when the failure happened before an id was allocated.
    fn on_application_error(&self, app_id: Option<u64>, error: &str) {
        let _ = (app_id, error);
    }

    /// Called once after every application has been attempted.
    fn on_run_complete(&self, attempted: usize, succeeded: usize) {
        let _ = (attempted, succeeded);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::IntakeConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

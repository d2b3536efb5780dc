//! Progress reporting for analysis runs.
//!
//! The pipeline reports one unit of work per analysis step through
//! [`ProgressCallback`]. Rendering lives upstream: the CLI plugs in an
//! `indicatif` bar, tests and library callers use [`NullProgress`].

use std::sync::Arc;

/// Receives step-level progress from a running analysis.
///
/// Implementations must be `Send + Sync` so a single callback can be
/// shared behind an [`Arc`].
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of steps the run will take.
    fn set_total(&self, total: u64);

    /// Advances by `delta` steps.
    fn inc(&self, delta: u64);

    /// Describes the step currently running.
    fn set_message(&self, msg: String);

    /// Marks the run complete with a final message.
    fn finish(&self, msg: String);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

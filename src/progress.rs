//! Progress accounting and the callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through the queue.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a channel or a log
//! without the library knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_img2prompt::{BatchConfig, BatchProgressCallback};
//! use std::sync::Arc;
//!
//! struct Percent;
//!
//! impl BatchProgressCallback for Percent {
//!     fn on_progress(&self, completed_steps: usize, total_steps: usize) {
//!         eprintln!("{completed_steps}/{total_steps}");
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(Percent))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchSummary, Notice};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Steps each file contributes to the progress metric: extract, filter, generate.
pub const STEPS_PER_FILE: usize = 3;

/// Step-based progress of a run.
///
/// Every file weighs exactly [`STEPS_PER_FILE`] steps regardless of how many
/// images it yields. This is an approximation: a file with ten images takes
/// far longer than a PDF that yields none, but both advance the bar equally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub completed_steps: usize,
    pub total_steps: usize,
}

impl BatchProgress {
    pub fn for_files(file_count: usize) -> Self {
        Self {
            completed_steps: 0,
            total_steps: file_count * STEPS_PER_FILE,
        }
    }

    /// Advance by `steps`, never past the total.
    pub fn advance(&mut self, steps: usize) {
        self.completed_steps = (self.completed_steps + steps).min(self.total_steps);
    }

    /// Completed fraction in `[0, 1]`. An empty run counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total_steps == 0 {
            return 1.0;
        }
        self.completed_steps as f64 / self.total_steps as f64
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.completed_steps == self.total_steps
    }
}

/// Called by the batch pipeline as it processes each file.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. The pipeline calls them sequentially from the task
/// driving the run.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first file is touched.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file enters extraction.
    ///
    /// `file_index` is 1-based.
    fn on_file_start(&self, file_index: usize, total_files: usize, file_name: &str) {
        let _ = (file_index, total_files, file_name);
    }

    /// Called after every completed step. `completed_steps` never decreases.
    fn on_progress(&self, completed_steps: usize, total_steps: usize) {
        let _ = (completed_steps, total_steps);
    }

    /// Called for every notice as it is raised.
    fn on_notice(&self, notice: &Notice) {
        let _ = notice;
    }

    /// Called when a file reaches `Done`.
    fn on_file_complete(&self, file_name: &str, prompt_count: usize) {
        let _ = (file_name, prompt_count);
    }

    /// Called when a file reaches `Failed`.
    fn on_file_error(&self, file_name: &str, error: &str) {
        let _ = (file_name, error);
    }

    /// Called once after the final cost has been computed.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn progress_for_files() {
        let p = BatchProgress::for_files(4);
        assert_eq!(p.total_steps, 12);
        assert_eq!(p.fraction(), 0.0);
        assert!(!p.is_complete());
    }

    #[test]
    fn advance_is_capped() {
        let mut p = BatchProgress::for_files(1);
        p.advance(2);
        assert_eq!(p.completed_steps, 2);
        p.advance(5);
        assert_eq!(p.completed_steps, 3);
        assert!(p.is_complete());
        assert_eq!(p.percent(), 100.0);
    }

    #[test]
    fn empty_run_is_complete() {
        let p = BatchProgress::for_files(0);
        assert!(p.is_complete());
        assert_eq!(p.fraction(), 1.0);
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_file_start(1, 2, "a.png");
        cb.on_progress(1, 6);
        cb.on_file_complete("a.png", 1);
        cb.on_file_error("b.png", "boom");
    }

    struct Counting {
        ticks: AtomicUsize,
    }

    impl BatchProgressCallback for Counting {
        fn on_progress(&self, _completed: usize, _total: usize) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn arc_dyn_callback_works() {
        let counting = Arc::new(Counting {
            ticks: AtomicUsize::new(0),
        });
        let cb: ProgressCallback = counting.clone();
        cb.on_progress(1, 3);
        cb.on_progress(2, 3);
        assert_eq!(counting.ticks.load(Ordering::SeqCst), 2);
    }
}

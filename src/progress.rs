//! Progress-reporting trait for pipeline runs.
//!
//! Inject an [`Arc<dyn ProgressReporter>`] via
//! [`crate::coordinator::CoordinatorBuilder::progress`] to follow a run step
//! by step: which stage is executing, how long the API has taken so far, and
//! how the run ended.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a status line or a terminal spinner without
//! the library knowing how the host application communicates.
//!
//! # Panics in callbacks
//!
//! A reporter is UI code. The coordinator calls it through [`notify`], which
//! catches a panic, logs it and carries on, so a broken progress bar can
//! never abort a recognition run.
//!
//! # Example
//!
//! ```rust
//! use edgequake_mathocr::{CompletionReport, PipelineStep, ProgressReporter, TimingInfo};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct StepCounter(AtomicUsize);
//!
//! impl ProgressReporter for StepCounter {
//!     fn next_step(&self, step: PipelineStep) {
//!         let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("step {n}: {step}");
//!     }
//!     fn update_timing(&self, _timing: &TimingInfo) {}
//!     fn complete(&self, report: &CompletionReport) {
//!         eprintln!("done in {}ms (success: {})", report.elapsed_ms, report.success);
//!     }
//! }
//! ```

use crate::client::AdapterKind;
use crate::mode::Mode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// The stage a run has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Validating,
    AwaitingConsent,
    Submitting,
    /// PDF only; `attempt` is 1-based.
    Polling { attempt: u32, max_attempts: u32 },
    Downloading { formats: usize },
    Normalizing,
    Rendering,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStep::Validating => f.write_str("Validating input"),
            PipelineStep::AwaitingConsent => f.write_str("Waiting for consent"),
            PipelineStep::Submitting => f.write_str("Sending to OCR service"),
            PipelineStep::Polling {
                attempt,
                max_attempts,
            } => write!(f, "Checking conversion status ({attempt}/{max_attempts})"),
            PipelineStep::Downloading { formats } => write!(f, "Downloading {formats} format(s)"),
            PipelineStep::Normalizing => f.write_str("Reading results"),
            PipelineStep::Rendering => f.write_str("Rendering"),
        }
    }
}

/// Running timings pushed while a run is in flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingInfo {
    /// Since the run started.
    pub elapsed_ms: u64,
    /// Submit round-trip, once known.
    pub api_request_ms: Option<u64>,
    /// Server-reported progress of a PDF job.
    pub percent_done: Option<f64>,
}

/// How a run ended, as seen by a reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Declined,
    Cancelled,
    Failed,
}

/// Final notification for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub mode: Mode,
    /// `None` when the run stopped before routing succeeded.
    pub kind: Option<AdapterKind>,
    pub success: bool,
    pub status: CompletionStatus,
    pub elapsed_ms: u64,
    /// Display form of the error for failed runs.
    pub error: Option<String>,
}

/// Receives run progress from the coordinator.
///
/// All methods are required; use [`NoopProgress`] when nothing is listening.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started.
    fn next_step(&self, step: PipelineStep);

    /// Timings changed (after submit, after each poll).
    fn update_timing(&self, timing: &TimingInfo);

    /// The run is over, whichever way it ended. Called exactly once per run
    /// that got past validation.
    fn complete(&self, report: &CompletionReport);
}

/// A no-op reporter for callers that don't need progress events.
///
/// This is the default when no reporter is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn next_step(&self, _step: PipelineStep) {}
    fn update_timing(&self, _timing: &TimingInfo) {}
    fn complete(&self, _report: &CompletionReport) {}
}

/// Convenience alias for the type stored by the coordinator.
pub type SharedProgress = Arc<dyn ProgressReporter>;

/// Call into `reporter`, logging instead of propagating a panic.
pub fn notify<F>(reporter: &dyn ProgressReporter, call: F)
where
    F: FnOnce(&dyn ProgressReporter),
{
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| call(reporter))) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        warn!("Progress reporter panicked: {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracking {
        steps: AtomicUsize,
        completes: AtomicUsize,
    }

    impl ProgressReporter for Tracking {
        fn next_step(&self, _step: PipelineStep) {
            self.steps.fetch_add(1, Ordering::SeqCst);
        }
        fn update_timing(&self, _timing: &TimingInfo) {}
        fn complete(&self, _report: &CompletionReport) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Exploding;

    impl ProgressReporter for Exploding {
        fn next_step(&self, step: PipelineStep) {
            panic!("bar went away during {step}");
        }
        fn update_timing(&self, _timing: &TimingInfo) {
            panic!("timing");
        }
        fn complete(&self, _report: &CompletionReport) {}
    }

    #[test]
    fn notify_forwards_calls() {
        let t = Tracking {
            steps: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
        };
        notify(&t, |p| p.next_step(PipelineStep::Validating));
        notify(&t, |p| p.next_step(PipelineStep::Submitting));
        assert_eq!(t.steps.load(Ordering::SeqCst), 2);
        assert_eq!(t.completes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn notify_swallows_panics() {
        notify(&Exploding, |p| p.next_step(PipelineStep::Rendering));
        notify(&Exploding, |p| p.update_timing(&TimingInfo::default()));
    }

    #[test]
    fn noop_is_object_safe() {
        let p: SharedProgress = Arc::new(NoopProgress);
        p.next_step(PipelineStep::Normalizing);
        p.update_timing(&TimingInfo::default());
    }

    #[test]
    fn step_display() {
        let s = PipelineStep::Polling {
            attempt: 3,
            max_attempts: 150,
        };
        assert_eq!(s.to_string(), "Checking conversion status (3/150)");
    }
}

//! Pipeline stages for capture-to-result runs.
//!
//! Each submodule implements exactly one step of
//! [`crate::coordinator::Coordinator::run`]. Keeping stages separate makes
//! each independently testable and keeps the coordinator a thin sequencer.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ validate ──▶ options ──▶ submit ──▶ poll ──▶ normalize
//! (mode+input) (gate)    (merge)    (adapter)  (PDF only)
//! ```
//!
//! 1. [`input`]:    captured input types (files, strokes, frames, URLs)
//! 2. [`validate`]: mode/input routing and structural checks; the only
//!    stage that can reject an input, and it runs before any network call
//! 3. [`options`]:  merge per-kind defaults, caller overrides and the
//!    always-include format policy into the wire options
//! 4. [`poll`]:     bounded, cancellable status polling for PDF jobs

pub mod input;
pub mod options;
pub mod poll;
pub mod validate;

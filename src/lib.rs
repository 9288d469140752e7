//! # edgequake-mathocr
//!
//! Capture handwritten, photographed, typed or PDF mathematics and turn it
//! into LaTeX, MathML, AsciiMath, HTML and Markdown through a Mathpix-style
//! OCR service.
//!
//! ## Why this crate?
//!
//! The OCR service exposes three structurally different APIs: a synchronous
//! image endpoint, a synchronous strokes endpoint and an asynchronous,
//! multi-format PDF conversion job. Front-ends that talk to them directly
//! end up with three pipelines, three result shapes and state leaking from
//! one attempt into the next. This crate puts one coordinator in front of
//! all three: one input-mode state machine, one validate → consent → submit
//! → poll → normalize sequence, one result type, and an explicit session
//! teardown before every run.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Mode + CaptureInput
//!  │
//!  ├─ 1. Clear      release previews, drop the last result, reset adapters
//!  ├─ 2. Validate   route to an adapter, check shape/size/type, check auth
//!  ├─ 3. Consent    ask the host before anything leaves the machine
//!  ├─ 4. Submit     merged format options → v3/text | v3/strokes | v3/pdf
//!  ├─ 5. Poll       PDF only: bounded, cancellable, then concurrent downloads
//!  ├─ 6. Normalize  raw JSON → RecognitionResult
//!  └─ 7. Cache      store, render, report completion
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_mathocr::{CaptureConfig, CaptureInput, Coordinator, FileInput, FormatOptions, Mode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credentials from MATHPIX_APP_ID / MATHPIX_APP_KEY
//!     let config = CaptureConfig::default();
//!     let mut coordinator = Coordinator::builder(config).build()?;
//!
//!     let file = FileInput::from_path("equation.png").await?;
//!     let outcome = coordinator
//!         .run(Mode::Upload, CaptureInput::File(file), FormatOptions::new())
//!         .await?;
//!     if let Some(result) = outcome.result() {
//!         println!("{}", result.latex);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mathocr` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-mathocr = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod debug;
pub mod error;
pub mod formats;
pub mod mode;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{AdapterKind, ClientAdapter, FormatOptions, PdfAdapter};
pub use collaborators::{AlwaysConsent, ConsentProvider, ConsentRequest, NoopRenderer, ResultRenderer};
pub use config::{CaptureConfig, CaptureConfigBuilder, CredentialSource, Credentials, EnvCredentials, StaticCredentials};
pub use coordinator::{write_downloads, Coordinator, CoordinatorBuilder};
pub use debug::{DebugReconciler, DebugRecord, DebugSource};
pub use error::{FormatError, MathOcrError};
pub use mode::{CameraDevice, CaptureSubsystem, Mode, ModeController, StrokeCanvas, SubsystemFactory, UploadOnly};
pub use normalize::normalize;
pub use output::{ConversionReport, DownloadedFormat, RecognitionResult, RunOutcome, Timing};
pub use pipeline::input::{CaptureInput, FileInput, ImageFrame, Stroke, StrokeSet};
pub use progress::{CompletionReport, CompletionStatus, NoopProgress, PipelineStep, ProgressReporter, TimingInfo};
pub use session::{ResourceHandle, SessionStateStore};

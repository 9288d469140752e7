//! Error types for the edgequake-mathocr library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`MathOcrError`] is **fatal**. The run cannot produce a result at all
//!   (malformed strokes, missing credentials, transport failure, non-2xx
//!   response, exhausted poll loop). Returned as `Err(MathOcrError)` from
//!   [`crate::coordinator::Coordinator::run`].
//!
//! * [`FormatError`] is **non-fatal**. One requested PDF conversion format
//!   failed while the others completed. Stored inside
//!   [`crate::output::ConversionReport`] so callers can render whatever
//!   succeeded.
//!
//! Declining consent and cancelling a poll loop are neither: they surface as
//! [`crate::output::RunOutcome`] variants.

use crate::mode::Mode;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-mathocr library.
#[derive(Debug, Error)]
pub enum MathOcrError {
    // ── Gate errors (raised before any network call) ──────────────────────
    /// The captured input has the wrong shape for its mode.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Credentials are missing or empty.
    #[error("Authentication error: {detail}\nSet MATHPIX_APP_ID and MATHPIX_APP_KEY, or configure credentials explicitly.")]
    Auth { detail: String },

    // ── Remote errors ─────────────────────────────────────────────────────
    /// Transport failure: DNS, TLS, connection reset, request timeout.
    ///
    /// Recoverable by the caller retrying; the coordinator never retries.
    #[error("Network error calling '{endpoint}': {detail}\nCheck your internet connection and retry.")]
    Network { endpoint: String, detail: String },

    /// The API answered with a non-2xx status or an error payload.
    #[error("API error from '{endpoint}' (HTTP {status}): {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// The PDF poll loop ran out of attempts before every format was terminal.
    #[error("Conversion of job '{job_id}' timed out after {attempts} polls ({interval_ms}ms apart)\nIncrease --max-poll-attempts.")]
    Timeout {
        job_id: String,
        attempts: u32,
        interval_ms: u64,
    },

    /// Every requested PDF format ended in `error`; nothing can be rendered.
    #[error("PDF job '{job_id}' produced no usable format: {first_error}")]
    ConversionFailed { job_id: String, first_error: String },

    // ── Mode errors ───────────────────────────────────────────────────────
    /// A capture subsystem could not be constructed or activated.
    #[error("Could not activate {mode} mode: {detail}")]
    SubsystemInit { mode: Mode, detail: String },

    /// The active subsystem could not hand over an input.
    #[error("Could not capture input in {mode} mode: {detail}")]
    Capture { mode: Mode, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write a downloaded conversion artefact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MathOcrError {
    /// True for errors raised before anything was sent over the network.
    pub fn is_pre_network(&self) -> bool {
        matches!(
            self,
            MathOcrError::Validation(_) | MathOcrError::Auth { .. }
        )
    }

    /// True when a caller retry has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            MathOcrError::Network { .. } | MathOcrError::Timeout { .. } => true,
            MathOcrError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A non-fatal error for a single PDF conversion format.
///
/// Stored in [`crate::output::ConversionReport::failed`]. The overall run
/// still succeeds as long as the job itself completed.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum FormatError {
    /// The server reported `error` for this format.
    #[error("Format '{format}': conversion failed: {detail}")]
    ConversionFailed { format: String, detail: String },

    /// The format completed but downloading it failed.
    #[error("Format '{format}': download failed: {detail}")]
    DownloadFailed { format: String, detail: String },
}

impl FormatError {
    /// The format this error belongs to.
    pub fn format(&self) -> &str {
        match self {
            FormatError::ConversionFailed { format, .. }
            | FormatError::DownloadFailed { format, .. } => format,
        }
    }
}

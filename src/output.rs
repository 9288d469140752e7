//! Result types produced by a pipeline run.

use crate::client::AdapterKind;
use crate::error::FormatError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Wall-clock timings for one run, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Run start (after session clear) to result cached.
    pub total_ms: u64,
    /// Submit sent to submit response received.
    pub api_request_ms: u64,
    /// Everything after the submit response: polling, downloads, normalising.
    pub processing_ms: u64,
}

/// A PDF format artefact fetched after the job completed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedFormat {
    pub format: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub size: usize,
}

impl DownloadedFormat {
    pub fn new(format: impl Into<String>, bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self {
            format: format.into(),
            bytes,
            size,
        }
    }

    /// Body as UTF-8, for text formats such as `mmd` and `md`.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }
}

impl std::fmt::Debug for DownloadedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadedFormat")
            .field("format", &self.format)
            .field("size", &self.size)
            .finish()
    }
}

/// Per-format outcome of a multi-format PDF conversion.
///
/// A partial failure (some formats `error`, others `completed`) is not a run
/// failure; callers render from `completed` / `downloads` and show `failed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionReport {
    pub job_id: String,
    pub completed: Vec<String>,
    pub failed: Vec<FormatError>,
    pub downloads: Vec<DownloadedFormat>,
    /// Status polls issued before every format was terminal.
    pub poll_attempts: u32,
}

impl ConversionReport {
    pub fn is_partial(&self) -> bool {
        !self.completed.is_empty() && !self.failed.is_empty()
    }

    pub fn download(&self, format: &str) -> Option<&DownloadedFormat> {
        self.downloads.iter().find(|d| d.format == format)
    }
}

/// The canonical recognition output, whichever adapter produced it.
///
/// Immutable once built; shared as `Arc<RecognitionResult>` between the
/// session store, the renderer and the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub kind: AdapterKind,
    pub latex: String,
    pub mathml: String,
    pub asciimath: String,
    pub html: String,
    pub markdown: String,
    /// Pretty-printed raw response.
    pub raw_json: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub is_handwritten: bool,
    pub timing: Timing,
    pub request_id: Option<String>,
    pub conversion: Option<ConversionReport>,
    pub raw_response: serde_json::Value,
}

impl RecognitionResult {
    /// True when no textual representation was recovered.
    pub fn is_empty(&self) -> bool {
        self.latex.is_empty()
            && self.mathml.is_empty()
            && self.asciimath.is_empty()
            && self.html.is_empty()
            && self.markdown.is_empty()
    }
}

/// How a run ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The pipeline produced a result.
    Completed(Arc<RecognitionResult>),
    /// The user declined to send the data; nothing was transmitted.
    Declined,
    /// The poll loop observed a cancellation request.
    Cancelled,
}

impl RunOutcome {
    pub fn result(&self) -> Option<&Arc<RecognitionResult>> {
        match self {
            RunOutcome::Completed(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_report_detection() {
        let report = ConversionReport {
            job_id: "j".into(),
            completed: vec!["mmd".into()],
            failed: vec![FormatError::ConversionFailed {
                format: "docx".into(),
                detail: "boom".into(),
            }],
            ..Default::default()
        };
        assert!(report.is_partial());
    }

    #[test]
    fn downloaded_format_skips_bytes_in_json() {
        let d = DownloadedFormat::new("mmd", b"$x$".to_vec());
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["size"], 3);
        assert!(json.get("bytes").is_none());
        assert_eq!(d.as_text(), Some("$x$"));
    }

    #[test]
    fn outcome_result_accessor() {
        assert!(RunOutcome::Declined.result().is_none());
        assert!(!RunOutcome::Cancelled.is_completed());
    }
}

//! Adapters over the three remote endpoint families.
//!
//! Each adapter wraps one family and exposes the same narrow contract:
//! submit a payload, report the last exchange for diagnostics, and forget it
//! on reset. The caller always knows which adapter it invoked, so the
//! [`AdapterKind`] travels alongside every payload and response and nothing
//! downstream has to guess the API from the shape of a JSON body.
//!
//! ```text
//! ImageAdapter   POST v3/text
//! StrokesAdapter POST v3/strokes
//! PdfAdapter     POST v3/pdf ─▶ GET v3/pdf/{id} ─▶ GET v3/converter/{id} ─▶ GET v3/pdf/{id}.{ext}
//! ```

pub mod http;
pub mod image_ocr;
pub mod pdf;
pub mod strokes;

use crate::debug::DebugSource;
use crate::error::MathOcrError;
use crate::pipeline::input::{FileInput, StrokeSet};
use crate::session::Resettable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use self::http::ApiTransport;
pub use self::image_ocr::ImageAdapter;
pub use self::pdf::MathpixPdfAdapter;
pub use self::strokes::StrokesAdapter;

/// Which endpoint family produced a payload, response or debug record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Image,
    Strokes,
    Pdf,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdapterKind::Image => "image",
            AdapterKind::Strokes => "strokes",
            AdapterKind::Pdf => "pdf",
        })
    }
}

/// Validated payload for [`ClientAdapter::submit`].
#[derive(Debug, Clone)]
pub enum SubmitPayload {
    /// Inline image as a `data:` URI.
    Image { data_uri: String },
    Strokes(StrokeSet),
    PdfFile(FileInput),
    PdfUrl(String),
}

impl SubmitPayload {
    /// The adapter family able to accept this payload.
    pub fn kind(&self) -> AdapterKind {
        match self {
            SubmitPayload::Image { .. } => AdapterKind::Image,
            SubmitPayload::Strokes(_) => AdapterKind::Strokes,
            SubmitPayload::PdfFile(_) | SubmitPayload::PdfUrl(_) => AdapterKind::Pdf,
        }
    }
}

/// A 2xx response from a submit call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResponse {
    pub kind: AdapterKind,
    pub status: u16,
    pub body: serde_json::Value,
    /// Time between sending the request and receiving the full body.
    pub elapsed_ms: u64,
}

/// Request options merged from defaults and caller overrides.
pub type FormatOptions = serde_json::Map<String, serde_json::Value>;

/// Overall state of a PDF job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Received,
    Loaded,
    Split,
    Processing,
    Completed,
    Error,
    Other(String),
}

impl JobState {
    pub fn parse(s: &str) -> Self {
        match s {
            "received" => JobState::Received,
            "loaded" => JobState::Loaded,
            "split" => JobState::Split,
            "processing" => JobState::Processing,
            "completed" => JobState::Completed,
            "error" => JobState::Error,
            other => JobState::Other(other.to_string()),
        }
    }
}

/// State of one requested output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatState {
    Completed,
    Error(String),
    /// `processing` or anything unrecognised; keep polling.
    Pending,
}

impl FormatState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FormatState::Pending)
    }
}

/// Answer from [`PdfAdapter::check_status`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub state: JobState,
    pub per_format: BTreeMap<String, FormatState>,
    pub percent_done: Option<f64>,
    /// Status bodies as received, merged into the final raw response.
    pub raw: serde_json::Value,
}

/// One remote endpoint family.
#[async_trait]
pub trait ClientAdapter: DebugSource + Resettable {
    fn kind(&self) -> AdapterKind;

    /// Send the payload. Non-2xx answers become [`MathOcrError::Api`].
    async fn submit(
        &self,
        payload: &SubmitPayload,
        options: &FormatOptions,
    ) -> Result<AdapterResponse, MathOcrError>;
}

/// The asynchronous multi-format PDF family.
#[async_trait]
pub trait PdfAdapter: ClientAdapter {
    /// Overall job state plus per-format state for `formats`.
    async fn check_status(
        &self,
        job_id: &str,
        formats: &[String],
    ) -> Result<JobStatus, MathOcrError>;

    /// Fetch one completed format.
    async fn download(&self, job_id: &str, format: &str) -> Result<Vec<u8>, MathOcrError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_routing() {
        let p = SubmitPayload::PdfUrl("https://x/y.pdf".into());
        assert_eq!(p.kind(), AdapterKind::Pdf);
        let s = SubmitPayload::Strokes(StrokeSet::default());
        assert_eq!(s.kind(), AdapterKind::Strokes);
    }

    #[test]
    fn job_state_parse_unknown() {
        assert_eq!(JobState::parse("completed"), JobState::Completed);
        assert_eq!(
            JobState::parse("weird"),
            JobState::Other("weird".to_string())
        );
    }

    #[test]
    fn adapter_kind_serialises_lowercase() {
        let v = serde_json::to_value(AdapterKind::Strokes).unwrap();
        assert_eq!(v, "strokes");
        assert_eq!(AdapterKind::Pdf.to_string(), "pdf");
    }
}

//! Narrow traits for the host-side collaborators of a run: the consent
//! prompt and the result renderer.
//!
//! Progress reporting lives in [`crate::progress`].

use crate::output::RecognitionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the user is asked to approve before anything leaves the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRequest {
    /// File name, URL, `handwritten strokes` or `camera capture`.
    pub name: String,
    /// Bytes for files and frames; point count for strokes; 0 for URLs.
    pub size: u64,
    pub mime: String,
}

/// Asks the user whether the input may be sent to the OCR service.
///
/// Returning `false` ends the run with [`crate::RunOutcome::Declined`]
/// before any network request.
#[async_trait]
pub trait ConsentProvider: Send + Sync {
    async fn request_processing_consent(&self, request: &ConsentRequest) -> bool;
}

/// Consent granted up front (batch use, `--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConsent;

#[async_trait]
impl ConsentProvider for AlwaysConsent {
    async fn request_processing_consent(&self, _request: &ConsentRequest) -> bool {
        true
    }
}

/// Displays a finished result next to its input preview.
pub trait ResultRenderer: Send + Sync {
    /// `preview` points at a temp image of the input when one exists. It
    /// stays valid until the next run starts.
    fn render(&self, result: &RecognitionResult, preview: Option<&Path>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderer;

impl ResultRenderer for NoopRenderer {
    fn render(&self, _result: &RecognitionResult, _preview: Option<&Path>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_consent_grants() {
        let req = ConsentRequest {
            name: "eq.png".into(),
            size: 10,
            mime: "image/png".into(),
        };
        assert!(AlwaysConsent.request_processing_consent(&req).await);
    }
}

//! Image OCR adapter (`POST v3/text`).
//!
//! Serves both uploaded image files and camera stills: the image travels
//! inline as a base64 `data:` URI next to the merged format options.

use crate::client::http::{error_message, ApiTransport, CallInfo};
use crate::client::{AdapterKind, AdapterResponse, ClientAdapter, FormatOptions, SubmitPayload};
use crate::debug::{DebugRecord, DebugSlot, DebugSource};
use crate::error::MathOcrError;
use crate::session::Resettable;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use tracing::debug;

pub const TEXT_ENDPOINT: &str = "v3/text";

/// Encode image bytes as a `data:` URI.
pub fn to_data_uri(bytes: &[u8], mime: &str) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    format!("data:{mime};base64,{b64}")
}

/// Builds the `v3/text` request body.
pub fn build_body(data_uri: &str, options: &FormatOptions) -> Value {
    let mut body = options.clone();
    body.insert("src".to_string(), Value::String(data_uri.to_string()));
    Value::Object(body)
}

/// Adapter for the image OCR endpoint.
#[derive(Debug)]
pub struct ImageAdapter {
    transport: ApiTransport,
    debug: DebugSlot,
}

impl ImageAdapter {
    pub fn new(transport: ApiTransport) -> Self {
        Self {
            transport,
            debug: DebugSlot::default(),
        }
    }
}

impl DebugSource for ImageAdapter {
    fn last_debug_data(&self) -> Option<DebugRecord> {
        self.debug.get()
    }
}

impl Resettable for ImageAdapter {
    fn reset(&self) {
        self.debug.clear();
    }
}

#[async_trait]
impl ClientAdapter for ImageAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Image
    }

    async fn submit(
        &self,
        payload: &SubmitPayload,
        options: &FormatOptions,
    ) -> Result<AdapterResponse, MathOcrError> {
        let SubmitPayload::Image { data_uri } = payload else {
            return Err(MathOcrError::Internal(format!(
                "image adapter cannot submit a {} payload",
                payload.kind()
            )));
        };

        let body = build_body(data_uri, options);
        let request = self.transport.post_json(TEXT_ENDPOINT, &body)?;
        let call = CallInfo {
            kind: AdapterKind::Image,
            operation: "submit",
            path: TEXT_ENDPOINT.to_string(),
            request: body,
        };
        let exchange = self.transport.send_json(call, request, &self.debug).await?;

        // v3/text reports some failures (no math found, bad image) as 200 + error.
        if exchange.body.get("error").is_some() {
            let message = error_message(&exchange.body).unwrap_or_else(|| "unknown error".into());
            return Err(MathOcrError::Api {
                endpoint: TEXT_ENDPOINT.to_string(),
                status: exchange.status,
                message,
            });
        }

        Ok(AdapterResponse {
            kind: AdapterKind::Image,
            status: exchange.status,
            body: exchange.body,
            elapsed_ms: exchange.elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_uri_has_mime_prefix() {
        let uri = to_data_uri(&[1, 2, 3], "image/jpeg");
        assert_eq!(uri, "data:image/jpeg;base64,AQID");
    }

    #[test]
    fn body_merges_options_and_src() {
        let mut options = FormatOptions::new();
        options.insert("formats".into(), json!(["text", "data"]));
        let body = build_body("data:image/png;base64,AA==", &options);
        assert_eq!(body["formats"][1], "data");
        assert_eq!(body["src"], "data:image/png;base64,AA==");
    }

    #[tokio::test]
    async fn rejects_foreign_payload_without_network() {
        let config = crate::config::CaptureConfig::builder()
            .base_url("http://127.0.0.1:9")
            .app_credentials("id", "key")
            .build()
            .unwrap();
        let adapter = ImageAdapter::new(ApiTransport::new(&config).unwrap());
        let err = adapter
            .submit(&SubmitPayload::PdfUrl("https://x/a.pdf".into()), &FormatOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MathOcrError::Internal(_)));
        assert!(adapter.last_debug_data().is_none());
    }
}

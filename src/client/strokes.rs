//! Stroke OCR adapter (`POST v3/strokes`).

use crate::client::http::{error_message, ApiTransport, CallInfo};
use crate::client::{AdapterKind, AdapterResponse, ClientAdapter, FormatOptions, SubmitPayload};
use crate::debug::{DebugRecord, DebugSlot, DebugSource};
use crate::error::MathOcrError;
use crate::pipeline::input::StrokeSet;
use crate::session::Resettable;
use async_trait::async_trait;
use serde_json::{json, Value};

pub const STROKES_ENDPOINT: &str = "v3/strokes";

/// Builds the `v3/strokes` request body: `{"strokes": {"strokes": {x, y}}, ..options}`.
pub fn build_body(strokes: &StrokeSet, options: &FormatOptions) -> Value {
    let mut body = options.clone();
    body.insert(
        "strokes".to_string(),
        json!({ "strokes": strokes.to_wire() }),
    );
    Value::Object(body)
}

/// Adapter for the handwriting strokes endpoint.
#[derive(Debug)]
pub struct StrokesAdapter {
    transport: ApiTransport,
    debug: DebugSlot,
}

impl StrokesAdapter {
    pub fn new(transport: ApiTransport) -> Self {
        Self {
            transport,
            debug: DebugSlot::default(),
        }
    }
}

impl DebugSource for StrokesAdapter {
    fn last_debug_data(&self) -> Option<DebugRecord> {
        self.debug.get()
    }
}

impl Resettable for StrokesAdapter {
    fn reset(&self) {
        self.debug.clear();
    }
}

#[async_trait]
impl ClientAdapter for StrokesAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Strokes
    }

    async fn submit(
        &self,
        payload: &SubmitPayload,
        options: &FormatOptions,
    ) -> Result<AdapterResponse, MathOcrError> {
        let SubmitPayload::Strokes(strokes) = payload else {
            return Err(MathOcrError::Internal(format!(
                "strokes adapter cannot submit a {} payload",
                payload.kind()
            )));
        };

        let body = build_body(strokes, options);
        let request = self.transport.post_json(STROKES_ENDPOINT, &body)?;
        let call = CallInfo {
            kind: AdapterKind::Strokes,
            operation: "submit",
            path: STROKES_ENDPOINT.to_string(),
            request: body,
        };
        let exchange = self.transport.send_json(call, request, &self.debug).await?;

        if exchange.body.get("error").is_some() {
            let message = error_message(&exchange.body).unwrap_or_else(|| "unknown error".into());
            return Err(MathOcrError::Api {
                endpoint: STROKES_ENDPOINT.to_string(),
                status: exchange.status,
                message,
            });
        }

        Ok(AdapterResponse {
            kind: AdapterKind::Strokes,
            status: exchange.status,
            body: exchange.body,
            elapsed_ms: exchange.elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::input::Stroke;

    #[test]
    fn body_nests_strokes_twice() {
        let set = StrokeSet::new(vec![Stroke::from_points([(1.0, 2.0), (3.0, 4.0)])]);
        let mut options = FormatOptions::new();
        options.insert("formats".into(), json!(["text"]));
        let body = build_body(&set, &options);
        assert_eq!(body["strokes"]["strokes"]["x"][0][1], 3.0);
        assert_eq!(body["strokes"]["strokes"]["y"][0][0], 2.0);
        assert_eq!(body["formats"][0], "text");
    }
}

//! Shared HTTP transport: authentication headers, timing and debug capture.
//!
//! Every adapter goes through [`ApiTransport`] so that all three endpoint
//! families attach `app_id` / `app_key` the same way, map transport failures
//! and non-2xx answers to the same error variants, and record a
//! [`DebugRecord`] for every exchange, failed ones included.

use crate::client::AdapterKind;
use crate::config::{CaptureConfig, CredentialSource};
use crate::debug::{DebugRecord, DebugSlot};
use crate::error::MathOcrError;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Data URIs longer than this are truncated in debug records.
const REDACT_AFTER: usize = 64;

/// A completed exchange with a JSON (or text) body.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: u16,
    pub body: Value,
    pub elapsed_ms: u64,
}

/// Describes one call for logging and debug capture.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub kind: AdapterKind,
    pub operation: &'static str,
    pub path: String,
    /// Request body as it should appear in the debug record.
    pub request: Value,
}

/// Authenticated HTTP client bound to one API root.
#[derive(Clone)]
pub struct ApiTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl ApiTransport {
    pub fn new(config: &CaptureConfig) -> Result<Self, MathOcrError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| MathOcrError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            credentials: Arc::clone(&config.credentials),
        })
    }

    /// Absolute URL for an API path such as `v3/text`.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(&self) -> Result<HeaderMap, MathOcrError> {
        let creds = match self.credentials.credentials() {
            Some(c) if c.is_complete() => c,
            _ => {
                return Err(MathOcrError::Auth {
                    detail: "app_id/app_key not available".into(),
                })
            }
        };
        let mut headers = HeaderMap::new();
        let invalid = |field: &str| MathOcrError::Auth {
            detail: format!("{field} contains characters not allowed in a header"),
        };
        headers.insert(
            "app_id",
            HeaderValue::from_str(&creds.app_id).map_err(|_| invalid("app_id"))?,
        );
        headers.insert(
            "app_key",
            HeaderValue::from_str(&creds.app_key).map_err(|_| invalid("app_key"))?,
        );
        Ok(headers)
    }

    /// An authenticated request builder for `path`.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, MathOcrError> {
        let headers = self.auth_headers()?;
        Ok(self
            .client
            .request(method, self.endpoint_url(path))
            .headers(headers))
    }

    /// Authenticated JSON POST builder.
    pub fn post_json(&self, path: &str, body: &Value) -> Result<RequestBuilder, MathOcrError> {
        Ok(self
            .request(Method::POST, path)?
            .header(CONTENT_TYPE, "application/json")
            .json(body))
    }

    /// Send and parse a JSON body, recording the exchange into `slot`.
    pub async fn send_json(
        &self,
        call: CallInfo,
        request: RequestBuilder,
        slot: &DebugSlot,
    ) -> Result<Exchange, MathOcrError> {
        let (status, bytes, elapsed_ms) = self.send_raw(&call, request, slot).await?;
        let body = parse_body(&bytes);

        record(slot, &call, body.clone(), status, elapsed_ms);

        if !(200..300).contains(&status) {
            let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
            warn!("{} {} → HTTP {}: {}", call.kind, call.path, status, message);
            return Err(MathOcrError::Api {
                endpoint: call.path,
                status,
                message,
            });
        }

        debug!("{} {} → HTTP {} in {}ms", call.kind, call.path, status, elapsed_ms);
        Ok(Exchange {
            status,
            body,
            elapsed_ms,
        })
    }

    /// Send and return the raw body bytes, recording only their size.
    pub async fn send_bytes(
        &self,
        call: CallInfo,
        request: RequestBuilder,
        slot: &DebugSlot,
    ) -> Result<Vec<u8>, MathOcrError> {
        let (status, bytes, elapsed_ms) = self.send_raw(&call, request, slot).await?;

        if !(200..300).contains(&status) {
            let body = parse_body(&bytes);
            record(slot, &call, body.clone(), status, elapsed_ms);
            let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
            return Err(MathOcrError::Api {
                endpoint: call.path,
                status,
                message,
            });
        }

        record(slot, &call, json!({ "bytes": bytes.len() }), status, elapsed_ms);
        Ok(bytes)
    }

    async fn send_raw(
        &self,
        call: &CallInfo,
        request: RequestBuilder,
        slot: &DebugSlot,
    ) -> Result<(u16, Vec<u8>, u64), MathOcrError> {
        let start = Instant::now();
        let network_err = |e: reqwest::Error, slot: &DebugSlot, elapsed_ms: u64| {
            let detail = if e.is_timeout() {
                format!("request timed out: {e}")
            } else {
                e.to_string()
            };
            record(slot, call, json!({ "error": detail }), 0, elapsed_ms);
            MathOcrError::Network {
                endpoint: call.path.clone(),
                detail,
            }
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Err(network_err(e, slot, start.elapsed().as_millis() as u64)),
        };
        let status = response.status().as_u16();
        let bytes = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => return Err(network_err(e, slot, start.elapsed().as_millis() as u64)),
        };
        Ok((status, bytes, start.elapsed().as_millis() as u64))
    }
}

impl std::fmt::Debug for ApiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn record(slot: &DebugSlot, call: &CallInfo, response: Value, status: u16, elapsed_ms: u64) {
    slot.record(DebugRecord {
        source: call.kind,
        operation: call.operation.to_string(),
        endpoint: call.path.clone(),
        timestamp: Utc::now(),
        request: redact(&call.request),
        response,
        metadata: json!({ "status": status, "duration_ms": elapsed_ms }),
    });
}

/// JSON if the body parses, else the body as a lossy string.
fn parse_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Best human-readable error text in an API error body.
pub fn error_message(body: &Value) -> Option<String> {
    if let Some(msg) = body.pointer("/error_info/message").and_then(Value::as_str) {
        return Some(msg.to_string());
    }
    match body.get("error") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Object(o)) => o
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => match body {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        },
    }
}

/// Copy of `value` with long `data:` URIs truncated.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::String(s) if s.starts_with("data:") && s.len() > REDACT_AFTER => {
            let mut cut = REDACT_AFTER;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            Value::String(format!("{}…({} bytes)", &s[..cut], s.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> ApiTransport {
        let config = CaptureConfig::builder()
            .base_url(base)
            .app_credentials("id", "key")
            .build()
            .unwrap();
        ApiTransport::new(&config).unwrap()
    }

    #[test]
    fn endpoint_url_joins_cleanly() {
        let t = transport("https://api.example.com");
        assert_eq!(t.endpoint_url("v3/text"), "https://api.example.com/v3/text");
        assert_eq!(t.endpoint_url("/v3/pdf/abc"), "https://api.example.com/v3/pdf/abc");
    }

    #[test]
    fn post_json_carries_auth_and_content_type() {
        let t = transport("https://api.example.com");
        let req = t
            .post_json("v3/text", &json!({"src": "x"}))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(req.headers()["app_id"], "id");
        assert_eq!(req.headers()["app_key"], "key");
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(req.method(), Method::POST);
    }

    #[test]
    fn missing_credentials_fail_before_building() {
        let config = CaptureConfig::builder()
            .app_credentials("", "")
            .build()
            .unwrap();
        let t = ApiTransport::new(&config).unwrap();
        assert!(matches!(
            t.request(Method::GET, "v3/pdf/x"),
            Err(MathOcrError::Auth { .. })
        ));
    }

    #[test]
    fn redact_truncates_data_uris_only() {
        let long = format!("data:image/png;base64,{}", "A".repeat(500));
        let v = json!({ "src": long, "formats": ["text"], "nested": [{"src": "short"}] });
        let r = redact(&v);
        let src = r["src"].as_str().unwrap();
        assert!(src.len() < 120, "got {} chars", src.len());
        assert!(src.contains("bytes)"));
        assert_eq!(r["formats"][0], "text");
        assert_eq!(r["nested"][0]["src"], "short");
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            error_message(&json!({"error": "bad", "error_info": {"message": "detailed"}})),
            Some("detailed".to_string())
        );
        assert_eq!(error_message(&json!({"error": "bad"})), Some("bad".to_string()));
        assert_eq!(
            error_message(&json!({"error": {"message": "obj"}})),
            Some("obj".to_string())
        );
        assert_eq!(error_message(&json!("Gateway Timeout")), Some("Gateway Timeout".into()));
        assert_eq!(error_message(&json!({"text": "x"})), None);
    }
}

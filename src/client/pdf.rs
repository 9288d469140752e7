//! PDF conversion adapter (`v3/pdf` + `v3/converter`).
//!
//! Unlike the OCR endpoints this family is asynchronous: submit returns a
//! job id, the job is polled until every requested format is terminal, and
//! finished formats are downloaded separately. Status is split across two
//! endpoints: `v3/pdf/{id}` tracks the job itself (and with it the native
//! `mmd`/`md` outputs) while `v3/converter/{id}` tracks each extra format,
//! which only starts converting once the job has completed.

use crate::client::http::{error_message, ApiTransport, CallInfo};
use crate::client::{
    AdapterKind, AdapterResponse, ClientAdapter, FormatOptions, FormatState, JobState, JobStatus,
    PdfAdapter, SubmitPayload,
};
use crate::debug::{DebugRecord, DebugSlot, DebugSource};
use crate::error::MathOcrError;
use crate::formats::is_conversion_format;
use crate::pipeline::validate::validate_job_id;
use crate::session::Resettable;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub const PDF_ENDPOINT: &str = "v3/pdf";
pub const CONVERTER_ENDPOINT: &str = "v3/converter";

/// Map one `conversion_status` entry to a [`FormatState`].
pub fn format_state(entry: Option<&Value>) -> FormatState {
    let Some(entry) = entry else {
        return FormatState::Pending;
    };
    match entry.get("status").and_then(Value::as_str) {
        Some("completed") => FormatState::Completed,
        Some("error") => FormatState::Error(
            error_message(entry).unwrap_or_else(|| "conversion failed".to_string()),
        ),
        _ => FormatState::Pending,
    }
}

/// Combine the job body and (optional) converter body into per-format states.
pub fn per_format_states(
    state: &JobState,
    pdf_body: &Value,
    converter_body: Option<&Value>,
    formats: &[String],
) -> BTreeMap<String, FormatState> {
    let job_error = || {
        error_message(pdf_body).unwrap_or_else(|| "PDF processing failed".to_string())
    };
    formats
        .iter()
        .map(|format| {
            let fs = match state {
                JobState::Error => FormatState::Error(job_error()),
                JobState::Completed if !is_conversion_format(format) => FormatState::Completed,
                JobState::Completed => format_state(
                    converter_body.and_then(|b| b.pointer(&format!("/conversion_status/{format}"))),
                ),
                _ => FormatState::Pending,
            };
            (format.clone(), fs)
        })
        .collect()
}

/// Adapter for the PDF conversion family.
#[derive(Debug)]
pub struct MathpixPdfAdapter {
    transport: ApiTransport,
    debug: DebugSlot,
}

impl MathpixPdfAdapter {
    pub fn new(transport: ApiTransport) -> Self {
        Self {
            transport,
            debug: DebugSlot::default(),
        }
    }

    async fn get_json(&self, operation: &'static str, path: String) -> Result<Value, MathOcrError> {
        let request = self.transport.request(Method::GET, &path)?;
        let call = CallInfo {
            kind: AdapterKind::Pdf,
            operation,
            path,
            request: Value::Null,
        };
        Ok(self.transport.send_json(call, request, &self.debug).await?.body)
    }
}

impl DebugSource for MathpixPdfAdapter {
    fn last_debug_data(&self) -> Option<DebugRecord> {
        self.debug.get()
    }
}

impl Resettable for MathpixPdfAdapter {
    fn reset(&self) {
        self.debug.clear();
    }
}

#[async_trait]
impl ClientAdapter for MathpixPdfAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Pdf
    }

    async fn submit(
        &self,
        payload: &SubmitPayload,
        options: &FormatOptions,
    ) -> Result<AdapterResponse, MathOcrError> {
        let (request, debug_body) = match payload {
            SubmitPayload::PdfUrl(url) => {
                let mut body = options.clone();
                body.insert("url".to_string(), Value::String(url.clone()));
                let body = Value::Object(body);
                (self.transport.post_json(PDF_ENDPOINT, &body)?, body)
            }
            SubmitPayload::PdfFile(file) => {
                let options_json = serde_json::to_string(options)
                    .map_err(|e| MathOcrError::Internal(format!("options_json: {e}")))?;
                let part = Part::bytes(file.bytes.clone())
                    .file_name(file.name.clone())
                    .mime_str("application/pdf")
                    .map_err(|e| MathOcrError::Internal(format!("multipart: {e}")))?;
                let form = Form::new()
                    .part("file", part)
                    .text("options_json", options_json);
                let debug_body = json!({
                    "file": file.name,
                    "size": file.bytes.len(),
                    "options_json": Value::Object(options.clone()),
                });
                (
                    self.transport.request(Method::POST, PDF_ENDPOINT)?.multipart(form),
                    debug_body,
                )
            }
            other => {
                return Err(MathOcrError::Internal(format!(
                    "pdf adapter cannot submit a {} payload",
                    other.kind()
                )))
            }
        };

        let call = CallInfo {
            kind: AdapterKind::Pdf,
            operation: "submit",
            path: PDF_ENDPOINT.to_string(),
            request: debug_body,
        };
        let exchange = self.transport.send_json(call, request, &self.debug).await?;

        if exchange.body.get("error").is_some() {
            let message = error_message(&exchange.body).unwrap_or_else(|| "unknown error".into());
            return Err(MathOcrError::Api {
                endpoint: PDF_ENDPOINT.to_string(),
                status: exchange.status,
                message,
            });
        }
        if exchange.body.get("pdf_id").and_then(Value::as_str).is_none() {
            return Err(MathOcrError::Api {
                endpoint: PDF_ENDPOINT.to_string(),
                status: exchange.status,
                message: "response carried no pdf_id".to_string(),
            });
        }

        Ok(AdapterResponse {
            kind: AdapterKind::Pdf,
            status: exchange.status,
            body: exchange.body,
            elapsed_ms: exchange.elapsed_ms,
        })
    }
}

#[async_trait]
impl PdfAdapter for MathpixPdfAdapter {
    async fn check_status(
        &self,
        job_id: &str,
        formats: &[String],
    ) -> Result<JobStatus, MathOcrError> {
        validate_job_id(job_id)?;

        let pdf_body = self
            .get_json("check_status", format!("{PDF_ENDPOINT}/{job_id}"))
            .await?;
        let state = JobState::parse(pdf_body.get("status").and_then(Value::as_str).unwrap_or(""));
        let percent_done = pdf_body.get("percent_done").and_then(Value::as_f64);

        let needs_converter =
            state == JobState::Completed && formats.iter().any(|f| is_conversion_format(f));
        let converter_body = if needs_converter {
            Some(
                self.get_json("check_conversion", format!("{CONVERTER_ENDPOINT}/{job_id}"))
                    .await?,
            )
        } else {
            None
        };

        let per_format = per_format_states(&state, &pdf_body, converter_body.as_ref(), formats);
        debug!("Job {}: {:?} {:?}", job_id, state, per_format);

        Ok(JobStatus {
            state,
            per_format,
            percent_done,
            raw: json!({ "pdf": pdf_body, "converter": converter_body }),
        })
    }

    async fn download(&self, job_id: &str, format: &str) -> Result<Vec<u8>, MathOcrError> {
        validate_job_id(job_id)?;
        let path = format!("{PDF_ENDPOINT}/{job_id}.{format}");
        let request = self.transport.request(Method::GET, &path)?;
        let call = CallInfo {
            kind: AdapterKind::Pdf,
            operation: "download",
            path,
            request: json!({ "format": format }),
        };
        self.transport.send_bytes(call, request, &self.debug).await
    }
}

//! Structural validation: the gate in front of every network call.
//!
//! Everything here is synchronous and side-effect free. A failure raises
//! [`MathOcrError::Validation`] and the run stops before consent is asked or
//! a byte is sent. Normalisation downstream never rejects anything, so these
//! checks are the only place a malformed input can be refused.

use crate::client::image_ocr::to_data_uri;
use crate::client::{AdapterKind, FormatOptions, SubmitPayload};
use crate::config::CaptureConfig;
use crate::error::MathOcrError;
use crate::formats::is_known_pdf_format;
use crate::mode::Mode;
use crate::pipeline::input::{is_url, sniff_mime, CaptureInput, FileInput, StrokeSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Minimum points a stroke needs to describe a line.
pub const MIN_POINTS_PER_STROKE: usize = 2;

/// Image types the OCR endpoint accepts.
pub const ACCEPTED_IMAGE_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/bmp",
    "image/webp",
    "image/tiff",
];

static RE_JOB_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]{0,127}$").unwrap());

/// An input that passed validation, tagged with the adapter that will take it.
#[derive(Debug, Clone)]
pub struct ValidatedInput {
    pub kind: AdapterKind,
    pub payload: SubmitPayload,
}

/// Validate `input` for `mode` and build the submit payload.
pub fn validate(
    mode: Mode,
    input: &CaptureInput,
    options: &FormatOptions,
    config: &CaptureConfig,
) -> Result<ValidatedInput, MathOcrError> {
    let kind = resolve_kind(mode, input)?;
    if kind != AdapterKind::Pdf {
        validate_ocr_formats(options)?;
    }
    let payload = match (kind, input) {
        (AdapterKind::Strokes, CaptureInput::Strokes(strokes)) => {
            validate_strokes(strokes)?;
            SubmitPayload::Strokes(strokes.clone())
        }
        (AdapterKind::Image, CaptureInput::File(file)) => {
            let mime = validate_image_bytes(&file.bytes, config.max_image_bytes)?;
            check_declared_mime(file, mime)?;
            SubmitPayload::Image {
                data_uri: to_data_uri(&file.bytes, mime),
            }
        }
        (AdapterKind::Image, CaptureInput::Frame(frame)) => {
            let mime = validate_image_bytes(&frame.bytes, config.max_image_bytes)?;
            SubmitPayload::Image {
                data_uri: to_data_uri(&frame.bytes, mime),
            }
        }
        (AdapterKind::Pdf, CaptureInput::File(file)) => {
            validate_pdf_file(file, config.max_pdf_bytes)?;
            validate_pdf_formats(options)?;
            SubmitPayload::PdfFile(file.clone())
        }
        (AdapterKind::Pdf, CaptureInput::PdfUrl(url)) => {
            validate_pdf_url(url)?;
            validate_pdf_formats(options)?;
            SubmitPayload::PdfUrl(url.clone())
        }
        (kind, input) => {
            return Err(MathOcrError::Internal(format!(
                "no payload for {kind} adapter from {}",
                input.display_name()
            )))
        }
    };
    Ok(ValidatedInput { kind, payload })
}

/// Which adapter a (mode, input) pair routes to.
pub fn resolve_kind(mode: Mode, input: &CaptureInput) -> Result<AdapterKind, MathOcrError> {
    match (mode, input) {
        (Mode::Upload, CaptureInput::File(f)) if f.is_pdf() => Ok(AdapterKind::Pdf),
        (Mode::Upload, CaptureInput::File(_)) => Ok(AdapterKind::Image),
        (Mode::Upload, CaptureInput::PdfUrl(_)) => Ok(AdapterKind::Pdf),
        (Mode::Draw, CaptureInput::Strokes(_)) => Ok(AdapterKind::Strokes),
        (Mode::Camera, CaptureInput::Frame(_)) => Ok(AdapterKind::Image),
        (mode, input) => Err(MathOcrError::Validation(format!(
            "{} cannot be submitted in {mode} mode",
            input.display_name()
        ))),
    }
}

/// Strokes must be non-empty, with matched coordinate arrays of finite values
/// and at least [`MIN_POINTS_PER_STROKE`] points each.
pub fn validate_strokes(set: &StrokeSet) -> Result<(), MathOcrError> {
    if set.strokes.is_empty() {
        return Err(MathOcrError::Validation("no strokes drawn".into()));
    }
    for (i, stroke) in set.strokes.iter().enumerate() {
        if stroke.x.len() != stroke.y.len() {
            return Err(MathOcrError::Validation(format!(
                "stroke {i}: {} x coordinates but {} y coordinates",
                stroke.x.len(),
                stroke.y.len()
            )));
        }
        if stroke.x.len() < MIN_POINTS_PER_STROKE {
            return Err(MathOcrError::Validation(format!(
                "stroke {i}: needs at least {MIN_POINTS_PER_STROKE} points, has {}",
                stroke.x.len()
            )));
        }
        if stroke.x.iter().chain(&stroke.y).any(|v| !v.is_finite()) {
            return Err(MathOcrError::Validation(format!(
                "stroke {i}: coordinates must be finite"
            )));
        }
    }
    Ok(())
}

/// Size and content checks for an image; returns the sniffed mime type.
pub fn validate_image_bytes(bytes: &[u8], max_bytes: u64) -> Result<&'static str, MathOcrError> {
    check_size(bytes.len() as u64, max_bytes, "image")?;
    match sniff_mime(bytes) {
        Some(mime) if ACCEPTED_IMAGE_MIMES.contains(&mime) => Ok(mime),
        Some(other) => Err(MathOcrError::Validation(format!(
            "unsupported file type '{other}'"
        ))),
        None => Err(MathOcrError::Validation(
            "file is not a recognised image".into(),
        )),
    }
}

fn check_declared_mime(file: &FileInput, sniffed: &str) -> Result<(), MathOcrError> {
    match file.declared_mime.as_deref() {
        Some(declared) if declared != sniffed && declared.starts_with("image/") => {
            Err(MathOcrError::Validation(format!(
                "'{}' claims to be {declared} but contains {sniffed}",
                file.name
            )))
        }
        Some(declared) if !declared.starts_with("image/") && declared != "application/octet-stream" => {
            Err(MathOcrError::Validation(format!(
                "'{}' has unsupported type '{declared}'",
                file.name
            )))
        }
        _ => Ok(()),
    }
}

pub fn validate_pdf_file(file: &FileInput, max_bytes: u64) -> Result<(), MathOcrError> {
    check_size(file.size(), max_bytes, "PDF")?;
    if !file.is_pdf() {
        let mut magic = [0u8; 4];
        let n = file.bytes.len().min(4);
        magic[..n].copy_from_slice(&file.bytes[..n]);
        return Err(MathOcrError::Validation(format!(
            "'{}' is not a valid PDF (first bytes: {magic:?})",
            file.name
        )));
    }
    Ok(())
}

pub fn validate_pdf_url(url: &str) -> Result<(), MathOcrError> {
    if !is_url(url) {
        return Err(MathOcrError::Validation(format!(
            "'{url}' is not an HTTP/HTTPS URL"
        )));
    }
    reqwest::Url::parse(url)
        .map(|_| ())
        .map_err(|e| MathOcrError::Validation(format!("invalid URL '{url}': {e}")))
}

/// An image/strokes `formats` override must be a list of strings. Names are
/// not checked against a fixed set; the OCR endpoint grows new ones.
pub fn validate_ocr_formats(options: &FormatOptions) -> Result<(), MathOcrError> {
    match options.get("formats") {
        None => Ok(()),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        Some(_) => Err(MathOcrError::Validation(
            "'formats' must be a list of format names".into(),
        )),
    }
}

/// Every entry of a caller-supplied `formats` list must be a known PDF format.
pub fn validate_pdf_formats(options: &FormatOptions) -> Result<(), MathOcrError> {
    let Some(formats) = options.get("formats") else {
        return Ok(());
    };
    let Value::Array(items) = formats else {
        return Err(MathOcrError::Validation(
            "'formats' must be a list of format names".into(),
        ));
    };
    if items.is_empty() {
        return Err(MathOcrError::Validation("'formats' is empty".into()));
    }
    for item in items {
        match item.as_str() {
            Some(f) if is_known_pdf_format(f) => {}
            Some(f) => {
                return Err(MathOcrError::Validation(format!(
                    "unknown PDF output format '{f}'"
                )))
            }
            None => {
                return Err(MathOcrError::Validation(
                    "'formats' entries must be strings".into(),
                ))
            }
        }
    }
    Ok(())
}

/// Job ids are interpolated into URL paths; only plain identifiers pass.
pub fn validate_job_id(job_id: &str) -> Result<(), MathOcrError> {
    if RE_JOB_ID.is_match(job_id) {
        Ok(())
    } else {
        Err(MathOcrError::Validation(format!("invalid job id '{job_id}'")))
    }
}

fn check_size(size: u64, max: u64, what: &str) -> Result<(), MathOcrError> {
    if size == 0 {
        return Err(MathOcrError::Validation(format!("{what} is empty")));
    }
    if size > max {
        return Err(MathOcrError::Validation(format!(
            "{what} is {size} bytes, larger than the {max}-byte limit"
        )));
    }
    Ok(())
}

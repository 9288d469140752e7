//! Maps a raw adapter response onto the canonical [`RecognitionResult`].
//!
//! ## Why one pure function?
//!
//! The three endpoint families answer in overlapping but different shapes.
//! Folding them here, keyed by the [`AdapterKind`] the caller already knows,
//! means renderers and callers only ever see one type. Normalisation never
//! fails: a field that is missing or has the wrong type simply yields its
//! default, and rejection is the validator's job.
//!
//! ## Precedence
//!
//! | field | order |
//! |---|---|
//! | `latex` | `text` → `latex_styled` → first `data[]` entry of type `latex` |
//! | `mathml`, `asciimath` | top-level field → first `data[]` entry of that type |
//! | `html` | top-level field |
//! | `markdown` | `md` → `mmd` → `text` (image/strokes only) |
//! | `confidence` | `confidence` → `confidence_rate` → 0, clamped to `[0, 1]` |
//! | `is_handwritten` | explicit boolean → `kind == Strokes` |

use crate::client::AdapterKind;
use crate::output::{RecognitionResult, Timing};
use serde_json::Value;

/// Build a [`RecognitionResult`] from `raw`. Timing and the conversion report
/// are left empty for the caller to fill in.
pub fn normalize(kind: AdapterKind, raw: &Value) -> RecognitionResult {
    let latex = first_str(raw, &["text", "latex_styled"])
        .or_else(|| data_entry(raw, "latex"))
        .unwrap_or_default();
    let mathml = first_str(raw, &["mathml"])
        .or_else(|| data_entry(raw, "mathml"))
        .unwrap_or_default();
    let asciimath = first_str(raw, &["asciimath"])
        .or_else(|| data_entry(raw, "asciimath"))
        .unwrap_or_default();
    let html = first_str(raw, &["html"]).unwrap_or_default();

    let markdown = match kind {
        AdapterKind::Pdf => first_str(raw, &["md", "mmd"]),
        AdapterKind::Image | AdapterKind::Strokes => first_str(raw, &["md", "mmd", "text"]),
    }
    .unwrap_or_default();

    let confidence = ["confidence", "confidence_rate"]
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_f64))
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.0);

    let is_handwritten = raw
        .get("is_handwritten")
        .and_then(Value::as_bool)
        .unwrap_or(kind == AdapterKind::Strokes);

    let request_id = first_str(raw, &["request_id"]);

    RecognitionResult {
        kind,
        latex,
        mathml,
        asciimath,
        html,
        markdown,
        raw_json: serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string()),
        confidence,
        is_handwritten,
        timing: Timing::default(),
        request_id,
        conversion: None,
        raw_response: raw.clone(),
    }
}

/// First non-empty string among `keys`.
fn first_str(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Value of the first `data[]` entry whose `type` is `ty`.
fn data_entry(raw: &Value, ty: &str) -> Option<String> {
    raw.get("data")?
        .as_array()?
        .iter()
        .find(|entry| entry.get("type").and_then(Value::as_str) == Some(ty))
        .and_then(|entry| entry.get("value").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

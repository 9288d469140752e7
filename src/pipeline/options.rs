//! Request option merging.
//!
//! Each request kind has its own defaults. Caller overrides replace defaults
//! key by key, and the configured always-include formats are then unioned
//! into the image/strokes `formats` list so the renderer and normaliser
//! always get `html` and `data`, whatever the caller picked.

use crate::client::{AdapterKind, FormatOptions};
use crate::config::CaptureConfig;
use crate::formats::{is_conversion_format, union_formats, DEFAULT_DATA_OPTIONS, DEFAULT_OCR_FORMATS};
use serde_json::{json, Value};

/// Options ready for the wire plus the formats the run must wait for.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedOptions {
    pub wire: FormatOptions,
    /// PDF formats to poll for and download. Empty for image/strokes.
    pub requested_formats: Vec<String>,
}

/// Defaults for `kind` before caller overrides.
pub fn defaults_for(kind: AdapterKind) -> FormatOptions {
    let mut options = FormatOptions::new();
    match kind {
        AdapterKind::Image | AdapterKind::Strokes => {
            options.insert("formats".into(), json!(DEFAULT_OCR_FORMATS));
            let data_options: FormatOptions = DEFAULT_DATA_OPTIONS
                .iter()
                .map(|(k, v)| (k.to_string(), Value::Bool(*v)))
                .collect();
            options.insert("data_options".into(), Value::Object(data_options));
        }
        AdapterKind::Pdf => {
            options.insert("math_inline_delimiters".into(), json!(["$", "$"]));
            options.insert("rm_spaces".into(), Value::Bool(true));
        }
    }
    options
}

/// Merge defaults, caller overrides and the always-include policy.
pub fn merge(kind: AdapterKind, overrides: &FormatOptions, config: &CaptureConfig) -> MergedOptions {
    let mut wire = defaults_for(kind);

    match kind {
        AdapterKind::Image | AdapterKind::Strokes => {
            for (key, value) in overrides {
                wire.insert(key.clone(), value.clone());
            }
            let selected = string_list(wire.get("formats"));
            let formats = union_formats(
                selected.iter().map(String::as_str),
                config.always_include_formats.iter().map(String::as_str),
            );
            wire.insert("formats".into(), json!(formats));
            MergedOptions {
                wire,
                requested_formats: Vec::new(),
            }
        }
        AdapterKind::Pdf => {
            let listed = match overrides.get("formats") {
                Some(v) => string_list(Some(v)),
                None => config.default_pdf_formats.clone(),
            };
            // Each format is polled and downloaded once.
            let requested =
                union_formats(listed.iter().map(String::as_str), std::iter::empty::<&str>());
            let conversion: FormatOptions = requested
                .iter()
                .filter(|f| is_conversion_format(f))
                .map(|f| (f.clone(), Value::Bool(true)))
                .collect();
            if !conversion.is_empty() {
                wire.insert("conversion_formats".into(), Value::Object(conversion));
            }
            for (key, value) in overrides {
                if key != "formats" {
                    wire.insert(key.clone(), value.clone());
                }
            }
            MergedOptions {
                wire,
                requested_formats: requested,
            }
        }
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(v: Value) -> FormatOptions {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn image_defaults_include_policy_formats() {
        let merged = merge(AdapterKind::Image, &FormatOptions::new(), &CaptureConfig::default());
        assert_eq!(
            merged.wire["formats"],
            json!(["text", "latex_styled", "html", "data"])
        );
        assert_eq!(merged.wire["data_options"]["include_mathml"], true);
        assert!(merged.requested_formats.is_empty());
    }

    #[test]
    fn caller_wins_per_key_but_policy_formats_stay() {
        let merged = merge(
            AdapterKind::Strokes,
            &overrides(json!({
                "formats": ["text"],
                "data_options": {"include_asciimath": false},
                "rm_spaces": false
            })),
            &CaptureConfig::default(),
        );
        assert_eq!(merged.wire["formats"], json!(["text", "html", "data"]));
        assert_eq!(merged.wire["data_options"], json!({"include_asciimath": false}));
        assert_eq!(merged.wire["rm_spaces"], false);
    }

    #[test]
    fn empty_policy_leaves_caller_selection_alone() {
        let config = CaptureConfig::builder()
            .always_include_formats(Vec::<String>::new())
            .build()
            .unwrap();
        let merged = merge(
            AdapterKind::Image,
            &overrides(json!({"formats": ["latex_styled"]})),
            &config,
        );
        assert_eq!(merged.wire["formats"], json!(["latex_styled"]));
    }

    #[test]
    fn pdf_formats_split_into_conversion_map() {
        let merged = merge(
            AdapterKind::Pdf,
            &overrides(json!({"formats": ["mmd", "docx", "tex.zip"], "rm_spaces": false})),
            &CaptureConfig::default(),
        );
        assert_eq!(merged.requested_formats, vec!["mmd", "docx", "tex.zip"]);
        assert_eq!(
            merged.wire["conversion_formats"],
            json!({"docx": true, "tex.zip": true})
        );
        assert!(merged.wire.get("formats").is_none());
        assert_eq!(merged.wire["rm_spaces"], false);
    }

    #[test]
    fn pdf_defaults_when_no_formats_given() {
        let merged = merge(AdapterKind::Pdf, &FormatOptions::new(), &CaptureConfig::default());
        assert_eq!(merged.requested_formats, vec!["mmd"]);
        assert!(merged.wire.get("conversion_formats").is_none());
    }

    #[test]
    fn duplicate_pdf_formats_requested_once() {
        let merged = merge(
            AdapterKind::Pdf,
            &overrides(json!({"formats": ["docx", "mmd", "docx", "mmd"]})),
            &CaptureConfig::default(),
        );
        assert_eq!(merged.requested_formats, vec!["docx", "mmd"]);
        assert_eq!(merged.wire["conversion_formats"], json!({"docx": true}));
    }
}

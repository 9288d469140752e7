//! Output-format catalogue and the named default format sets.
//!
//! Centralising every format policy here serves two purposes:
//!
//! 1. **Single source of truth**: which formats a request asks for by
//!    default, and which are always added regardless of caller selection,
//!    lives in exactly one place instead of being scattered through request
//!    builders.
//!
//! 2. **Testability**: the sets are plain constants that unit tests can
//!    inspect without an HTTP server.
//!
//! Callers override the always-include set through
//! [`crate::config::CaptureConfig::always_include_formats`]; the constants
//! here are the defaults.

/// Formats requested from the image and strokes endpoints when the caller
/// names none.
pub const DEFAULT_OCR_FORMATS: &[&str] = &["text", "latex_styled"];

/// Formats added to every image/strokes request whatever the caller chose.
///
/// `html` feeds the side-by-side renderer and `data` carries the typed
/// MathML/AsciiMath entries the normaliser back-fills from.
pub const ALWAYS_INCLUDE_FORMATS: &[&str] = &["html", "data"];

/// `data_options` sent with image/strokes requests so `data[]` is populated.
pub const DEFAULT_DATA_OPTIONS: &[(&str, bool)] = &[
    ("include_asciimath", true),
    ("include_mathml", true),
    ("include_latex", true),
];

/// Formats the PDF endpoint produces natively once processing completes.
///
/// These never appear in the converter's per-format status map.
pub const NATIVE_PDF_FORMATS: &[&str] = &["mmd", "md"];

/// Formats the PDF converter can produce on request.
pub const CONVERSION_FORMATS: &[&str] = &[
    "docx",
    "tex.zip",
    "html",
    "pdf",
    "latex.pdf",
    "pptx",
    "md.zip",
    "mmd.zip",
];

/// PDF formats whose downloads are text and are folded into the raw
/// response under their own name, so normalisation can read them.
pub const TEXT_PDF_FORMATS: &[&str] = &["mmd", "md", "html"];

/// PDF formats requested when the caller names none.
pub const DEFAULT_PDF_FORMATS: &[&str] = &["mmd"];

/// True if `format` is native or convertible for the PDF endpoint.
pub fn is_known_pdf_format(format: &str) -> bool {
    NATIVE_PDF_FORMATS.contains(&format) || CONVERSION_FORMATS.contains(&format)
}

/// True if `format` is produced by the converter rather than natively.
pub fn is_conversion_format(format: &str) -> bool {
    CONVERSION_FORMATS.contains(&format)
}

/// Union `base` with `extra`, keeping first-seen order and dropping duplicates.
pub fn union_formats<'a>(
    base: impl IntoIterator<Item = &'a str>,
    extra: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for f in base.into_iter().chain(extra) {
        if !out.iter().any(|existing| existing == f) {
            out.push(f.to_string());
        }
    }
    out
}

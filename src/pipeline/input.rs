//! Captured inputs: what each mode hands to the pipeline.
//!
//! Uploads are read fully into memory up front. The OCR endpoints take the
//! image inline as a base64 data URI and PDFs are posted as multipart bodies,
//! so there is nothing to gain from streaming, and holding the bytes lets the
//! validator sniff the real content type instead of trusting the extension.

use crate::error::MathOcrError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One pen stroke: parallel x/y coordinate arrays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Stroke {
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let (x, y) = points.into_iter().unzip();
        Self { x, y }
    }

    pub fn len(&self) -> usize {
        self.x.len().min(self.y.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything drawn on the canvas since it was last cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokeSet {
    pub strokes: Vec<Stroke>,
}

impl StrokeSet {
    pub fn new(strokes: Vec<Stroke>) -> Self {
        Self { strokes }
    }

    pub fn point_count(&self) -> usize {
        self.strokes.iter().map(Stroke::len).sum()
    }

    /// Column-major `{x: [[..]], y: [[..]]}` layout used on the wire.
    pub fn to_wire(&self) -> serde_json::Value {
        let xs: Vec<&Vec<f64>> = self.strokes.iter().map(|s| &s.x).collect();
        let ys: Vec<&Vec<f64>> = self.strokes.iter().map(|s| &s.y).collect();
        serde_json::json!({ "x": xs, "y": ys })
    }
}

/// An uploaded file held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct FileInput {
    pub name: String,
    /// Mime type the caller declared (from a file picker or extension).
    pub declared_mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for FileInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileInput")
            .field("name", &self.name)
            .field("declared_mime", &self.declared_mime)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl FileInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            declared_mime: None,
            bytes,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime = Some(mime.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Read a local file, validating that it exists and is readable.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, MathOcrError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                MathOcrError::Validation(format!("file not found: '{}'", path.display()))
            }
            std::io::ErrorKind::PermissionDenied => MathOcrError::Validation(format!(
                "permission denied reading '{}'",
                path.display()
            )),
            _ => MathOcrError::Validation(format!("cannot read '{}': {e}", path.display())),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let declared_mime = mime_from_extension(&name).map(str::to_string);
        debug!("Read {} ({} bytes)", path.display(), bytes.len());

        Ok(Self {
            name,
            declared_mime,
            bytes,
        })
    }

    /// Content type detected from magic bytes.
    pub fn sniffed_mime(&self) -> Option<&'static str> {
        sniff_mime(&self.bytes)
    }

    pub fn is_pdf(&self) -> bool {
        self.bytes.starts_with(b"%PDF")
    }
}

/// A still frame grabbed from the camera stream.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl std::fmt::Debug for ImageFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFrame")
            .field("mime", &self.mime)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Input handed to [`crate::coordinator::Coordinator::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureInput {
    /// An uploaded image or PDF.
    File(FileInput),
    /// Strokes drawn on the canvas.
    Strokes(StrokeSet),
    /// A camera still.
    Frame(ImageFrame),
    /// A remote PDF the API fetches itself.
    PdfUrl(String),
}

impl CaptureInput {
    /// Name shown in the consent prompt.
    pub fn display_name(&self) -> String {
        match self {
            CaptureInput::File(f) => f.name.clone(),
            CaptureInput::Strokes(_) => "handwritten strokes".to_string(),
            CaptureInput::Frame(_) => "camera capture".to_string(),
            CaptureInput::PdfUrl(url) => url.clone(),
        }
    }

    /// Payload size in bytes (coordinate count for strokes).
    pub fn size(&self) -> u64 {
        match self {
            CaptureInput::File(f) => f.size(),
            CaptureInput::Strokes(s) => s.point_count() as u64,
            CaptureInput::Frame(f) => f.bytes.len() as u64,
            CaptureInput::PdfUrl(_) => 0,
        }
    }

    /// Mime type shown in the consent prompt.
    pub fn mime(&self) -> String {
        match self {
            CaptureInput::File(f) => f
                .sniffed_mime()
                .map(str::to_string)
                .or_else(|| f.declared_mime.clone())
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            CaptureInput::Strokes(_) => "application/json".to_string(),
            CaptureInput::Frame(f) => f.mime.clone(),
            CaptureInput::PdfUrl(_) => "application/pdf".to_string(),
        }
    }

    /// Raw image bytes suitable for a side-by-side preview.
    pub fn preview_bytes(&self) -> Option<(&[u8], &str)> {
        match self {
            CaptureInput::File(f) if !f.is_pdf() => {
                f.sniffed_mime().map(|m| (f.bytes.as_slice(), m))
            }
            CaptureInput::Frame(f) => Some((f.bytes.as_slice(), f.mime.as_str())),
            _ => None,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Detect a supported content type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        return Some("application/pdf");
    }
    let format = image::guess_format(bytes).ok()?;
    Some(match format {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Gif => "image/gif",
        image::ImageFormat::Bmp => "image/bmp",
        image::ImageFormat::WebP => "image/webp",
        image::ImageFormat::Tiff => "image/tiff",
        _ => return None,
    })
}

/// Guess a mime type from a file name's extension.
pub fn mime_from_extension(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        _ => return None,
    })
}

/// File extension for a supported image mime type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        "image/tiff" => "tiff",
        "application/pdf" => "pdf",
        _ => "png",
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;

    /// A tiny valid PNG.
    pub fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode png");
        buf
    }

    pub fn pdf_bytes() -> Vec<u8> {
        b"%PDF-1.4\n%fixture\n".to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn sniffs_png_and_pdf() {
        assert_eq!(sniff_mime(&fixtures::png_bytes()), Some("image/png"));
        assert_eq!(sniff_mime(&fixtures::pdf_bytes()), Some("application/pdf"));
        assert_eq!(sniff_mime(b"hello world"), None);
    }

    #[test]
    fn extension_mime_lookup() {
        assert_eq!(mime_from_extension("scan.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_extension("paper.pdf"), Some("application/pdf"));
        assert_eq!(mime_from_extension("notes"), None);
    }

    #[test]
    fn strokes_wire_layout() {
        let set = StrokeSet::new(vec![
            Stroke::from_points([(0.0, 1.0), (2.0, 3.0)]),
            Stroke::from_points([(4.0, 5.0), (6.0, 7.0), (8.0, 9.0)]),
        ]);
        let wire = set.to_wire();
        assert_eq!(wire["x"][1][2], 8.0);
        assert_eq!(wire["y"][0][1], 3.0);
        assert_eq!(set.point_count(), 5);
    }

    #[test]
    fn pdf_file_has_no_preview() {
        let input = CaptureInput::File(FileInput::new("a.pdf", fixtures::pdf_bytes()));
        assert!(input.preview_bytes().is_none());
        assert_eq!(input.mime(), "application/pdf");
    }

    #[tokio::test]
    async fn from_path_missing_file_is_validation_error() {
        let err = FileInput::from_path("/definitely/not/here.png").await.unwrap_err();
        assert!(matches!(err, MathOcrError::Validation(_)));
    }

    #[tokio::test]
    async fn from_path_reads_bytes_and_guesses_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eq.png");
        std::fs::write(&path, fixtures::png_bytes()).unwrap();

        let file = FileInput::from_path(&path).await.unwrap();
        assert_eq!(file.name, "eq.png");
        assert_eq!(file.declared_mime.as_deref(), Some("image/png"));
        assert_eq!(file.sniffed_mime(), Some("image/png"));
    }
}

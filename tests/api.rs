//! Adapter tests against a fake OCR API served by `wiremock`.
//!
//! Each test stands up its own server, so they run in parallel and never
//! touch the network.

use edgequake_mathocr::client::image_ocr::to_data_uri;
use edgequake_mathocr::client::{
    ApiTransport, FormatState, ImageAdapter, JobState, MathpixPdfAdapter, StrokesAdapter,
    SubmitPayload,
};
use edgequake_mathocr::{
    AdapterKind, CaptureConfig, ClientAdapter, DebugSource, FileInput, FormatOptions,
    MathOcrError, PdfAdapter, Stroke, StrokeSet,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn config(server: &MockServer) -> CaptureConfig {
    CaptureConfig::builder()
        .base_url(server.uri())
        .app_credentials("test-app", "test-key")
        .request_timeout_secs(5)
        .build()
        .unwrap()
}

fn transport(server: &MockServer) -> ApiTransport {
    ApiTransport::new(&config(server)).unwrap()
}

fn options(v: Value) -> FormatOptions {
    v.as_object().cloned().unwrap()
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 255, 255, 255]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

// ── Image endpoint ───────────────────────────────────────────────────────────

#[tokio::test]
async fn image_submit_sends_auth_headers_and_data_uri() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/text"))
        .and(header("app_id", "test-app"))
        .and(header("app_key", "test-key"))
        .and(body_partial_json(json!({"formats": ["text", "html"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "request_id": "req-1",
            "text": "\\( x^2 \\)",
            "confidence": 0.98
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = ImageAdapter::new(transport(&server));
    let payload = SubmitPayload::Image {
        data_uri: to_data_uri(&png_bytes(), "image/png"),
    };
    let response = adapter
        .submit(&payload, &options(json!({"formats": ["text", "html"]})))
        .await
        .unwrap();

    assert_eq!(response.kind, AdapterKind::Image);
    assert_eq!(response.status, 200);
    assert_eq!(response.body["request_id"], "req-1");

    let record = adapter.last_debug_data().unwrap();
    assert_eq!(record.source, AdapterKind::Image);
    assert_eq!(record.operation, "submit");
    assert_eq!(record.metadata["status"], 200);
    let src = record.request["src"].as_str().unwrap();
    assert!(src.starts_with("data:image/png;base64,"));
    assert!(src.contains("bytes)"), "data URI should be truncated: {src}");
}

#[tokio::test]
async fn image_http_error_maps_to_api_error_and_keeps_debug() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/text"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "Invalid credentials",
            "error_info": {"id": "http_unauthorized", "message": "Invalid credentials"}
        })))
        .mount(&server)
        .await;

    let adapter = ImageAdapter::new(transport(&server));
    let payload = SubmitPayload::Image {
        data_uri: to_data_uri(&png_bytes(), "image/png"),
    };
    let err = adapter
        .submit(&payload, &FormatOptions::new())
        .await
        .unwrap_err();

    match &err {
        MathOcrError::Api { status, message, .. } => {
            assert_eq!(*status, 401);
            assert_eq!(message, "Invalid credentials");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    let record = adapter.last_debug_data().unwrap();
    assert_eq!(record.metadata["status"], 401);
    assert_eq!(record.response["error"], "Invalid credentials");
}

#[tokio::test]
async fn error_payload_with_success_status_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "Image too small"
        })))
        .mount(&server)
        .await;

    let adapter = ImageAdapter::new(transport(&server));
    let payload = SubmitPayload::Image {
        data_uri: to_data_uri(&png_bytes(), "image/png"),
    };
    let err = adapter
        .submit(&payload, &FormatOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MathOcrError::Api { status: 200, .. }));
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() {
    let config = CaptureConfig::builder()
        .base_url("http://127.0.0.1:9")
        .app_credentials("a", "b")
        .request_timeout_secs(2)
        .build()
        .unwrap();
    let adapter = ImageAdapter::new(ApiTransport::new(&config).unwrap());
    let payload = SubmitPayload::Image {
        data_uri: to_data_uri(&png_bytes(), "image/png"),
    };
    let err = adapter
        .submit(&payload, &FormatOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MathOcrError::Network { .. }), "got {err:?}");
    assert!(err.is_retryable());
    assert!(adapter.last_debug_data().unwrap().response.get("error").is_some());
}

// ── Strokes endpoint ─────────────────────────────────────────────────────────

#[tokio::test]
async fn strokes_submit_uses_nested_wire_layout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/strokes"))
        .and(header_regex("content-type", "^application/json"))
        .and(body_partial_json(json!({
            "strokes": {"strokes": {
                "x": [[10.0, 20.0, 30.0], [5.0, 5.0]],
                "y": [[1.0, 2.0, 3.0], [0.0, 9.0]]
            }}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "latex_styled": "x+1",
            "is_handwritten": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = StrokesAdapter::new(transport(&server));
    let strokes = StrokeSet::new(vec![
        Stroke::from_points([(10.0, 1.0), (20.0, 2.0), (30.0, 3.0)]),
        Stroke::from_points([(5.0, 0.0), (5.0, 9.0)]),
    ]);
    let response = adapter
        .submit(&SubmitPayload::Strokes(strokes), &FormatOptions::new())
        .await
        .unwrap();
    assert_eq!(response.body["latex_styled"], "x+1");
    assert_eq!(adapter.last_debug_data().unwrap().source, AdapterKind::Strokes);
}

// ── PDF endpoints ────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_url_submit_posts_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/pdf"))
        .and(body_partial_json(json!({
            "url": "https://example.com/paper.pdf",
            "conversion_formats": {"docx": true}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pdf_id": "2025_abc"})))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = MathpixPdfAdapter::new(transport(&server));
    let response = adapter
        .submit(
            &SubmitPayload::PdfUrl("https://example.com/paper.pdf".into()),
            &options(json!({"conversion_formats": {"docx": true}})),
        )
        .await
        .unwrap();
    assert_eq!(response.body["pdf_id"], "2025_abc");
}

#[tokio::test]
async fn pdf_file_submit_is_multipart() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/pdf"))
        .and(header_regex("content-type", "^multipart/form-data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pdf_id": "2025_file"})))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = MathpixPdfAdapter::new(transport(&server));
    let file = FileInput::new("paper.pdf", b"%PDF-1.7\n%test\n".to_vec());
    let response = adapter
        .submit(&SubmitPayload::PdfFile(file), &FormatOptions::new())
        .await
        .unwrap();
    assert_eq!(response.body["pdf_id"], "2025_file");

    let record = adapter.last_debug_data().unwrap();
    assert_eq!(record.request["file"], "paper.pdf");
}

#[tokio::test]
async fn pdf_submit_without_id_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let adapter = MathpixPdfAdapter::new(transport(&server));
    let err = adapter
        .submit(
            &SubmitPayload::PdfUrl("https://example.com/a.pdf".into()),
            &FormatOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MathOcrError::Api { .. }));
}

#[tokio::test]
async fn status_merges_job_and_converter_state() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/pdf/2025_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "percent_done": 100
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/converter/2025_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "conversion_status": {
                "docx": {"status": "completed"},
                "tex.zip": {"status": "error", "error_info": {"message": "tex failed"}}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = MathpixPdfAdapter::new(transport(&server));
    let formats: Vec<String> = ["mmd", "docx", "tex.zip"].map(String::from).to_vec();
    let status = adapter.check_status("2025_abc", &formats).await.unwrap();

    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.percent_done, Some(100.0));
    assert_eq!(status.per_format["mmd"], FormatState::Completed);
    assert_eq!(status.per_format["docx"], FormatState::Completed);
    assert_eq!(
        status.per_format["tex.zip"],
        FormatState::Error("tex failed".into())
    );
}

#[tokio::test]
async fn processing_job_skips_converter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/pdf/2025_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "split",
            "percent_done": 12.5
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/converter/2025_abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = MathpixPdfAdapter::new(transport(&server));
    let formats = vec!["mmd".to_string(), "docx".to_string()];
    let status = adapter.check_status("2025_abc", &formats).await.unwrap();
    assert_eq!(status.state, JobState::Split);
    assert!(status.per_format.values().all(|s| !s.is_terminal()));
}

#[tokio::test]
async fn malformed_job_id_never_hits_the_network() {
    let server = MockServer::start().await;
    let adapter = MathpixPdfAdapter::new(transport(&server));
    let err = adapter
        .check_status("../../etc/passwd", &["mmd".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, MathOcrError::Validation(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn download_returns_raw_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/pdf/2025_abc.mmd"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# Title\n\n$a^2+b^2$"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/pdf/2025_abc.docx"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not ready"})))
        .mount(&server)
        .await;

    let adapter = MathpixPdfAdapter::new(transport(&server));
    let bytes = adapter.download("2025_abc", "mmd").await.unwrap();
    assert_eq!(bytes, b"# Title\n\n$a^2+b^2$");
    assert_eq!(adapter.last_debug_data().unwrap().response["bytes"], bytes.len());

    let err = adapter.download("2025_abc", "docx").await.unwrap_err();
    assert!(matches!(err, MathOcrError::Api { status: 404, .. }));
}

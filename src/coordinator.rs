//! The capture-to-result coordinator.
//!
//! ## Why one owner?
//!
//! A run touches the mode controller (previews), the session store (clear,
//! resources, result), all three adapters and the debug reconciler. Keeping
//! them in one struct and taking `&mut self` in [`Coordinator::run`] makes
//! "one run at a time" a compile-time fact instead of a runtime flag, and
//! gives the session store a single, explicit owner.
//!
//! ## Run sequence
//!
//! ```text
//! clear ─▶ validate ─▶ auth ─▶ consent ─▶ submit ─▶ [poll ─▶ download] ─▶ normalize ─▶ cache/render
//!                                  │                     │
//!                             Declined              Cancelled
//! ```
//!
//! Everything up to consent is free of network I/O. Declined consent and a
//! cancelled poll loop are [`RunOutcome`]s, not errors. Errors after consent
//! reach the progress reporter's `complete` with the mode and elapsed time
//! before being returned. Nothing is retried automatically.

use crate::client::{
    AdapterKind, ApiTransport, ClientAdapter, FormatOptions, FormatState, ImageAdapter,
    MathpixPdfAdapter, PdfAdapter, StrokesAdapter,
};
use crate::collaborators::{
    AlwaysConsent, ConsentProvider, ConsentRequest, NoopRenderer, ResultRenderer,
};
use crate::config::CaptureConfig;
use crate::debug::{DebugReconciler, DebugRecord, DebugSource};
use crate::error::{FormatError, MathOcrError};
use crate::formats::TEXT_PDF_FORMATS;
use crate::mode::{Mode, ModeController, SubsystemFactory, UploadOnly};
use crate::normalize::normalize;
use crate::output::{ConversionReport, DownloadedFormat, RecognitionResult, RunOutcome, Timing};
use crate::pipeline::input::CaptureInput;
use crate::pipeline::options::{self, MergedOptions};
use crate::pipeline::poll::{poll_until_terminal, PollOutcome, PollSettings};
use crate::pipeline::validate::{validate, ValidatedInput};
use crate::progress::{
    notify, CompletionReport, CompletionStatus, NoopProgress, PipelineStep, SharedProgress,
    TimingInfo,
};
use crate::session::{Resettable, SessionStateStore};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`Coordinator`].
///
/// Every collaborator has a default: HTTP adapters built from the config,
/// [`UploadOnly`] subsystems, [`AlwaysConsent`], [`NoopProgress`] and
/// [`NoopRenderer`].
pub struct CoordinatorBuilder {
    config: CaptureConfig,
    factory: Option<Box<dyn SubsystemFactory>>,
    image: Option<Arc<dyn ClientAdapter>>,
    strokes: Option<Arc<dyn ClientAdapter>>,
    pdf: Option<Arc<dyn PdfAdapter>>,
    consent: Option<Arc<dyn ConsentProvider>>,
    progress: Option<SharedProgress>,
    renderer: Option<Arc<dyn ResultRenderer>>,
    preview_dir: Option<PathBuf>,
}

impl CoordinatorBuilder {
    pub fn subsystems(mut self, factory: Box<dyn SubsystemFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Replace the image OCR adapter (tests, alternative backends).
    pub fn image_adapter(mut self, adapter: Arc<dyn ClientAdapter>) -> Self {
        self.image = Some(adapter);
        self
    }

    pub fn strokes_adapter(mut self, adapter: Arc<dyn ClientAdapter>) -> Self {
        self.strokes = Some(adapter);
        self
    }

    pub fn pdf_adapter(mut self, adapter: Arc<dyn PdfAdapter>) -> Self {
        self.pdf = Some(adapter);
        self
    }

    pub fn consent(mut self, consent: Arc<dyn ConsentProvider>) -> Self {
        self.consent = Some(consent);
        self
    }

    pub fn progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn ResultRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Directory for input preview files. Defaults to the system temp dir.
    pub fn preview_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preview_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Coordinator, MathOcrError> {
        let needs_transport = self.image.is_none() || self.strokes.is_none() || self.pdf.is_none();
        let transport = if needs_transport {
            Some(ApiTransport::new(&self.config)?)
        } else {
            None
        };
        let http = |t: &Option<ApiTransport>| {
            t.clone()
                .ok_or_else(|| MathOcrError::Internal("HTTP transport missing".to_string()))
        };

        let image: Arc<dyn ClientAdapter> = match self.image {
            Some(a) => a,
            None => Arc::new(ImageAdapter::new(http(&transport)?)),
        };
        let strokes: Arc<dyn ClientAdapter> = match self.strokes {
            Some(a) => a,
            None => Arc::new(StrokesAdapter::new(http(&transport)?)),
        };
        let pdf: Arc<dyn PdfAdapter> = match self.pdf {
            Some(a) => a,
            None => Arc::new(MathpixPdfAdapter::new(http(&transport)?)),
        };

        let mut store = SessionStateStore::new();
        let mut reconciler = DebugReconciler::new();
        let resettables: [Arc<dyn Resettable>; 3] =
            [image.clone(), strokes.clone(), pdf.clone()];
        for r in resettables {
            store.register_resettable(r);
        }
        let sources: [Arc<dyn DebugSource>; 3] = [image.clone(), strokes.clone(), pdf.clone()];
        for s in sources {
            reconciler.register(s);
        }

        let mut controller =
            ModeController::new(self.factory.unwrap_or_else(|| Box::new(UploadOnly)));
        if let Some(dir) = self.preview_dir {
            controller = controller.with_preview_dir(dir);
        }

        Ok(Coordinator {
            config: self.config,
            controller,
            store,
            reconciler,
            image,
            strokes,
            pdf,
            consent: self.consent.unwrap_or_else(|| Arc::new(AlwaysConsent)),
            progress: self.progress.unwrap_or_else(|| Arc::new(NoopProgress)),
            renderer: self.renderer.unwrap_or_else(|| Arc::new(NoopRenderer)),
            cancel: CancellationToken::new(),
        })
    }
}

// ── Coordinator ──────────────────────────────────────────────────────────

/// Owns the mode controller, session store, adapters and collaborators.
pub struct Coordinator {
    config: CaptureConfig,
    controller: ModeController,
    store: SessionStateStore,
    reconciler: DebugReconciler,
    image: Arc<dyn ClientAdapter>,
    strokes: Arc<dyn ClientAdapter>,
    pdf: Arc<dyn PdfAdapter>,
    consent: Arc<dyn ConsentProvider>,
    progress: SharedProgress,
    renderer: Arc<dyn ResultRenderer>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("controller", &self.controller)
            .field("store", &self.store)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// What the PDF stage hands back to the run.
struct PdfCompletion {
    raw: Value,
    report: ConversionReport,
}

impl Coordinator {
    pub fn builder(config: CaptureConfig) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            factory: None,
            image: None,
            strokes: None,
            pdf: None,
            consent: None,
            progress: None,
            renderer: None,
            preview_dir: None,
        }
    }

    /// Coordinator with HTTP adapters and host subsystems from `factory`.
    pub fn new(
        config: CaptureConfig,
        factory: Box<dyn SubsystemFactory>,
    ) -> Result<Self, MathOcrError> {
        Self::builder(config).subsystems(factory).build()
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.controller.mode()
    }

    /// Move the controller to `target`. See [`ModeController::switch_mode`].
    pub fn switch_mode(&mut self, target: Mode) -> Result<(), MathOcrError> {
        self.controller.switch_mode(target)
    }

    /// Pull input from the active Draw/Camera subsystem.
    pub fn capture(&mut self) -> Result<CaptureInput, MathOcrError> {
        self.controller.capture()
    }

    pub fn controller_mut(&mut self) -> &mut ModeController {
        &mut self.controller
    }

    /// The record of the most recent HTTP exchange across all adapters.
    pub fn latest_debug(&self) -> Option<DebugRecord> {
        self.reconciler.most_recent()
    }

    /// Result of the last completed run, until the next run clears it.
    pub fn last_result(&self) -> Option<Arc<RecognitionResult>> {
        self.store.result()
    }

    pub fn session_store(&self) -> &SessionStateStore {
        &self.store
    }

    /// Token that cancels the next (or current) run's poll loop.
    ///
    /// Take it before calling [`run`](Self::run); once a run has observed a
    /// cancellation a fresh token is installed for the following run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Release resources and stop every capture subsystem.
    pub fn shutdown(&mut self) {
        self.store.clear();
        self.controller.shutdown();
    }

    /// Capture from the active subsystem and run it in the current mode.
    pub async fn run_capture(&mut self, overrides: FormatOptions) -> Result<RunOutcome, MathOcrError> {
        let input = self.controller.capture()?;
        let mode = self.controller.mode();
        self.run(mode, input, overrides).await
    }

    /// Run one capture-to-result pipeline.
    ///
    /// # Errors
    /// [`MathOcrError::Validation`] and [`MathOcrError::Auth`] before any
    /// network call; network, API, timeout and conversion errors after.
    pub async fn run(
        &mut self,
        mode: Mode,
        input: CaptureInput,
        overrides: FormatOptions,
    ) -> Result<RunOutcome, MathOcrError> {
        let started = Instant::now();
        info!("Starting {} run: {}", mode, input.display_name());

        // ── Step 1: Clear ────────────────────────────────────────────────
        self.store.clear();

        // ── Step 2: Validate + auth ──────────────────────────────────────
        notify(&*self.progress, |p| p.next_step(PipelineStep::Validating));
        let validated = validate(mode, &input, &overrides, &self.config)?;
        self.config.resolve_credentials()?;
        let kind = validated.kind;
        debug!("Input routed to the {} adapter", kind);

        // ── Step 3: Consent ──────────────────────────────────────────────
        notify(&*self.progress, |p| p.next_step(PipelineStep::AwaitingConsent));
        let request = ConsentRequest {
            name: input.display_name(),
            size: input.size(),
            mime: input.mime(),
        };
        if !self.consent.request_processing_consent(&request).await {
            info!("Consent declined for {}; nothing sent", request.name);
            self.finish(mode, Some(kind), started, CompletionStatus::Declined, None);
            return Ok(RunOutcome::Declined);
        }

        // ── Steps 4–7 ────────────────────────────────────────────────────
        let outcome = self.execute(mode, &input, validated, &overrides, started).await;

        if let Some(record) = self.reconciler.most_recent() {
            debug!(
                "Latest exchange: {} {} {}",
                record.source, record.operation, record.endpoint
            );
        }

        match &outcome {
            Ok(RunOutcome::Completed(result)) => {
                info!(
                    "Run complete: {} result in {}ms",
                    result.kind, result.timing.total_ms
                );
                self.finish(mode, Some(kind), started, CompletionStatus::Completed, None);
            }
            Ok(_) => {
                info!("Run cancelled after {}ms", started.elapsed().as_millis());
                self.finish(mode, Some(kind), started, CompletionStatus::Cancelled, None);
            }
            Err(e) => {
                warn!("{} run failed: {}", mode, e);
                self.finish(
                    mode,
                    Some(kind),
                    started,
                    CompletionStatus::Failed,
                    Some(e.to_string()),
                );
            }
        }

        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        outcome
    }

    async fn execute(
        &mut self,
        mode: Mode,
        input: &CaptureInput,
        validated: ValidatedInput,
        overrides: &FormatOptions,
        started: Instant,
    ) -> Result<RunOutcome, MathOcrError> {
        let kind = validated.kind;

        // ── Step 4: Submit ───────────────────────────────────────────────
        self.store.begin_session(mode, session_source(input));
        let mut preview: Option<PathBuf> = None;
        if let Some(handle) = self.controller.materialize_preview(input)? {
            preview = handle.location().map(Path::to_path_buf);
            self.store.register_resource(handle);
        }

        let merged = options::merge(kind, overrides, &self.config);
        let adapter: Arc<dyn ClientAdapter> = match kind {
            AdapterKind::Image => self.image.clone(),
            AdapterKind::Strokes => self.strokes.clone(),
            AdapterKind::Pdf => self.pdf.clone(),
        };

        notify(&*self.progress, |p| p.next_step(PipelineStep::Submitting));
        let submit_start = Instant::now();
        let response = adapter.submit(&validated.payload, &merged.wire).await?;
        let api_request_ms = submit_start.elapsed().as_millis() as u64;
        let processing_start = Instant::now();
        info!("{} submit answered HTTP {} in {}ms", kind, response.status, api_request_ms);
        let timing = TimingInfo {
            elapsed_ms: started.elapsed().as_millis() as u64,
            api_request_ms: Some(api_request_ms),
            percent_done: None,
        };
        notify(&*self.progress, |p| p.update_timing(&timing));

        // ── Step 5: Poll / await ─────────────────────────────────────────
        let (raw, conversion) = match kind {
            AdapterKind::Image | AdapterKind::Strokes => (response.body, None),
            AdapterKind::Pdf => {
                match self
                    .await_pdf(response.body, &merged, started, api_request_ms)
                    .await?
                {
                    Some(done) => (done.raw, Some(done.report)),
                    None => return Ok(RunOutcome::Cancelled),
                }
            }
        };

        // ── Step 6: Normalize ────────────────────────────────────────────
        notify(&*self.progress, |p| p.next_step(PipelineStep::Normalizing));
        let mut result = normalize(kind, &raw);
        result.conversion = conversion;
        result.timing = Timing {
            total_ms: started.elapsed().as_millis() as u64,
            api_request_ms,
            processing_ms: processing_start.elapsed().as_millis() as u64,
        };

        // ── Step 7: Cache & render ───────────────────────────────────────
        let result = Arc::new(result);
        self.store.set_result(result.clone());
        notify(&*self.progress, |p| p.next_step(PipelineStep::Rendering));
        self.renderer.render(&result, preview.as_deref());

        Ok(RunOutcome::Completed(result))
    }

    /// Poll a submitted PDF job, download what completed and assemble the
    /// raw response. `None` means the poll loop was cancelled.
    async fn await_pdf(
        &self,
        submit_body: Value,
        merged: &MergedOptions,
        started: Instant,
        api_request_ms: u64,
    ) -> Result<Option<PdfCompletion>, MathOcrError> {
        let job_id = submit_body
            .get("pdf_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MathOcrError::Internal("submit response lost its pdf_id".into()))?;
        let formats = &merged.requested_formats;

        let settings = PollSettings {
            interval: Duration::from_millis(self.config.poll_interval_ms),
            max_attempts: self.config.max_poll_attempts,
        };
        let progress = self.progress.clone();
        let polled = poll_until_terminal(
            &*self.pdf,
            &job_id,
            formats,
            settings,
            &self.cancel,
            |attempt, status| {
                notify(&*progress, |p| {
                    p.next_step(PipelineStep::Polling {
                        attempt,
                        max_attempts: settings.max_attempts,
                    })
                });
                let timing = TimingInfo {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    api_request_ms: Some(api_request_ms),
                    percent_done: status.percent_done,
                };
                notify(&*progress, |p| p.update_timing(&timing));
            },
        )
        .await?;

        let (status, attempts) = match polled {
            PollOutcome::Finished { status, attempts } => (status, attempts),
            PollOutcome::Cancelled { attempts } => {
                info!("Job {} cancelled after {} polls", job_id, attempts);
                return Ok(None);
            }
        };

        // ── Split terminal states ────────────────────────────────────────
        let mut ready = Vec::new();
        let mut failed = Vec::new();
        for format in formats {
            match status.per_format.get(format) {
                Some(FormatState::Completed) => ready.push(format.clone()),
                Some(FormatState::Error(detail)) => failed.push(FormatError::ConversionFailed {
                    format: format.clone(),
                    detail: detail.clone(),
                }),
                _ => failed.push(FormatError::ConversionFailed {
                    format: format.clone(),
                    detail: "no terminal state reported".to_string(),
                }),
            }
        }

        // ── Download completed formats ───────────────────────────────────
        notify(&*self.progress, |p| {
            p.next_step(PipelineStep::Downloading {
                formats: ready.len(),
            })
        });
        let pdf = self.pdf.clone();
        let concurrency = self.config.download_concurrency.max(1);
        let fetched: Vec<(String, Result<Vec<u8>, MathOcrError>)> = stream::iter(ready)
            .map(|format| {
                let pdf = pdf.clone();
                let job_id = job_id.clone();
                async move {
                    let bytes = pdf.download(&job_id, &format).await;
                    (format, bytes)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut downloads = Vec::new();
        for (format, bytes) in fetched {
            match bytes {
                Ok(bytes) => {
                    debug!("Downloaded {} ({} bytes)", format, bytes.len());
                    downloads.push(DownloadedFormat::new(format, bytes));
                }
                Err(e) => {
                    warn!("Download of {} failed: {}", format, e);
                    failed.push(FormatError::DownloadFailed {
                        format,
                        detail: e.to_string(),
                    });
                }
            }
        }
        // Requested order, not completion order.
        let position = |f: &str| formats.iter().position(|r| r == f).unwrap_or(usize::MAX);
        downloads.sort_by_key(|d| position(&d.format));
        failed.sort_by_key(|e| position(e.format()));

        if downloads.is_empty() {
            let first_error = failed
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no formats requested".to_string());
            return Err(MathOcrError::ConversionFailed {
                job_id,
                first_error,
            });
        }

        let mut raw = match submit_body {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        raw.insert("job_status".to_string(), status.raw.clone());
        for d in &downloads {
            if TEXT_PDF_FORMATS.contains(&d.format.as_str()) {
                if let Some(text) = d.as_text() {
                    raw.insert(d.format.clone(), Value::String(text.to_string()));
                }
            }
        }

        let report = ConversionReport {
            job_id,
            completed: downloads.iter().map(|d| d.format.clone()).collect(),
            failed,
            downloads,
            poll_attempts: attempts,
        };
        if report.is_partial() {
            warn!(
                "Job {}: {} format(s) failed, {} completed",
                report.job_id,
                report.failed.len(),
                report.completed.len()
            );
        }

        Ok(Some(PdfCompletion {
            raw: Value::Object(raw),
            report,
        }))
    }

    fn finish(
        &self,
        mode: Mode,
        kind: Option<AdapterKind>,
        started: Instant,
        status: CompletionStatus,
        error: Option<String>,
    ) {
        let report = CompletionReport {
            mode,
            kind,
            success: status == CompletionStatus::Completed,
            status,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error,
        };
        notify(&*self.progress, |p| p.complete(&report));
    }
}

/// Session source label: file name, URL, `canvas` or `camera`.
fn session_source(input: &CaptureInput) -> String {
    match input {
        CaptureInput::File(f) => f.name.clone(),
        CaptureInput::PdfUrl(url) => url.clone(),
        CaptureInput::Strokes(_) => "canvas".to_string(),
        CaptureInput::Frame(_) => "camera".to_string(),
    }
}

/// Write every downloaded format of `report` into `dir` as
/// `<stem>.<format>`.
///
/// Uses atomic writes (temp file + rename) so a crash never leaves a
/// half-written artefact behind.
pub async fn write_downloads(
    report: &ConversionReport,
    dir: impl AsRef<Path>,
    stem: &str,
) -> Result<Vec<PathBuf>, MathOcrError> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| MathOcrError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let mut written = Vec::with_capacity(report.downloads.len());
    for download in &report.downloads {
        let path = dir.join(format!("{stem}.{}", download.format));
        let tmp_path = dir.join(format!(".{stem}.{}.tmp", download.format));
        tokio::fs::write(&tmp_path, &download.bytes)
            .await
            .map_err(|e| MathOcrError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| MathOcrError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;
        written.push(path);
    }
    Ok(written)
}

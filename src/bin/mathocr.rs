//! CLI binary for edgequake-mathocr.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `CaptureConfig`, feeds files in as uploads, canvas strokes or camera
//! stills, and prints the normalised result.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use edgequake_mathocr::pipeline::input::{is_url, sniff_mime};
use edgequake_mathocr::{
    write_downloads, AlwaysConsent, CameraDevice, CaptureConfig, CaptureInput, CaptureSubsystem,
    CompletionReport, CompletionStatus, ConsentProvider, ConsentRequest, Coordinator, FileInput,
    FormatOptions, ImageFrame, Mode, PipelineStep, ProgressReporter, RecognitionResult,
    RunOutcome, StaticCredentials, StrokeCanvas, StrokeSet, SubsystemFactory, TimingInfo,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress reporter using indicatif ────────────────────────────────────

/// Terminal reporter: a spinner whose message follows the pipeline step and
/// whose prefix shows elapsed time and PDF progress.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("mathocr");
        bar.set_message("Starting…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ProgressReporter for CliProgress {
    fn next_step(&self, step: PipelineStep) {
        self.bar.set_message(step.to_string());
    }

    fn update_timing(&self, timing: &TimingInfo) {
        let prefix = match timing.percent_done {
            Some(pct) => format!("{:.1}s  {:>3.0}%", timing.elapsed_ms as f64 / 1000.0, pct),
            None => format!("{:.1}s", timing.elapsed_ms as f64 / 1000.0),
        };
        self.bar.set_prefix(prefix);
    }

    fn complete(&self, report: &CompletionReport) {
        self.bar.finish_and_clear();
        let secs = dim(&format!("{:.1}s", report.elapsed_ms as f64 / 1000.0));
        match report.status {
            CompletionStatus::Completed => {
                eprintln!("{} {} recognised  {}", green("✔"), report.mode, secs)
            }
            CompletionStatus::Declined => eprintln!("{} consent declined, nothing sent", cyan("◆")),
            CompletionStatus::Cancelled => eprintln!("{} cancelled  {}", cyan("⚠"), secs),
            CompletionStatus::Failed => eprintln!(
                "{} {} failed  {}",
                red("✘"),
                report.mode,
                secs
            ),
        }
    }
}

// ── Consent prompt ───────────────────────────────────────────────────────────

/// Asks on stderr and reads a y/N answer from stdin.
struct PromptConsent {
    bar: Option<ProgressBar>,
}

#[async_trait]
impl ConsentProvider for PromptConsent {
    async fn request_processing_consent(&self, request: &ConsentRequest) -> bool {
        let bar = self.bar.clone();
        let question = format!(
            "{} Send {} ({}, {} bytes) to the OCR service? [y/N] ",
            cyan("?"),
            bold(&request.name),
            request.mime,
            request.size
        );
        let ask = move || {
            eprint!("{question}");
            io::stderr().flush().ok();
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).ok();
            matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        };
        tokio::task::spawn_blocking(move || match bar {
            Some(bar) => bar.suspend(ask),
            None => ask(),
        })
        .await
        .unwrap_or(false)
    }
}

// ── File-backed capture subsystems ───────────────────────────────────────────

/// A "canvas" whose strokes were loaded from a JSON file.
struct LoadedCanvas {
    strokes: StrokeSet,
    live: bool,
}

impl CaptureSubsystem for LoadedCanvas {
    fn activate(&mut self) -> Result<(), edgequake_mathocr::mode::SubsystemError> {
        self.live = true;
        Ok(())
    }
    fn deactivate(&mut self) {
        self.live = false;
    }
    fn is_live(&self) -> bool {
        self.live
    }
}

impl StrokeCanvas for LoadedCanvas {
    fn strokes(&self) -> StrokeSet {
        self.strokes.clone()
    }
    fn clear(&mut self) {
        self.strokes = StrokeSet::default();
    }
}

/// A "camera" that always returns the same still image.
struct StillCamera {
    frame: ImageFrame,
    live: bool,
}

impl CaptureSubsystem for StillCamera {
    fn activate(&mut self) -> Result<(), edgequake_mathocr::mode::SubsystemError> {
        self.live = true;
        Ok(())
    }
    fn deactivate(&mut self) {
        self.live = false;
    }
    fn is_live(&self) -> bool {
        self.live
    }
}

impl CameraDevice for StillCamera {
    fn capture_frame(&mut self) -> Result<ImageFrame, edgequake_mathocr::mode::SubsystemError> {
        Ok(self.frame.clone())
    }
}

#[derive(Default)]
struct FileSubsystems {
    strokes: Option<StrokeSet>,
    frame: Option<ImageFrame>,
}

impl SubsystemFactory for FileSubsystems {
    fn create_canvas(
        &mut self,
    ) -> Result<Box<dyn StrokeCanvas>, edgequake_mathocr::mode::SubsystemError> {
        let strokes = self.strokes.take().ok_or("no strokes file was given")?;
        Ok(Box::new(LoadedCanvas {
            strokes,
            live: false,
        }))
    }

    fn create_camera(
        &mut self,
    ) -> Result<Box<dyn CameraDevice>, edgequake_mathocr::mode::SubsystemError> {
        let frame = self.frame.take().ok_or("no camera frame was given")?;
        Ok(Box::new(StillCamera { frame, live: false }))
    }
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Typed or photographed equation
  mathocr image equation.png

  # A still treated as a camera capture
  mathocr camera whiteboard.jpg

  # Handwriting recorded as strokes: {"strokes":[{"x":[...],"y":[...]}]}
  mathocr strokes strokes.json

  # PDF to Markdown plus a Word document, written to ./out
  mathocr --yes --out-dir out pdf paper.pdf --formats mmd,docx

  # Remote PDF, full JSON result
  mathocr --yes --json pdf https://arxiv.org/pdf/1706.03762

ENVIRONMENT VARIABLES:
  MATHPIX_APP_ID          API application id
  MATHPIX_APP_KEY         API application key
  MATHOCR_BASE_URL        Override the API root (default https://api.mathpix.com)
"#;

/// Recognise mathematics from images, handwriting strokes and PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "mathocr",
    version,
    about = "Recognise mathematics from images, handwriting strokes and PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Consent to sending the input without asking.
    #[arg(short, long, global = true, env = "MATHOCR_YES")]
    yes: bool,

    /// Print the full result as JSON instead of LaTeX / Markdown.
    #[arg(long, global = true, env = "MATHOCR_JSON")]
    json: bool,

    /// Print the most recent API request/response to stderr.
    #[arg(long, global = true, env = "MATHOCR_DEBUG")]
    debug: bool,

    /// Write downloaded PDF formats into this directory.
    #[arg(short, long, global = true, env = "MATHOCR_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// API root URL.
    #[arg(long, global = true, env = "MATHOCR_BASE_URL")]
    base_url: Option<String>,

    /// Application id (falls back to MATHPIX_APP_ID).
    #[arg(
        long,
        global = true,
        env = "MATHPIX_APP_ID",
        hide_env_values = true,
        requires = "app_key"
    )]
    app_id: Option<String>,

    /// Application key (falls back to MATHPIX_APP_KEY).
    #[arg(
        long,
        global = true,
        env = "MATHPIX_APP_KEY",
        hide_env_values = true,
        requires = "app_id"
    )]
    app_key: Option<String>,

    /// Milliseconds between PDF status checks.
    #[arg(long, global = true, env = "MATHOCR_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Status checks before a PDF conversion times out.
    #[arg(long, global = true, env = "MATHOCR_MAX_POLL_ATTEMPTS", default_value_t = 150)]
    max_poll_attempts: u32,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, global = true, env = "MATHOCR_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "MATHOCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MATHOCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result.
    #[arg(short, long, global = true, env = "MATHOCR_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload an image file (png, jpeg, gif, bmp, webp, tiff).
    Image { file: PathBuf },
    /// Submit an image as a camera capture.
    Camera { frame: PathBuf },
    /// Submit handwriting strokes from a JSON file.
    Strokes { file: PathBuf },
    /// Convert a local PDF or a PDF URL.
    Pdf {
        input: String,
        /// Comma-separated formats: mmd, md, docx, tex.zip, html, pdf, latex.pdf, pptx, md.zip, mmd.zip.
        #[arg(long, value_delimiter = ',')]
        formats: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the spinner is active; the
    // spinner provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli)?;

    // ── Resolve input ────────────────────────────────────────────────────
    let mut subsystems = FileSubsystems::default();
    let (mode, upload, overrides, stem) = match &cli.command {
        Command::Image { file } => {
            let input = FileInput::from_path(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            (Mode::Upload, Some(CaptureInput::File(input)), FormatOptions::new(), stem_of(file))
        }
        Command::Camera { frame } => {
            let bytes = tokio::fs::read(frame)
                .await
                .with_context(|| format!("Failed to read {}", frame.display()))?;
            let mime = sniff_mime(&bytes).unwrap_or("application/octet-stream").to_string();
            subsystems.frame = Some(ImageFrame { bytes, mime });
            (Mode::Camera, None, FormatOptions::new(), stem_of(frame))
        }
        Command::Strokes { file } => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let strokes: StrokeSet = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a strokes JSON file", file.display()))?;
            subsystems.strokes = Some(strokes);
            (Mode::Draw, None, FormatOptions::new(), stem_of(file))
        }
        Command::Pdf { input, formats } => {
            let mut overrides = FormatOptions::new();
            if !formats.is_empty() {
                overrides.insert("formats".into(), json!(formats));
            }
            let (capture, stem) = if is_url(input) {
                let stem = input
                    .rsplit('/')
                    .find(|s| !s.is_empty())
                    .map(|s| s.trim_end_matches(".pdf").to_string())
                    .unwrap_or_else(|| "document".to_string());
                (CaptureInput::PdfUrl(input.clone()), stem)
            } else {
                let path = Path::new(input);
                let file = FileInput::from_path(path)
                    .await
                    .with_context(|| format!("Failed to read {input}"))?;
                (CaptureInput::File(file), stem_of(path))
            };
            (Mode::Upload, Some(capture), overrides, stem)
        }
    };

    // ── Build coordinator ────────────────────────────────────────────────
    let progress = show_progress.then(CliProgress::new);
    let consent: Arc<dyn ConsentProvider> = if cli.yes {
        Arc::new(AlwaysConsent)
    } else {
        Arc::new(PromptConsent {
            bar: progress.as_ref().map(|p| p.bar.clone()),
        })
    };
    let mut builder = Coordinator::builder(config)
        .subsystems(Box::new(subsystems))
        .consent(consent);
    if let Some(p) = &progress {
        builder = builder.progress(p.clone());
    }
    let mut coordinator = builder.build().context("Invalid configuration")?;

    // Ctrl-C stops a PDF poll loop at its next cycle.
    let token = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let outcome = match upload {
        Some(input) => coordinator.run(mode, input, overrides).await,
        None => {
            coordinator
                .switch_mode(mode)
                .with_context(|| format!("Failed to enter {mode} mode"))?;
            coordinator.run_capture(overrides).await
        }
    };

    if cli.debug {
        match coordinator.latest_debug() {
            Some(record) => eprintln!("{}", record.to_pretty_json()),
            None => eprintln!("{}", dim("(no API exchange recorded)")),
        }
    }

    let outcome = outcome.context("Recognition failed")?;
    let code = match outcome {
        RunOutcome::Completed(result) => {
            print_result(&result, cli.json)?;
            if let (Some(dir), Some(report)) = (&cli.out_dir, &result.conversion) {
                let written = write_downloads(report, dir, &stem)
                    .await
                    .context("Failed to save converted formats")?;
                if !cli.quiet {
                    for path in written {
                        eprintln!("  {} {}", green("→"), bold(&path.display().to_string()));
                    }
                }
            }
            if let Some(report) = &result.conversion {
                if !cli.quiet {
                    for failure in &report.failed {
                        eprintln!("  {} {}", red("✗"), failure);
                    }
                }
            }
            ExitCode::SUCCESS
        }
        RunOutcome::Declined => ExitCode::from(2),
        RunOutcome::Cancelled => ExitCode::from(130),
    };

    coordinator.shutdown();
    Ok(code)
}

/// Map CLI args to `CaptureConfig`.
fn build_config(cli: &Cli) -> Result<CaptureConfig> {
    let mut builder = CaptureConfig::builder()
        .poll_interval_ms(cli.poll_interval_ms)
        .max_poll_attempts(cli.max_poll_attempts)
        .request_timeout_secs(cli.timeout);

    if let Some(url) = &cli.base_url {
        builder = builder.base_url(url.clone());
    }
    if let (Some(id), Some(key)) = (&cli.app_id, &cli.app_key) {
        builder = builder.credentials(Arc::new(StaticCredentials(
            edgequake_mathocr::Credentials::new(id.clone(), key.clone()),
        )));
    }

    builder.build().context("Invalid configuration")
}

/// Print the result to stdout: JSON, Markdown for PDFs, LaTeX otherwise.
fn print_result(result: &RecognitionResult, as_json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();

    if as_json {
        let mut value = serde_json::to_value(result).context("Failed to serialise result")?;
        if let Value::Object(map) = &mut value {
            // raw_response duplicates raw_json.
            map.remove("raw_json");
        }
        let json = serde_json::to_string_pretty(&value).context("Failed to serialise result")?;
        writeln!(handle, "{json}").context("Failed to write to stdout")?;
        return Ok(());
    }

    let text = if !result.markdown.is_empty() && result.latex.is_empty() {
        &result.markdown
    } else {
        &result.latex
    };
    handle
        .write_all(text.as_bytes())
        .context("Failed to write to stdout")?;
    if !text.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

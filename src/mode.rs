//! Input modes and the controller that keeps exactly one of them live.
//!
//! ## Why a controller instead of independent widgets?
//!
//! Draw and Camera each own something expensive (a canvas listener, a camera
//! stream). Letting both run wastes the device and makes "what will `capture`
//! return?" ambiguous. The [`ModeController`] is the one place transitions
//! happen, so it can stop the old subsystem before starting the new one and
//! roll back if the new one refuses to start.
//!
//! ```text
//!            switch_mode(Draw)             switch_mode(Camera)
//!   Upload ─────────────────────▶ Draw ─────────────────────▶ Camera
//!     ▲                            │ canvas.deactivate()        │ camera.deactivate()
//!     └────────────────────────────┴────────────────────────────┘
//! ```
//!
//! Subsystems are built through a [`SubsystemFactory`] the first time their
//! mode is entered and reused afterwards.

use crate::error::MathOcrError;
use crate::pipeline::input::{extension_for_mime, CaptureInput, ImageFrame, StrokeSet};
use crate::session::ResourceHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Error type capture subsystems report to the controller.
pub type SubsystemError = Box<dyn std::error::Error + Send + Sync>;

/// The three mutually exclusive input modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Files and URLs supplied by the caller.
    #[default]
    Upload,
    /// Strokes drawn on a canvas.
    Draw,
    /// Stills grabbed from a camera stream.
    Camera,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Upload, Mode::Draw, Mode::Camera];
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Upload => "upload",
            Mode::Draw => "draw",
            Mode::Camera => "camera",
        })
    }
}

// ── Subsystem contracts ──────────────────────────────────────────────────

/// Lifecycle shared by every capture subsystem.
pub trait CaptureSubsystem: Send {
    /// Start listening / streaming.
    fn activate(&mut self) -> Result<(), SubsystemError>;
    /// Stop listening / streaming. Must be safe to call when already inactive.
    fn deactivate(&mut self);
    fn is_live(&self) -> bool;
}

/// A drawing surface that accumulates strokes.
pub trait StrokeCanvas: CaptureSubsystem {
    fn strokes(&self) -> StrokeSet;
    fn clear(&mut self);
}

/// A camera able to grab a still frame from its stream.
pub trait CameraDevice: CaptureSubsystem {
    fn capture_frame(&mut self) -> Result<ImageFrame, SubsystemError>;
}

/// Builds subsystems on first use of their mode.
pub trait SubsystemFactory: Send {
    fn create_canvas(&mut self) -> Result<Box<dyn StrokeCanvas>, SubsystemError>;
    fn create_camera(&mut self) -> Result<Box<dyn CameraDevice>, SubsystemError>;
}

/// Factory for hosts with neither a canvas nor a camera: only Upload works.
#[derive(Debug, Default, Clone, Copy)]
pub struct UploadOnly;

impl SubsystemFactory for UploadOnly {
    fn create_canvas(&mut self) -> Result<Box<dyn StrokeCanvas>, SubsystemError> {
        Err("no drawing canvas is available on this host".into())
    }

    fn create_camera(&mut self) -> Result<Box<dyn CameraDevice>, SubsystemError> {
        Err("no camera is available on this host".into())
    }
}

// ── ModeController ───────────────────────────────────────────────────────

/// State machine over [`Mode`] owning the lazily built subsystems.
pub struct ModeController {
    mode: Mode,
    factory: Box<dyn SubsystemFactory>,
    canvas: Option<Box<dyn StrokeCanvas>>,
    camera: Option<Box<dyn CameraDevice>>,
    preview_dir: Option<PathBuf>,
}

impl fmt::Debug for ModeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeController")
            .field("mode", &self.mode)
            .field("canvas_built", &self.canvas.is_some())
            .field("camera_built", &self.camera.is_some())
            .field("preview_dir", &self.preview_dir)
            .finish()
    }
}

impl ModeController {
    /// Start in [`Mode::Upload`] with nothing built.
    pub fn new(factory: Box<dyn SubsystemFactory>) -> Self {
        Self {
            mode: Mode::Upload,
            factory,
            canvas: None,
            camera: None,
            preview_dir: None,
        }
    }

    /// Write preview files under `dir` instead of the system temp dir.
    pub fn with_preview_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preview_dir = Some(dir.into());
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of live subsystems. Never more than one.
    pub fn live_subsystems(&self) -> usize {
        self.canvas.as_ref().is_some_and(|c| c.is_live()) as usize
            + self.camera.as_ref().is_some_and(|c| c.is_live()) as usize
    }

    /// Move to `target`, stopping the current subsystem first.
    ///
    /// Switching to the current mode is a no-op. If the target subsystem
    /// cannot be built or activated the previous mode is restored and
    /// [`MathOcrError::SubsystemInit`] is returned.
    pub fn switch_mode(&mut self, target: Mode) -> Result<(), MathOcrError> {
        if target == self.mode {
            return Ok(());
        }
        let prior = self.mode;
        debug!("Switching mode {} -> {}", prior, target);

        self.deactivate(prior);
        if let Err(e) = self.activate(target) {
            warn!("Could not enter {} mode, staying in {}: {}", target, prior, e);
            self.deactivate(target);
            if let Err(e) = self.activate(prior) {
                warn!("Could not re-activate {} mode: {}", prior, e);
            }
            return Err(MathOcrError::SubsystemInit {
                mode: target,
                detail: e.to_string(),
            });
        }

        self.mode = target;
        info!("Mode is now {}", target);
        Ok(())
    }

    /// Pull the current mode's input. Upload input comes from the caller.
    pub fn capture(&mut self) -> Result<CaptureInput, MathOcrError> {
        let mode = self.mode;
        let capture_err = |detail: String| MathOcrError::Capture { mode, detail };
        match mode {
            Mode::Upload => Err(capture_err(
                "upload mode has no capture device; pass the file to run()".to_string(),
            )),
            Mode::Draw => {
                let canvas = self
                    .canvas
                    .as_ref()
                    .ok_or_else(|| capture_err("canvas not initialised".to_string()))?;
                Ok(CaptureInput::Strokes(canvas.strokes()))
            }
            Mode::Camera => {
                let camera = self
                    .camera
                    .as_mut()
                    .ok_or_else(|| capture_err("camera not initialised".to_string()))?;
                camera
                    .capture_frame()
                    .map(CaptureInput::Frame)
                    .map_err(|e| capture_err(e.to_string()))
            }
        }
    }

    /// Clear the canvas, if one was built.
    pub fn clear_canvas(&mut self) {
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.clear();
        }
    }

    /// Write a side-by-side preview of `input` to a temp file.
    ///
    /// Returns `None` for inputs without a raster preview (strokes, PDFs).
    /// Releasing the handle deletes the file.
    pub fn materialize_preview(
        &self,
        input: &CaptureInput,
    ) -> Result<Option<ResourceHandle>, MathOcrError> {
        let Some((bytes, mime)) = input.preview_bytes() else {
            return Ok(None);
        };

        let dir = self.preview_dir.clone().unwrap_or_else(std::env::temp_dir);
        let suffix = format!(".{}", extension_for_mime(mime));
        let mut file = tempfile::Builder::new()
            .prefix("mathocr-preview-")
            .suffix(&suffix)
            .tempfile_in(&dir)
            .map_err(|source| MathOcrError::OutputWriteFailed {
                path: dir.clone(),
                source,
            })?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|source| MathOcrError::OutputWriteFailed {
                path: file.path().to_path_buf(),
                source,
            })?;

        let temp_path = file.into_temp_path();
        let location = temp_path.to_path_buf();
        debug!("Preview written to {}", location.display());

        let slot = Mutex::new(Some(temp_path));
        let handle = ResourceHandle::new(format!("preview:{}", input.display_name()), move || {
            let taken = slot.lock().ok().and_then(|mut guard| guard.take());
            if let Some(path) = taken {
                if let Err(e) = path.close() {
                    warn!("Could not remove preview file: {}", e);
                }
            }
        })
        .with_location(location);
        Ok(Some(handle))
    }

    /// Deactivate every subsystem and return to Upload.
    pub fn shutdown(&mut self) {
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.deactivate();
        }
        if let Some(camera) = self.camera.as_mut() {
            camera.deactivate();
        }
        self.mode = Mode::Upload;
    }

    fn deactivate(&mut self, mode: Mode) {
        match mode {
            Mode::Upload => {}
            Mode::Draw => {
                if let Some(canvas) = self.canvas.as_mut() {
                    canvas.deactivate();
                }
            }
            Mode::Camera => {
                if let Some(camera) = self.camera.as_mut() {
                    camera.deactivate();
                }
            }
        }
    }

    fn activate(&mut self, mode: Mode) -> Result<(), SubsystemError> {
        match mode {
            Mode::Upload => Ok(()),
            Mode::Draw => {
                if self.canvas.is_none() {
                    self.canvas = Some(self.factory.create_canvas()?);
                }
                match self.canvas.as_mut() {
                    Some(canvas) => canvas.activate(),
                    None => Err("canvas missing after construction".into()),
                }
            }
            Mode::Camera => {
                if self.camera.is_none() {
                    self.camera = Some(self.factory.create_camera()?);
                }
                match self.camera.as_mut() {
                    Some(camera) => camera.activate(),
                    None => Err("camera missing after construction".into()),
                }
            }
        }
    }
}

impl Drop for ModeController {
    fn drop(&mut self) {
        self.shutdown();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::pipeline::input::{fixtures, FileInput};
    use std::sync::atomic::Ordering;

    fn live_matches_mode(ctl: &ModeController, probe: &Probe) {
        let canvas = probe.canvas_live.load(Ordering::SeqCst);
        let camera = probe.camera_live.load(Ordering::SeqCst);
        assert!(!(canvas && camera), "two subsystems live at once");
        assert_eq!(canvas, ctl.mode() == Mode::Draw);
        assert_eq!(camera, ctl.mode() == Mode::Camera);
    }

    #[test]
    fn mutual_exclusivity_over_every_switch_sequence() {
        // All 3^4 sequences of four switches.
        for n in 0..81u32 {
            let (mut ctl, probe) = controller();
            let mut code = n;
            for _ in 0..4 {
                let target = Mode::ALL[(code % 3) as usize];
                code /= 3;
                ctl.switch_mode(target).unwrap();
                assert_eq!(ctl.mode(), target);
                live_matches_mode(&ctl, &probe);
                assert!(ctl.live_subsystems() <= 1);
            }
        }
    }

    #[test]
    fn subsystems_are_built_once() {
        let (mut ctl, probe) = controller();
        assert_eq!(probe.canvases_built.load(Ordering::SeqCst), 0);
        for _ in 0..3 {
            ctl.switch_mode(Mode::Draw).unwrap();
            ctl.switch_mode(Mode::Camera).unwrap();
            ctl.switch_mode(Mode::Upload).unwrap();
        }
        assert_eq!(probe.canvases_built.load(Ordering::SeqCst), 1);
        assert_eq!(probe.cameras_built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_activation_rolls_back_to_prior_mode() {
        let (mut ctl, probe) = controller();
        ctl.switch_mode(Mode::Draw).unwrap();
        probe.fail_camera_activate.store(true, Ordering::SeqCst);

        let err = ctl.switch_mode(Mode::Camera).unwrap_err();
        assert!(matches!(err, MathOcrError::SubsystemInit { mode: Mode::Camera, .. }));
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(ctl.mode(), Mode::Draw);
        live_matches_mode(&ctl, &probe);
    }

    #[test]
    fn failed_construction_keeps_upload() {
        let (mut ctl, probe) = controller();
        probe.fail_canvas_build.store(true, Ordering::SeqCst);
        assert!(ctl.switch_mode(Mode::Draw).is_err());
        assert_eq!(ctl.mode(), Mode::Upload);
        assert_eq!(ctl.live_subsystems(), 0);

        probe.fail_canvas_build.store(false, Ordering::SeqCst);
        ctl.switch_mode(Mode::Draw).unwrap();
        assert_eq!(ctl.mode(), Mode::Draw);
    }

    #[test]
    fn upload_only_factory_refuses_other_modes() {
        let mut ctl = ModeController::new(Box::new(UploadOnly));
        assert!(ctl.switch_mode(Mode::Camera).is_err());
        assert!(ctl.switch_mode(Mode::Draw).is_err());
        assert_eq!(ctl.mode(), Mode::Upload);
    }

    #[test]
    fn capture_follows_mode() {
        let (mut ctl, _probe) = controller();
        assert!(matches!(ctl.capture(), Err(MathOcrError::Capture { .. })));
        ctl.switch_mode(Mode::Draw).unwrap();
        assert!(matches!(ctl.capture().unwrap(), CaptureInput::Strokes(_)));
        ctl.switch_mode(Mode::Camera).unwrap();
        assert!(matches!(ctl.capture().unwrap(), CaptureInput::Frame(_)));
    }

    #[test]
    fn shutdown_stops_everything() {
        let (mut ctl, probe) = controller();
        ctl.switch_mode(Mode::Camera).unwrap();
        ctl.shutdown();
        assert_eq!(ctl.mode(), Mode::Upload);
        assert!(!probe.camera_live.load(Ordering::SeqCst));
    }

    #[test]
    fn preview_file_removed_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let (ctl, _probe) = controller();
        let ctl = ctl.with_preview_dir(dir.path());
        let input = CaptureInput::File(FileInput::new("eq.png", fixtures::png_bytes()));

        let handle = ctl.materialize_preview(&input).unwrap().unwrap();
        let path = handle.location().unwrap().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "png");

        let clone = handle.clone();
        assert!(handle.release());
        assert!(!clone.release());
        assert!(!path.exists());
    }

    #[test]
    fn strokes_and_pdfs_have_no_preview() {
        let (ctl, _probe) = controller();
        let pdf = CaptureInput::File(FileInput::new("doc.pdf", fixtures::pdf_bytes()));
        assert!(ctl.materialize_preview(&pdf).unwrap().is_none());
        let strokes = CaptureInput::Strokes(StrokeSet::default());
        assert!(ctl.materialize_preview(&strokes).unwrap().is_none());
    }

    #[test]
    fn mode_display_is_lowercase() {
        assert_eq!(Mode::Camera.to_string(), "camera");
        assert_eq!(serde_json::to_value(Mode::Draw).unwrap(), "draw");
    }
}

//! Configuration types for the capture coordinator.
//!
//! All coordinator behaviour is controlled through [`CaptureConfig`], built
//! via its [`CaptureConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config between the CLI and embedding applications and
//! to log exactly what a run was configured with.
//!
//! Credentials are never stored in the config itself: the config holds a
//! [`CredentialSource`] that is read at submit time, so the coordinator only
//! ever reads them and an external store stays the owner.

use crate::error::MathOcrError;
use crate::formats::{is_known_pdf_format, ALWAYS_INCLUDE_FORMATS, DEFAULT_PDF_FORMATS};
use std::fmt;
use std::sync::Arc;

/// Environment variable holding the application id.
pub const APP_ID_ENV: &str = "MATHPIX_APP_ID";
/// Environment variable holding the application key.
pub const APP_KEY_ENV: &str = "MATHPIX_APP_KEY";

/// The two header values every API request carries.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: String,
    pub app_key: String,
}

impl Credentials {
    pub fn new(app_id: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_key: app_key.into(),
        }
    }

    /// Both fields present after trimming.
    pub fn is_complete(&self) -> bool {
        !self.app_id.trim().is_empty() && !self.app_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("app_key", &"<redacted>")
            .finish()
    }
}

/// Read-only access to an external credential store.
pub trait CredentialSource: Send + Sync {
    /// Current credentials, or `None` when the store has none.
    fn credentials(&self) -> Option<Credentials>;
}

/// Reads [`APP_ID_ENV`] / [`APP_KEY_ENV`] on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn credentials(&self) -> Option<Credentials> {
        let app_id = std::env::var(APP_ID_ENV).ok()?;
        let app_key = std::env::var(APP_KEY_ENV).ok()?;
        Some(Credentials { app_id, app_key })
    }
}

/// Fixed credentials supplied by the embedding application.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialSource for StaticCredentials {
    fn credentials(&self) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

/// Configuration for a [`crate::coordinator::Coordinator`].
///
/// Built via [`CaptureConfig::builder()`] or using
/// [`CaptureConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_mathocr::CaptureConfig;
///
/// let config = CaptureConfig::builder()
///     .poll_interval_ms(500)
///     .max_poll_attempts(20)
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_timeout_ms(), 10_000);
/// ```
#[derive(Clone)]
pub struct CaptureConfig {
    /// API root, without trailing slash. Default: `https://api.mathpix.com`.
    pub base_url: String,

    /// Where `app_id` / `app_key` come from. Default: [`EnvCredentials`].
    pub credentials: Arc<dyn CredentialSource>,

    /// Per-HTTP-request timeout in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Delay between PDF status polls in milliseconds. Default: 2000.
    pub poll_interval_ms: u64,

    /// Maximum number of PDF status polls. Default: 150.
    ///
    /// Together with `poll_interval_ms` this bounds how long a run waits for
    /// a conversion: 150 × 2 s = 5 minutes.
    pub max_poll_attempts: u32,

    /// Concurrent downloads of completed PDF formats. Default: 4.
    pub download_concurrency: usize,

    /// Largest accepted image upload in bytes. Default: 10 MiB.
    pub max_image_bytes: u64,

    /// Largest accepted PDF upload in bytes. Default: 512 MiB.
    pub max_pdf_bytes: u64,

    /// Formats added to every image/strokes request whatever the caller
    /// selected. Default: `["html", "data"]`.
    pub always_include_formats: Vec<String>,

    /// PDF formats requested when the caller names none. Default: `["mmd"]`.
    pub default_pdf_formats: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mathpix.com".to_string(),
            credentials: Arc::new(EnvCredentials),
            request_timeout_secs: 60,
            poll_interval_ms: 2000,
            max_poll_attempts: 150,
            download_concurrency: 4,
            max_image_bytes: 10 * 1024 * 1024,
            max_pdf_bytes: 512 * 1024 * 1024,
            always_include_formats: ALWAYS_INCLUDE_FORMATS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_pdf_formats: DEFAULT_PDF_FORMATS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("base_url", &self.base_url)
            .field("credentials", &"<dyn CredentialSource>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_poll_attempts", &self.max_poll_attempts)
            .field("download_concurrency", &self.download_concurrency)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("max_pdf_bytes", &self.max_pdf_bytes)
            .field("always_include_formats", &self.always_include_formats)
            .field("default_pdf_formats", &self.default_pdf_formats)
            .finish()
    }
}

impl CaptureConfig {
    /// Create a new builder for `CaptureConfig`.
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder {
            config: Self::default(),
        }
    }

    /// Upper bound on time spent polling one PDF job.
    pub fn poll_timeout_ms(&self) -> u64 {
        self.poll_interval_ms
            .saturating_mul(u64::from(self.max_poll_attempts))
    }

    /// Credentials from the configured source, validated.
    pub fn resolve_credentials(&self) -> Result<Credentials, MathOcrError> {
        match self.credentials.credentials() {
            Some(c) if c.is_complete() => Ok(c),
            Some(_) => Err(MathOcrError::Auth {
                detail: "app_id or app_key is empty".into(),
            }),
            None => Err(MathOcrError::Auth {
                detail: "no credentials configured".into(),
            }),
        }
    }
}

/// Builder for [`CaptureConfig`].
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl fmt::Debug for CaptureConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CaptureConfigBuilder")
            .field(&self.config)
            .finish()
    }
}

impl CaptureConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn credentials(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.config.credentials = source;
        self
    }

    /// Shorthand for [`StaticCredentials`].
    pub fn app_credentials(self, app_id: impl Into<String>, app_key: impl Into<String>) -> Self {
        self.credentials(Arc::new(StaticCredentials(Credentials::new(app_id, app_key))))
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.max_poll_attempts = n;
        self
    }

    pub fn download_concurrency(mut self, n: usize) -> Self {
        self.config.download_concurrency = n.max(1);
        self
    }

    pub fn max_image_bytes(mut self, n: u64) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn max_pdf_bytes(mut self, n: u64) -> Self {
        self.config.max_pdf_bytes = n;
        self
    }

    pub fn always_include_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.always_include_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_pdf_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.default_pdf_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CaptureConfig, MathOcrError> {
        let c = &self.config;
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(MathOcrError::InvalidConfig(format!(
                "base URL must be http(s), got '{}'",
                c.base_url
            )));
        }
        if c.poll_interval_ms == 0 {
            return Err(MathOcrError::InvalidConfig(
                "Poll interval must be ≥ 1ms".into(),
            ));
        }
        if c.max_poll_attempts == 0 {
            return Err(MathOcrError::InvalidConfig(
                "Max poll attempts must be ≥ 1".into(),
            ));
        }
        if c.request_timeout_secs == 0 {
            return Err(MathOcrError::InvalidConfig(
                "Request timeout must be ≥ 1s".into(),
            ));
        }
        if c.default_pdf_formats.is_empty() {
            return Err(MathOcrError::InvalidConfig(
                "At least one default PDF format is required".into(),
            ));
        }
        if let Some(unknown) = c
            .default_pdf_formats
            .iter()
            .find(|f| !is_known_pdf_format(f))
        {
            return Err(MathOcrError::InvalidConfig(format!(
                "Unknown default PDF format '{unknown}'"
            )));
        }
        Ok(self.config)
    }
}

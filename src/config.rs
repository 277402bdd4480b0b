//! Configuration types for book-borrow

use crate::acquisition::AcquisitionPath;
use crate::error::{Error, Result};
use crate::mime::{self, MimeType};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Where book data and temporary downloads live
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the per-account book databases (default: "./books")
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Directory for in-flight downloads (default: "./books-tmp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            temp_dir: default_temp_dir(),
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for small-document HTTP fetches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Bounded waits for DRM engines
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DrmConfig {
    /// Maximum time an Adobe fulfillment may take (default: 5 minutes)
    #[serde(default = "default_drm_timeout", with = "duration_serde")]
    pub adobe_timeout: Duration,

    /// Maximum time an AxisNow fulfillment may take (default: 5 minutes)
    #[serde(default = "default_drm_timeout", with = "duration_serde")]
    pub axis_timeout: Duration,
}

impl Default for DrmConfig {
    fn default() -> Self {
        Self {
            adobe_timeout: default_drm_timeout(),
            axis_timeout: default_drm_timeout(),
        }
    }
}

/// Which formats and DRM schemes this runtime can handle
///
/// EPUB is always supported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSupport {
    /// Accept PDF content (default: true)
    #[serde(default = "default_true")]
    pub pdf: bool,

    /// Accept audio books (default: true)
    #[serde(default = "default_true")]
    pub audiobooks: bool,

    /// Adobe ACS DRM is available (default: false)
    #[serde(default)]
    pub adobe_drm: bool,

    /// AxisNow DRM is available (default: false)
    #[serde(default)]
    pub axis_drm: bool,
}

impl Default for FormatSupport {
    fn default() -> Self {
        Self {
            pdf: true,
            audiobooks: true,
            adobe_drm: false,
            axis_drm: false,
        }
    }
}

impl FormatSupport {
    /// True if a path element of this type can be traversed or stored
    pub fn supports_type(&self, mime_type: &MimeType) -> bool {
        if mime_type.is(mime::EPUB)
            || mime_type.is_opds_entry()
            || mime_type.is(mime::BEARER_TOKEN)
        {
            true
        } else if mime_type.is(mime::PDF) {
            self.pdf
        } else if mime_type.is_audiobook_manifest() {
            self.audiobooks
        } else if mime_type.is(mime::ACSM) {
            self.adobe_drm
        } else if mime_type.is(mime::AXIS_NOW) {
            self.axis_drm
        } else {
            false
        }
    }

    /// True if every element of the path is supported
    pub fn supports_path(&self, path: &AcquisitionPath) -> bool {
        path.elements()
            .iter()
            .all(|element| self.supports_type(&element.mime_type))
    }
}

/// Progress reporting settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum time between two throughput recomputations (default: 1000 ms)
    #[serde(default = "default_progress_window", with = "millis_serde")]
    pub window: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            window: default_progress_window(),
        }
    }
}

/// Main configuration for book-borrow
///
/// Fields are organized into sub-configs:
/// - [`storage`](StorageConfig): book database root and temp directory
/// - [`http`](HttpConfig): timeouts and user agent
/// - [`retry`](RetryConfig): backoff for small-document fetches
/// - [`drm`](DrmConfig): bounded waits for DRM engines
/// - [`formats`](FormatSupport): format-support policy
/// - [`progress`](ProgressConfig): progress throttling
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry behavior for document fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// DRM engine timeouts
    #[serde(default)]
    pub drm: DrmConfig,

    /// Format-support policy
    #[serde(default)]
    pub formats: FormatSupport,

    /// Progress reporting
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Config {
    /// Check settings that would make borrowing misbehave
    pub fn validate(&self) -> Result<()> {
        if self.http.request_timeout.is_zero() {
            return Err(Error::Config {
                message: "request timeout must be greater than zero".into(),
                key: Some("http.request_timeout".into()),
            });
        }
        if self.drm.adobe_timeout.is_zero() || self.drm.axis_timeout.is_zero() {
            return Err(Error::Config {
                message: "DRM timeouts must be greater than zero".into(),
                key: Some("drm".into()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff multiplier must be at least 1.0".into(),
                key: Some("retry.backoff_multiplier".into()),
            });
        }
        if self.storage.root == self.storage.temp_dir {
            return Err(Error::Config {
                message: "temp directory must differ from the storage root".into(),
                key: Some("storage.temp_dir".into()),
            });
        }
        Ok(())
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./books")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./books-tmp")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_user_agent() -> String {
    format!("book-borrow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_drm_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_progress_window() -> Duration {
    Duration::from_millis(1000)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

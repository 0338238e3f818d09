//! Configuration types for course-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Download behavior configuration (directories, concurrency, limits)
///
/// Groups settings related to how artifacts are fetched and stored.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent downloads (default: 2)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Maximum executor invocations per lesson before it is left failed
    /// (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-request timeout in seconds for a single transfer (default: 300)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum redirect hops the resource executor will follow (default: 5)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            max_redirects: default_max_redirects(),
        }
    }
}

/// Data storage and ledger flushing configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding one ledger document per course (default: "./state")
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Automatically persist the ledger after this many mutations
    /// (default: 25)
    ///
    /// Explicit flush points at the coordinator's state-machine boundaries
    /// still apply; this bounds how much progress a crash between them can
    /// lose.
    #[serde(default = "default_flush_every")]
    pub flush_every: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            flush_every: default_flush_every(),
        }
    }
}

/// External media tool configuration
///
/// The library never hard-codes a specific tool's flags; invocation is
/// described by an argument template with `{url}` and `{output}`
/// placeholders. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to the media-fetch executable (auto-detected if None)
    #[serde(default)]
    pub tool_path: Option<PathBuf>,

    /// Executable name to search for on PATH when `tool_path` is not set
    #[serde(default)]
    pub tool_name: Option<String>,

    /// Whether to search PATH for the tool if no explicit path is set
    /// (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Argument template for one invocation; `{url}` and `{output}` are
    /// substituted per transfer
    #[serde(default)]
    pub args_template: Vec<String>,

    /// Cookie file handed to the tool, if any
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,

    /// Referer header value handed to the tool, if any
    #[serde(default)]
    pub referer: Option<String>,

    /// Whether to ask the tool for subtitle sidecars (default: false)
    #[serde(default)]
    pub subtitles: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            tool_path: None,
            tool_name: None,
            search_path: true,
            args_template: Vec::new(),
            cookies_file: None,
            referer: None,
            subtitles: false,
        }
    }
}

/// Main configuration for course-dl
///
/// All fields have sensible defaults; `Config::default()` works out of the
/// box for a direct-HTTP-only setup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Ledger storage and flushing
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// External media tool settings
    #[serde(flatten)]
    pub media: MediaConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Ledger state directory
    pub fn state_dir(&self) -> &PathBuf {
        &self.persistence.state_dir
    }

    /// Validate settings that would otherwise fail at an awkward time
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] naming the offending key.
    pub fn validate(&self) -> crate::Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(crate::Error::Config {
                message: "max_concurrent_downloads must be at least 1".to_string(),
                key: Some("max_concurrent_downloads".to_string()),
            });
        }
        if self.download.max_attempts == 0 {
            return Err(crate::Error::Config {
                message: "max_attempts must be at least 1".to_string(),
                key: Some("max_attempts".to_string()),
            });
        }
        if self.download.request_timeout_secs == 0 {
            return Err(crate::Error::Config {
                message: "request_timeout_secs must be at least 1".to_string(),
                key: Some("request_timeout_secs".to_string()),
            });
        }
        Ok(())
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_max_redirects() -> usize {
    5
}

fn default_flush_every() -> u32 {
    25
}

fn default_true() -> bool {
    true
}

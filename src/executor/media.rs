//! Media executor — provider-hosted video via an external fetch tool
//!
//! The library never hard-codes a specific tool's command-line syntax. The
//! [`MediaFetcher`] trait is the boundary: the shipped [`CliMediaFetcher`]
//! spawns a configured binary with a caller-supplied argument template,
//! while embedders with richer needs (progress parsing, provider quirks)
//! supply their own implementation. [`DisabledMediaFetcher`] provides
//! graceful degradation when no tool is available: media items fail with a
//! clear reason instead of the whole run aborting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{DownloadExecutor, ProgressFn, TransferOutcome, TransferRequest};
use crate::config::MediaConfig;
use crate::error::TransferError;

/// Options forwarded to the media backend with every fetch
#[derive(Clone, Debug, Default)]
pub struct MediaOptions {
    /// Cookie file for authenticated providers
    pub cookies_file: Option<PathBuf>,
    /// Referer header value some providers require
    pub referer: Option<String>,
    /// Whether subtitle sidecars should be fetched alongside the video
    pub subtitles: bool,
}

impl MediaOptions {
    /// Build options from the media config section
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            cookies_file: config.cookies_file.clone(),
            referer: config.referer.clone(),
            subtitles: config.subtitles,
        }
    }
}

/// Backend capable of fetching one provider-hosted video
///
/// Implementations report success by returning the path of the produced
/// artifact; every failure mode surfaces as a [`TransferError`].
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch `url` into an artifact named after `dest_stem`
    async fn fetch(
        &self,
        url: &str,
        dest_stem: &Path,
        options: &MediaOptions,
        progress: ProgressFn,
    ) -> Result<PathBuf, TransferError>;

    /// Short implementation name for logging
    fn name(&self) -> &'static str;
}

/// CLI-backed media fetcher
///
/// Invokes an external binary with an argument template in which `{url}`
/// and `{output}` are substituted per transfer. Optional placeholders
/// `{cookies}` and `{referer}` are substituted when configured; template
/// entries referencing an unset placeholder are dropped, and entries
/// containing `{subtitles}` are included (marker stripped) only when
/// subtitle fetching is enabled.
pub struct CliMediaFetcher {
    binary_path: PathBuf,
    args_template: Vec<String>,
    timeout: Duration,
}

impl CliMediaFetcher {
    /// Create a fetcher with an explicit binary path
    pub fn new(binary_path: PathBuf, args_template: Vec<String>, timeout: Duration) -> Self {
        Self {
            binary_path,
            args_template,
            timeout,
        }
    }

    /// Attempt to find the named binary in PATH
    ///
    /// Returns `None` if the binary is not found.
    pub fn from_path(tool_name: &str, args_template: Vec<String>, timeout: Duration) -> Option<Self> {
        which::which(tool_name)
            .ok()
            .map(|path| Self::new(path, args_template, timeout))
    }

    fn build_args(&self, url: &str, dest_stem: &Path, options: &MediaOptions) -> Vec<String> {
        let output = dest_stem.to_string_lossy().into_owned();
        let cookies = options
            .cookies_file
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let mut args = Vec::with_capacity(self.args_template.len());
        for entry in &self.args_template {
            let mut arg = entry.clone();
            if arg.contains("{subtitles}") {
                if !options.subtitles {
                    continue;
                }
                arg = arg.replace("{subtitles}", "");
                if arg.is_empty() {
                    continue;
                }
            }
            if arg.contains("{cookies}") {
                match cookies {
                    Some(ref c) => arg = arg.replace("{cookies}", c),
                    None => continue,
                }
            }
            if arg.contains("{referer}") {
                match options.referer {
                    Some(ref r) => arg = arg.replace("{referer}", r),
                    None => continue,
                }
            }
            arg = arg.replace("{url}", url);
            arg = arg.replace("{output}", &output);
            args.push(arg);
        }
        args
    }
}

#[async_trait]
impl MediaFetcher for CliMediaFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_stem: &Path,
        options: &MediaOptions,
        _progress: ProgressFn,
    ) -> Result<PathBuf, TransferError> {
        if let Some(parent) = dest_stem.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = self.build_args(url, dest_stem, options);
        tracing::debug!(
            tool = %self.binary_path.display(),
            "Invoking media backend"
        );

        let child = Command::new(&self.binary_path)
            .args(&args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransferError::Backend(format!(
                    "failed to spawn {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(TransferError::Backend(format!("tool I/O failed: {}", e))),
            Err(_) => {
                return Err(TransferError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().next_back().unwrap_or("").chars().take(200).collect();
            return Err(TransferError::Backend(format!(
                "tool exited with {}: {}",
                output.status, tail
            )));
        }

        find_artifact(dest_stem).await?.ok_or_else(|| {
            TransferError::Backend("tool reported success but produced no output".to_string())
        })
    }

    fn name(&self) -> &'static str {
        "cli-media"
    }
}

/// Stub fetcher used when no media tool is configured or discoverable
///
/// Media items fail with a clear per-item reason; resource downloads in the
/// same run proceed normally.
pub struct DisabledMediaFetcher;

#[async_trait]
impl MediaFetcher for DisabledMediaFetcher {
    async fn fetch(
        &self,
        _url: &str,
        _dest_stem: &Path,
        _options: &MediaOptions,
        _progress: ProgressFn,
    ) -> Result<PathBuf, TransferError> {
        Err(TransferError::Backend(
            "no media tool configured".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "disabled-media"
    }
}

/// Locate the artifact a tool produced for the given stem
///
/// Tools decide the container extension themselves, so the artifact is
/// whichever `<stem>.<ext>` file exists — the largest one when subtitle
/// sidecars landed next to it. `.part` leftovers are never counted.
async fn find_artifact(dest_stem: &Path) -> Result<Option<PathBuf>, TransferError> {
    let parent = match dest_stem.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Some(stem_name) = dest_stem.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(None);
    };

    let mut best: Option<(u64, PathBuf)> = None;
    let mut entries = tokio::fs::read_dir(&parent).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(stem_name.as_str()) || name.ends_with(".part") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let size = metadata.len();
        if best.as_ref().is_none_or(|(s, _)| size > *s) {
            best = Some((size, entry.path()));
        }
    }
    Ok(best.map(|(_, path)| path))
}

/// Media-kind download executor delegating to a [`MediaFetcher`]
pub struct MediaExecutor {
    fetcher: std::sync::Arc<dyn MediaFetcher>,
    options: MediaOptions,
}

impl MediaExecutor {
    /// Wrap a fetcher with the per-run media options
    pub fn new(fetcher: std::sync::Arc<dyn MediaFetcher>, options: MediaOptions) -> Self {
        Self { fetcher, options }
    }

    /// Build the executor described by the media config section
    ///
    /// Resolution order mirrors tool discovery elsewhere: explicit path,
    /// then PATH search (when enabled), then the disabled stub.
    pub fn from_config(config: &MediaConfig, timeout: Duration) -> Self {
        let fetcher: std::sync::Arc<dyn MediaFetcher> = if let Some(ref path) = config.tool_path {
            std::sync::Arc::new(CliMediaFetcher::new(
                path.clone(),
                config.args_template.clone(),
                timeout,
            ))
        } else if config.search_path
            && let Some(ref name) = config.tool_name
            && let Some(fetcher) =
                CliMediaFetcher::from_path(name, config.args_template.clone(), timeout)
        {
            std::sync::Arc::new(fetcher)
        } else {
            std::sync::Arc::new(DisabledMediaFetcher)
        };

        tracing::info!(media_fetcher = fetcher.name(), "Media backend initialized");
        Self::new(fetcher, MediaOptions::from_config(config))
    }
}

#[async_trait]
impl DownloadExecutor for MediaExecutor {
    async fn execute(
        &self,
        request: &TransferRequest,
        progress: ProgressFn,
    ) -> Result<TransferOutcome, TransferError> {
        let final_path = self
            .fetcher
            .fetch(&request.url, &request.dest_stem, &self.options, progress)
            .await?;
        Ok(TransferOutcome { final_path })
    }

    fn name(&self) -> &'static str {
        "media"
    }
}

//! Direct-HTTP resource executor
//!
//! Fetches plain attachments (PDFs, archives, images) with a streaming GET.
//! Redirects are followed manually so the hop count stays bounded and the
//! final URL is available for filename inference. The artifact is staged as
//! `<name>.part` and renamed only on success, so an interrupted transfer is
//! never mistaken for a completed download.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::{DownloadExecutor, ProgressFn, TransferOutcome, TransferRequest};
use crate::error::TransferError;
use crate::types::ProgressUpdate;

/// Streaming HTTP GET executor for generic resources
pub struct HttpExecutor {
    client: reqwest::Client,
    timeout: Duration,
    max_redirects: usize,
    referer: Option<String>,
}

impl HttpExecutor {
    /// Create an executor with the given limits
    ///
    /// `referer`, when set, is sent with every request; some sources refuse
    /// attachment fetches without it.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        timeout_secs: u64,
        max_redirects: usize,
        referer: Option<String>,
    ) -> crate::Result<Self> {
        // Redirects are followed manually so the hop bound and the final URL
        // stay under our control.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
            max_redirects,
            referer,
        })
    }

    /// Follow redirects up to the hop bound and return the first
    /// non-redirect response together with the URL it came from
    async fn fetch_following_redirects(
        &self,
        url: &str,
    ) -> Result<(reqwest::Response, Url), TransferError> {
        let mut current =
            Url::parse(url).map_err(|e| TransferError::Backend(format!("invalid URL: {}", e)))?;

        for _hop in 0..=self.max_redirects {
            let mut request = self.client.get(current.clone());
            if let Some(ref referer) = self.referer {
                request = request.header(header::REFERER, referer.clone());
            }
            let response = request.send().await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(TransferError::HttpStatus {
                        status: status.as_u16(),
                    })?;
                current = current
                    .join(location)
                    .map_err(|e| TransferError::Backend(format!("bad redirect target: {}", e)))?;
                continue;
            }

            return match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    Err(TransferError::AuthRequired {
                        status: status.as_u16(),
                    })
                }
                StatusCode::NOT_FOUND => Err(TransferError::NotFound),
                s if !s.is_success() => Err(TransferError::HttpStatus {
                    status: s.as_u16(),
                }),
                _ => Ok((response, current)),
            };
        }

        Err(TransferError::TooManyRedirects {
            limit: self.max_redirects,
        })
    }

    /// Fetch and stream the body to a staged `.part` file, then rename
    async fn transfer(
        &self,
        request: &TransferRequest,
        progress: &ProgressFn,
    ) -> Result<PathBuf, TransferError> {
        let (response, final_url) = self.fetch_following_redirects(&request.url).await?;

        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let extension = resolve_extension(
            disposition.as_deref(),
            &final_url,
            content_type.as_deref(),
        );
        let final_path = path_with_extension(&request.dest_stem, extension.as_deref());
        // Staged under the extension-less stem so the timeout handler can
        // locate it without knowing what extension was resolved.
        let part_path = partial_path(&request.dest_stem);

        if let Some(parent) = final_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let total_bytes = response.content_length();
        let mut downloaded: u64 = 0;
        let mut file = tokio::fs::File::create(&part_path).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    remove_partial(&part_path).await;
                    return Err(TransferError::Network(e));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                remove_partial(&part_path).await;
                return Err(TransferError::Io(e));
            }
            downloaded += chunk.len() as u64;
            if let Some(total) = total_bytes
                && total > 0
            {
                progress(ProgressUpdate {
                    lesson_id: request.lesson_id.clone(),
                    percent: (downloaded as f64 / total as f64) * 100.0,
                });
            }
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part_path, &final_path).await?;

        tracing::debug!(
            lesson_id = %request.lesson_id,
            path = %final_path.display(),
            bytes = downloaded,
            "Resource downloaded"
        );
        Ok(final_path)
    }
}

#[async_trait]
impl DownloadExecutor for HttpExecutor {
    async fn execute(
        &self,
        request: &TransferRequest,
        progress: ProgressFn,
    ) -> Result<TransferOutcome, TransferError> {
        match tokio::time::timeout(self.timeout, self.transfer(request, &progress)).await {
            Ok(Ok(final_path)) => Ok(TransferOutcome { final_path }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // The in-flight transfer future is dropped here, aborting the
                // request; sweep any staged partial it left behind.
                remove_partial(&partial_path(&request.dest_stem)).await;
                Err(TransferError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

async fn remove_partial(part_path: &Path) {
    if let Err(e) = tokio::fs::remove_file(part_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %part_path.display(), error = %e, "Failed to remove partial file");
    }
}

/// Append an extension to the destination stem without clobbering dots
/// already in the name
fn path_with_extension(stem: &Path, extension: Option<&str>) -> PathBuf {
    match extension {
        Some(ext) if !ext.is_empty() => {
            let mut os = stem.as_os_str().to_owned();
            os.push(format!(".{}", ext));
            PathBuf::from(os)
        }
        _ => stem.to_path_buf(),
    }
}

/// Staging name for an in-flight transfer
fn partial_path(final_path: &Path) -> PathBuf {
    let mut os = final_path.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

/// Resolve the output extension by priority: Content-Disposition filename,
/// then the final URL's path segment, then a MIME table, then none
fn resolve_extension(
    disposition: Option<&str>,
    final_url: &Url,
    content_type: Option<&str>,
) -> Option<String> {
    if let Some(filename) = disposition.and_then(filename_from_content_disposition)
        && let Some(ext) = extension_of(&filename)
    {
        return Some(ext);
    }
    if let Some(ext) = final_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(extension_of)
    {
        return Some(ext);
    }
    content_type
        .and_then(extension_for_mime)
        .map(str::to_owned)
}

/// Extract the filename parameter from a Content-Disposition header value
fn filename_from_content_disposition(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        // RFC 5987 extended form takes precedence when both are present, but
        // either yields a usable extension; take the first match.
        if let Some(rest) = part
            .strip_prefix("filename*=")
            .and_then(|r| r.rsplit("''").next())
        {
            let name = rest.trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
        if let Some(rest) = part.strip_prefix("filename=") {
            let name = rest.trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Extension of a filename-ish string, if it has one
fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    // A query-string remnant or an absurdly long "extension" is noise
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Minimal MIME-type-to-extension table for course artifacts
fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/pdf" => Some("pdf"),
        "application/zip" => Some("zip"),
        "application/json" => Some("json"),
        "application/epub+zip" => Some("epub"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "audio/mpeg" => Some("mp3"),
        "audio/mp4" => Some("m4a"),
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/svg+xml" => Some("svg"),
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "text/markdown" => Some("md"),
        "text/vtt" => Some("vtt"),
        "text/csv" => Some("csv"),
        _ => None,
    }
}

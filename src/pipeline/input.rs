//! Input resolution: turn a user-supplied path or URL into document bytes.
//!
//! The loader works on bytes, not paths, so both local files and downloads
//! end up as a [`ResolvedInput`] held in memory. The size limit is checked
//! before reading a local file and while streaming a download, so an
//! oversized input is rejected without buffering all of it.

use crate::error::OcrError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Document bytes plus whatever naming hints came with them.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    pub bytes: Bytes,
    pub filename: Option<String>,
    /// Declared content type (HTTP `Content-Type`); `None` for local files.
    pub content_type: Option<String>,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL to document bytes no larger than `max_bytes`.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
    max_bytes: usize,
) -> Result<ResolvedInput, OcrError> {
    if is_url(input) {
        download_url(input, timeout_secs, max_bytes).await
    } else if input.trim().is_empty() {
        Err(OcrError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        read_local(input, max_bytes).await
    }
}

async fn read_local(path_str: &str, max_bytes: usize) -> Result<ResolvedInput, OcrError> {
    let path = PathBuf::from(path_str);

    let meta = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrError::PermissionDenied { path });
        }
        Err(_) => return Err(OcrError::FileNotFound { path }),
    };
    if !meta.is_file() {
        return Err(OcrError::InvalidInput {
            input: path_str.to_string(),
        });
    }
    if meta.len() > max_bytes as u64 {
        return Err(OcrError::InputTooLarge {
            size: usize::try_from(meta.len()).unwrap_or(usize::MAX),
            limit: max_bytes,
        });
    }

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(OcrError::PermissionDenied { path });
        }
        Err(_) => return Err(OcrError::FileNotFound { path }),
    };

    debug!("Read local input: {} ({} bytes)", path.display(), bytes.len());
    Ok(ResolvedInput {
        bytes: Bytes::from(bytes),
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        content_type: None,
    })
}

async fn download_url(
    url: &str,
    timeout_secs: u64,
    max_bytes: usize,
) -> Result<ResolvedInput, OcrError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| OcrError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            OcrError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(map_send_err)?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes as u64 {
            return Err(OcrError::InputTooLarge {
                size: usize::try_from(len).unwrap_or(usize::MAX),
                limit: max_bytes,
            });
        }
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let filename = extract_filename(url);

    let mut buf = BytesMut::new();
    let mut body = std::pin::pin!(response.bytes_stream());
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(map_send_err)?;
        if buf.len() + chunk.len() > max_bytes {
            return Err(OcrError::InputTooLarge {
                size: buf.len() + chunk.len(),
                limit: max_bytes,
            });
        }
        buf.extend_from_slice(&chunk);
    }

    info!("Downloaded {} bytes", buf.len());

    Ok(ResolvedInput {
        bytes: buf.freeze(),
        filename,
        content_type,
    })
}

/// Last path segment of the URL, if it looks like a file name.
fn extract_filename(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if !last.is_empty() && last.contains('.') {
        Some(last.to_string())
    } else {
        None
    }
}

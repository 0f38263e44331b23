//! Error types for the ocr-pipeline library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrError`] — **Fatal**: the job cannot start at all (unreadable
//!   input, unsupported format, corrupt PDF, bad configuration). Returned as
//!   `Err(OcrError)` from the top-level `extract*` functions before any page
//!   work is scheduled.
//!
//! * [`PageError`] — **Page-scoped**: a single page failed (render error,
//!   engine crash, timeout, cancellation) while its siblings carry on. Stored
//!   on the page and reported in [`crate::output::PageResult`]; never
//!   propagated past the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ocr-pipeline library.
#[derive(Debug, Error)]
pub enum OcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// Input exceeds the configured size limit.
    #[error("Input is {size} bytes, larger than the {limit}-byte limit")]
    InputTooLarge { size: usize, limit: usize },

    // ── Document errors ───────────────────────────────────────────────────
    /// The bytes are neither a recognised image nor a PDF container.
    #[error("Unsupported document format{}: first bytes {magic:02x?}", .declared.as_deref().map(|d| format!(" (declared '{d}')")).unwrap_or_default())]
    UnsupportedFormat {
        declared: Option<String>,
        magic: Vec<u8>,
    },

    /// The document was recognised but its page count cannot be determined.
    #[error("Document is corrupt: {detail}")]
    CorruptDocument { detail: String },

    /// The page selection matched none of the document's pages.
    #[error("Page selection matches no pages (document has {total} pages)")]
    EmptySelection { total: usize },

    // ── Outcome errors ────────────────────────────────────────────────────
    /// Every page failed; returned by
    /// [`crate::output::DocumentResult::into_result`] only.
    #[error("All {total} pages failed.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Some pages succeeded but at least one failed.
    ///
    /// Returned by [`crate::output::DocumentResult::into_result`] when
    /// the caller wants to treat any page failure as an error.
    #[error("{failed}/{total} pages failed during extraction")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output text file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pipeline stage a page-scoped timeout occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Render,
    Recognize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Render => f.write_str("render"),
            Stage::Recognize => f.write_str("recognize"),
        }
    }
}

/// A page-scoped failure.
///
/// Stored on the failed page. Other pages are never affected. `page` is the
/// 1-indexed page number as shown to users.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PageError {
    /// Rasterisation of the page failed.
    #[error("Page {page}: rendering failed: {cause}")]
    RenderFailure { page: usize, cause: String },

    /// The recognition engine returned an error.
    #[error("Page {page}: recognition failed: {cause}")]
    RecognitionFailure { page: usize, cause: String },

    /// The page's render+recognize budget ran out.
    #[error("Page {page}: {stage} timed out after {millis}ms")]
    Timeout {
        page: usize,
        stage: Stage,
        millis: u64,
    },

    /// The job deadline expired before this page finished.
    #[error("Page {page}: job deadline expired")]
    JobTimeout { page: usize },

    /// The job was cancelled before this page finished.
    #[error("Page {page}: cancelled")]
    Cancelled { page: usize },

    /// None of the requested languages is installed.
    #[error("Page {page}: none of the languages {requested:?} is installed (available: {available:?})")]
    UnsupportedLanguage {
        page: usize,
        requested: Vec<String>,
        available: Vec<String>,
    },
}

/// Stable, data-free failure code for mapping page failures to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RenderFailure,
    RecognitionFailure,
    Timeout,
    JobTimeout,
    Cancelled,
    UnsupportedLanguage,
}

impl PageError {
    /// The failure code without its payload.
    pub fn kind(&self) -> FailureKind {
        match self {
            PageError::RenderFailure { .. } => FailureKind::RenderFailure,
            PageError::RecognitionFailure { .. } => FailureKind::RecognitionFailure,
            PageError::Timeout { .. } => FailureKind::Timeout,
            PageError::JobTimeout { .. } => FailureKind::JobTimeout,
            PageError::Cancelled { .. } => FailureKind::Cancelled,
            PageError::UnsupportedLanguage { .. } => FailureKind::UnsupportedLanguage,
        }
    }

    /// 1-indexed page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailure { page, .. }
            | PageError::RecognitionFailure { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::JobTimeout { page }
            | PageError::Cancelled { page }
            | PageError::UnsupportedLanguage { page, .. } => *page,
        }
    }
}

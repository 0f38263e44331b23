//! High-level extraction API.
//!
//! [`OcrPipeline`] bundles the configuration, the two engines and an
//! optional process-wide [`PagePermits`] pool. Build one at startup and call
//! [`OcrPipeline::process`] per document; it is cheap to clone.
//!
//! The free functions ([`extract`], [`extract_from_bytes`],
//! [`extract_to_file`], [`extract_sync`], [`inspect`]) build a pipeline with
//! the system engines for one-off use. Use [`crate::stream::extract_stream`]
//! to receive pages as they finish.

use crate::config::OcrConfig;
use crate::document::{Document, DocumentInfo};
use crate::error::OcrError;
use crate::output::{DocumentResult, JobStats};
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::recognize::{Recognizer, TesseractRecognizer};
use crate::pipeline::render::{Rasterizer, SystemRasterizer};
use crate::pipeline::{assemble, input, load};
use crate::pool::PagePermits;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A configured OCR pipeline.
#[derive(Clone)]
pub struct OcrPipeline {
    orchestrator: Orchestrator,
}

impl OcrPipeline {
    /// Pipeline over the given engines.
    pub fn new(
        config: OcrConfig,
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn Recognizer>,
        permits: Option<PagePermits>,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(config, rasterizer, recognizer, permits),
        }
    }

    /// Pipeline over `pdftoppm` and `tesseract` as configured.
    pub fn from_config(config: OcrConfig) -> Self {
        Self::from_config_with_permits(config, None)
    }

    /// Like [`from_config`](Self::from_config), sharing `permits` with other
    /// pipelines.
    pub fn from_config_with_permits(config: OcrConfig, permits: Option<PagePermits>) -> Self {
        let rasterizer = Arc::new(SystemRasterizer::new(config.pdftoppm_binary.clone()));
        let recognizer = Arc::new(TesseractRecognizer::new(config.tesseract.clone()));
        Self::new(config, rasterizer, recognizer, permits)
    }

    pub fn config(&self) -> &OcrConfig {
        self.orchestrator.config()
    }

    pub(crate) fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Validate `bytes` and build a pending [`Document`].
    pub async fn load(
        &self,
        bytes: Bytes,
        filename: Option<String>,
        content_type: Option<&str>,
    ) -> Result<Document, OcrError> {
        let config = self.config();
        load::load(
            bytes,
            filename,
            content_type,
            &config.pages,
            config.max_input_bytes,
        )
        .await
    }

    /// Load and process one document.
    ///
    /// Returns `Err` only when the document cannot be loaded. Page failures,
    /// the job deadline and cancellation all end in `Ok` with the failed
    /// pages marked; check [`DocumentResult::status`] or call
    /// [`DocumentResult::into_result`].
    pub async fn process(
        &self,
        bytes: Bytes,
        filename: Option<String>,
        content_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DocumentResult, OcrError> {
        let mut doc = self.load(bytes, filename, content_type).await?;
        let stats = self.orchestrator.run(&mut doc, cancel).await;
        Ok(assemble::assemble(&doc, stats, &self.config().page_separator))
    }

    /// Resolve a path or URL, then [`process`](Self::process) it.
    pub async fn process_input(
        &self,
        input_str: &str,
        cancel: &CancellationToken,
    ) -> Result<DocumentResult, OcrError> {
        let config = self.config();
        let resolved =
            input::resolve_input(input_str, config.download_timeout_secs, config.max_input_bytes)
                .await?;
        self.process(
            resolved.bytes,
            resolved.filename,
            resolved.content_type.as_deref(),
            cancel,
        )
        .await
    }
}

/// Extract text from an image or PDF at a path or URL.
///
/// # Example
/// ```rust,no_run
/// use ocr_pipeline::{extract, OcrConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = OcrConfig::builder().languages(["por", "eng"]).build()?;
///     let result = extract("scan.pdf", &config).await?;
///     println!("{}", result.text);
///     eprintln!("{} / {} pages", result.stats.done_pages, result.stats.total_pages);
///     Ok(())
/// }
/// ```
///
/// # Errors
/// Only fatal errors: unreadable input, unsupported or corrupt document,
/// empty page selection. An all-failed document is returned as `Ok` with
/// status `Failed`.
pub async fn extract(input_str: impl AsRef<str>, config: &OcrConfig) -> Result<DocumentResult, OcrError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    OcrPipeline::from_config(config.clone())
        .process_input(input_str, &CancellationToken::new())
        .await
}

/// Extract text from document bytes already in memory.
pub async fn extract_from_bytes(
    bytes: impl Into<Bytes>,
    content_type: Option<&str>,
    config: &OcrConfig,
) -> Result<DocumentResult, OcrError> {
    OcrPipeline::from_config(config.clone())
        .process(bytes.into(), None, content_type, &CancellationToken::new())
        .await
}

/// Extract and write the joined text to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &OcrConfig,
) -> Result<JobStats, OcrError> {
    let result = extract(input_str, config).await?;
    write_text_atomic(output_path.as_ref(), &result.text).await?;
    Ok(result.stats)
}

/// Write `text` (plus a trailing newline) to `path` via temp file + rename.
pub async fn write_text_atomic(path: &Path, text: &str) -> Result<(), OcrError> {
    let write_err = |e: std::io::Error| OcrError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut body = text.to_string();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    let tmp_path = path.with_extension("txt.tmp");
    tokio::fs::write(&tmp_path, body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(input_str: impl AsRef<str>, config: &OcrConfig) -> Result<DocumentResult, OcrError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| OcrError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Describe a document (kind, page count, PDF Info fields, image size)
/// without rendering anything.
///
/// Does not require pdftoppm or tesseract.
pub async fn inspect(input_str: impl AsRef<str>, config: &OcrConfig) -> Result<DocumentInfo, OcrError> {
    let resolved = input::resolve_input(
        input_str.as_ref(),
        config.download_timeout_secs,
        config.max_input_bytes,
    )
    .await?;
    load::inspect_bytes(
        resolved.bytes,
        resolved.content_type.as_deref(),
        config.max_input_bytes,
    )
    .await
}

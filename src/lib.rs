//! # ocr-pipeline
//!
//! Extract text from scanned PDFs and images with tesseract.
//!
//! ## Why this crate?
//!
//! Scanned documents carry no text layer, so `pdftotext` returns nothing.
//! This crate rasterises each page, runs OCR on every page concurrently and
//! returns the text with per-page confidence and diagnostics. One slow or
//! broken page never sinks the document: it is marked Failed and its
//! siblings carry on.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input      read a local file or download from URL
//!  ├─ 2. Load       sniff magic bytes, count pages (lopdf), images → PNG
//!  ├─ 3. Render     one pdftoppm child per page (images pass through)
//!  ├─ 4. Recognise  tesseract TSV → text + mean word confidence
//!  ├─ 5. Clean      deterministic whitespace / invisible-char cleanup
//!  └─ 6. Assemble   page-ordered result + aggregate status + stats
//! ```
//!
//! [`DocumentResult::chunks`] cuts the assembled text into overlapping
//! chunks (1700 characters, 80 overlap by default) ready for indexing.
//!
//! Steps 3–5 run per page on K workers with a per-page timeout, an
//! optional job deadline and cooperative cancellation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_pipeline::{extract, OcrConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OcrConfig::builder().languages(["por"]).concurrency(4).build()?;
//!     let result = extract("scan.pdf", &config).await?;
//!     println!("{}", result.text);
//!     eprintln!("status: {}, {}/{} pages",
//!         result.status,
//!         result.stats.done_pages,
//!         result.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Services
//!
//! Build one [`OcrPipeline`] per process, optionally with a shared
//! [`PagePermits`] bound, and call [`OcrPipeline::process`] with a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) tied to the
//! client connection.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ocr-pipeline = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Tool | Package | Used for |
//! |------|---------|----------|
//! | `pdftoppm`  | poppler-utils | PDF page rendering |
//! | `tesseract` | tesseract-ocr + language packs | recognition |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod chunk;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use chunk::{Chunker, TextChunk};
pub use config::{OcrConfig, OcrConfigBuilder, PageSelection, PageSeparator, TesseractOptions};
pub use document::{Document, DocumentInfo, DocumentStatus, Page, PageState, PageStatus, RasterInfo};
pub use error::{FailureKind, OcrError, PageError, Stage};
pub use extract::{extract, extract_from_bytes, extract_sync, extract_to_file, inspect, OcrPipeline};
pub use output::{DocumentResult, JobStats, PageResult};
pub use pipeline::recognize::{Recognition, Recognizer, TesseractRecognizer};
pub use pipeline::render::{RasterImage, Rasterizer, SystemRasterizer};
pub use pool::PagePermits;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{extract_stream, PageStream};

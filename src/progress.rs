//! Progress-callback trait for per-page job events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::OcrConfigBuilder::progress_callback`] to receive events
//! as the orchestrator moves pages through the pipeline.
//!
//! Callbacks are invoked from the job driver, which is the single writer of
//! page state, so events for one job never overlap. Separate jobs running
//! concurrently may still call a shared callback from different threads.
//!
//! # Example
//!
//! ```rust
//! use ocr_pipeline::{JobProgressCallback, OcrConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize, confidence: f32) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} done ({} chars, {:.0}%)", page_num, total_pages, text_len, confidence * 100.0);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = OcrConfig::builder()
//!     .progress_callback(counter as Arc<dyn JobProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::document::DocumentStatus;
use std::sync::Arc;

/// Called by the orchestrator as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Page numbers are 1-indexed source page numbers.
pub trait JobProgressCallback: Send + Sync {
    /// Called once before any page work is scheduled.
    fn on_job_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a worker starts rendering a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page reaches Done.
    ///
    /// `confidence` is already normalised to `[0, 1]`.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, text_len: usize, confidence: f32) {
        let _ = (page_num, total_pages, text_len, confidence);
    }

    /// Called when a page reaches Failed, including pages failed by a
    /// job timeout or cancellation.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page is terminal.
    fn on_job_complete(&self, total_pages: usize, success_count: usize, status: DocumentStatus) {
        let _ = (total_pages, success_count, status);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::OcrConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

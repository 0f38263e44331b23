//! Output types returned to callers.
//!
//! [`DocumentResult`] is the structured outcome of one job: aggregate
//! status, joined text of the recognised pages, one [`PageResult`] per
//! page in page-index order, and [`JobStats`]. All types serialise with
//! serde so a transport can return them as JSON unchanged.

use crate::document::{DocumentInfo, DocumentStatus, PageState, RasterInfo};
use crate::error::{FailureKind, OcrError, PageError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// Position in the job, 0-based and contiguous.
    pub index: usize,
    /// 1-indexed source page number.
    pub page_num: usize,
    /// 0-based page number inside the source document.
    pub source_page: usize,
    pub status: PageState,
    /// Recognised text; `None` unless Done.
    pub text: Option<String>,
    /// Mean word confidence in `[0, 1]`; `None` unless Done.
    pub confidence: Option<f32>,
    /// Stable failure code; `None` unless Failed.
    pub reason: Option<FailureKind>,
    pub error: Option<PageError>,
    pub raster: Option<RasterInfo>,
    pub render_ms: Option<u64>,
    pub recognize_ms: Option<u64>,
}

impl PageResult {
    pub fn is_done(&self) -> bool {
        self.status == PageState::Done
    }
}

/// Timings and counters for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_pages: usize,
    pub done_pages: usize,
    pub failed_pages: usize,
    /// Highest number of pages observed in Rendering/Recognizing at once.
    pub peak_in_flight: usize,
    /// Wall-clock time from job start to the last page turning terminal.
    pub total_duration_ms: u64,
    /// Sum of per-page render times.
    pub render_duration_ms: u64,
    /// Sum of per-page recognition times.
    pub recognize_duration_ms: u64,
}

/// Structured outcome of one document job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub id: Uuid,
    pub filename: Option<String>,
    pub content_type: String,
    pub status: DocumentStatus,
    /// Text of the Done pages in page order, joined by the configured
    /// separator.
    pub text: String,
    pub pages: Vec<PageResult>,
    pub info: DocumentInfo,
    pub stats: JobStats,
}

impl DocumentResult {
    /// The first failed page's error, in page order.
    pub fn first_error(&self) -> Option<&PageError> {
        self.pages.iter().find_map(|p| p.error.as_ref())
    }

    /// Treat any page failure as an error.
    ///
    /// Failed maps to [`OcrError::AllPagesFailed`], PartiallyFailed to
    /// [`OcrError::PartialFailure`]; every other status passes through.
    pub fn into_result(self) -> Result<Self, OcrError> {
        match self.status {
            DocumentStatus::Failed => Err(OcrError::AllPagesFailed {
                total: self.stats.total_pages,
                first_error: self
                    .first_error()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
            DocumentStatus::PartiallyFailed => Err(OcrError::PartialFailure {
                success: self.stats.done_pages,
                failed: self.stats.failed_pages,
                total: self.stats.total_pages,
            }),
            _ => Ok(self),
        }
    }
}

//! In-memory document model: the loaded source, its pages and their state.
//!
//! A [`Document`] is created by the loader with every [`Page`] in
//! [`PageStatus::Pending`] and is driven to completion by the orchestrator.
//! Page state only ever moves forward; the transition methods on [`Page`]
//! reject anything else. The document status is never stored: it is a fold
//! over the page statuses ([`DocumentStatus::from_pages`]).

use crate::error::PageError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;

// ── Source ───────────────────────────────────────────────────────────────

/// What the loader recognised the input bytes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Image(image::ImageFormat),
}

impl SourceKind {
    /// Canonical MIME type for this kind.
    pub fn content_type(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "application/pdf",
            SourceKind::Image(format) => format.to_mime_type(),
        }
    }

    pub fn is_pdf(&self) -> bool {
        matches!(self, SourceKind::Pdf)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Pdf => f.write_str("pdf"),
            SourceKind::Image(format) => write!(f, "image/{:?}", format),
        }
    }
}

/// The raw document bytes shared by every page of a job.
///
/// External renderers need a file path. The bytes are spilled to a temp file
/// on first request and that file is removed when the source is dropped.
pub struct SourceDocument {
    kind: SourceKind,
    bytes: Bytes,
    spill: OnceCell<NamedTempFile>,
}

impl SourceDocument {
    pub fn new(kind: SourceKind, bytes: Bytes) -> Self {
        Self {
            kind,
            bytes,
            spill: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Path of an on-disk copy of the source, written at most once.
    pub async fn materialize(&self) -> std::io::Result<&Path> {
        let file = self
            .spill
            .get_or_try_init(|| async {
                let suffix = if self.kind.is_pdf() { ".pdf" } else { ".img" };
                let file = tempfile::Builder::new()
                    .prefix("ocr-source-")
                    .suffix(suffix)
                    .tempfile()?;
                tokio::fs::write(file.path(), &self.bytes).await?;
                Ok::<_, std::io::Error>(file)
            })
            .await?;
        Ok(file.path())
    }
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDocument")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .field("spilled", &self.spill.initialized())
            .finish()
    }
}

// ── Page state ───────────────────────────────────────────────────────────

/// Data-free page state label, used in results and transition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    Pending,
    Rendering,
    Recognizing,
    Done,
    Failed,
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PageState::Pending => "pending",
            PageState::Rendering => "rendering",
            PageState::Recognizing => "recognizing",
            PageState::Done => "done",
            PageState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Page status with the payload each state owns.
#[derive(Debug, Clone, PartialEq)]
pub enum PageStatus {
    Pending,
    Rendering,
    Recognizing,
    Done { text: String, confidence: f32 },
    Failed(PageError),
}

impl PageStatus {
    pub fn state(&self) -> PageState {
        match self {
            PageStatus::Pending => PageState::Pending,
            PageStatus::Rendering => PageState::Rendering,
            PageStatus::Recognizing => PageState::Recognizing,
            PageStatus::Done { .. } => PageState::Done,
            PageStatus::Failed(_) => PageState::Failed,
        }
    }

    /// Done or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PageStatus::Done { .. } | PageStatus::Failed(_))
    }

    /// Rendering or Recognizing.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, PageStatus::Rendering | PageStatus::Recognizing)
    }
}

/// Rejected page transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("page {index}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub index: usize,
    pub from: PageState,
    pub to: PageState,
}

/// Dimensions of a page's raster once rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub width: u32,
    pub height: u32,
    /// `None` for image inputs, which are used at their native resolution.
    pub dpi: Option<u32>,
}

/// One unit of document content processed independently.
#[derive(Debug, Clone)]
pub struct Page {
    index: usize,
    source_page: usize,
    status: PageStatus,
    raster: Option<RasterInfo>,
    render_ms: Option<u64>,
    recognize_ms: Option<u64>,
}

impl Page {
    /// A pending page at job position `index` referring to the 0-based
    /// `source_page` of the source document.
    pub fn new(index: usize, source_page: usize) -> Self {
        Self {
            index,
            source_page,
            status: PageStatus::Pending,
            raster: None,
            render_ms: None,
            recognize_ms: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source_page(&self) -> usize {
        self.source_page
    }

    /// 1-indexed source page number, as shown to users.
    pub fn page_num(&self) -> usize {
        self.source_page + 1
    }

    pub fn status(&self) -> &PageStatus {
        &self.status
    }

    pub fn raster(&self) -> Option<RasterInfo> {
        self.raster
    }

    pub fn render_ms(&self) -> Option<u64> {
        self.render_ms
    }

    pub fn recognize_ms(&self) -> Option<u64> {
        self.recognize_ms
    }

    pub fn text(&self) -> Option<&str> {
        match &self.status {
            PageStatus::Done { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        match &self.status {
            PageStatus::Done { confidence, .. } => Some(*confidence),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PageError> {
        match &self.status {
            PageStatus::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Pending → Rendering.
    pub fn begin_render(&mut self) -> Result<(), TransitionError> {
        self.check(PageState::Pending, PageState::Rendering)?;
        self.status = PageStatus::Rendering;
        Ok(())
    }

    /// Rendering → Recognizing, recording the raster that was produced.
    pub fn begin_recognize(&mut self, raster: RasterInfo, render_ms: u64) -> Result<(), TransitionError> {
        self.check(PageState::Rendering, PageState::Recognizing)?;
        self.raster = Some(raster);
        self.render_ms = Some(render_ms);
        self.status = PageStatus::Recognizing;
        Ok(())
    }

    /// Recognizing → Done. The confidence is clamped to `[0, 1]`.
    pub fn complete(&mut self, text: String, confidence: f32, recognize_ms: u64) -> Result<(), TransitionError> {
        self.check(PageState::Recognizing, PageState::Done)?;
        self.recognize_ms = Some(recognize_ms);
        self.status = PageStatus::Done {
            text,
            confidence: clamp_confidence(confidence),
        };
        Ok(())
    }

    /// Any non-terminal state → Failed.
    pub fn fail(&mut self, error: PageError) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                index: self.index,
                from: self.status.state(),
                to: PageState::Failed,
            });
        }
        self.status = PageStatus::Failed(error);
        Ok(())
    }

    fn check(&self, expected: PageState, to: PageState) -> Result<(), TransitionError> {
        let from = self.status.state();
        if from == expected {
            Ok(())
        } else {
            Err(TransitionError {
                index: self.index,
                from,
                to,
            })
        }
    }
}

/// Clamp an engine confidence into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

// ── Document ─────────────────────────────────────────────────────────────

/// Aggregate status of a document, derived from its pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    PartiallyFailed,
    Failed,
}

impl DocumentStatus {
    /// Fold page statuses into the document status.
    ///
    /// Completed iff all Done, Failed iff all Failed, PartiallyFailed iff a
    /// mix of the two, Processing while any page is non-terminal (Pending if
    /// none has started yet).
    pub fn from_pages<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a PageStatus>,
    {
        let (mut pending, mut in_flight, mut done, mut failed) = (0usize, 0usize, 0usize, 0usize);
        for status in statuses {
            match status {
                PageStatus::Pending => pending += 1,
                PageStatus::Rendering | PageStatus::Recognizing => in_flight += 1,
                PageStatus::Done { .. } => done += 1,
                PageStatus::Failed(_) => failed += 1,
            }
        }

        if in_flight == 0 && done == 0 && failed == 0 {
            DocumentStatus::Pending
        } else if pending > 0 || in_flight > 0 {
            DocumentStatus::Processing
        } else if failed == 0 {
            DocumentStatus::Completed
        } else if done == 0 {
            DocumentStatus::Failed
        } else {
            DocumentStatus::PartiallyFailed
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::PartiallyFailed | DocumentStatus::Failed
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::PartiallyFailed => "partially_failed",
            DocumentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Descriptive facts about the loaded source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// "pdf" or "image".
    pub kind: String,
    pub content_type: String,
    /// Pages in the source, before selection.
    pub page_count: usize,
    pub pdf_version: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    /// Pixel dimensions for image sources.
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A loaded document and the state of each of its pages.
#[derive(Debug)]
pub struct Document {
    id: Uuid,
    filename: Option<String>,
    source: Arc<SourceDocument>,
    info: DocumentInfo,
    pages: Vec<Page>,
}

impl Document {
    /// Build a document whose pages are the given 0-based source pages, in
    /// ascending order. Page indices are assigned 0..N-1.
    pub fn new(
        filename: Option<String>,
        source: SourceDocument,
        info: DocumentInfo,
        source_pages: &[usize],
    ) -> Self {
        let pages = source_pages
            .iter()
            .enumerate()
            .map(|(index, &source_page)| Page::new(index, source_page))
            .collect();
        Self {
            id: Uuid::new_v4(),
            filename,
            source: Arc::new(source),
            info,
            pages,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> &str {
        &self.info.content_type
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn source(&self) -> &Arc<SourceDocument> {
        &self.source
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub(crate) fn page_mut(&mut self, index: usize) -> Option<&mut Page> {
        self.pages.get_mut(index)
    }

    pub fn status(&self) -> DocumentStatus {
        DocumentStatus::from_pages(self.pages.iter().map(Page::status))
    }
}

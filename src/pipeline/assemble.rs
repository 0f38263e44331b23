//! Result assembly: terminal document → [`DocumentResult`].
//!
//! Pure and infallible. Pages are emitted in page-index order exactly as
//! they sit in the document; the aggregate status is the fold over page
//! statuses, never a stored field.

use crate::config::PageSeparator;
use crate::document::{Document, Page};
use crate::error::PageError;
use crate::output::{DocumentResult, JobStats, PageResult};

/// Snapshot one page as a [`PageResult`].
pub fn page_result(page: &Page) -> PageResult {
    PageResult {
        index: page.index(),
        page_num: page.page_num(),
        source_page: page.source_page(),
        status: page.status().state(),
        text: page.text().map(str::to_string),
        confidence: page.confidence(),
        reason: page.error().map(PageError::kind),
        error: page.error().cloned(),
        raster: page.raster(),
        render_ms: page.render_ms(),
        recognize_ms: page.recognize_ms(),
    }
}

/// Build the final result for `doc`.
pub fn assemble(doc: &Document, stats: JobStats, separator: &PageSeparator) -> DocumentResult {
    let pages: Vec<PageResult> = doc.pages().iter().map(page_result).collect();
    let text = join_pages(&pages, separator);

    DocumentResult {
        id: doc.id(),
        filename: doc.filename().map(str::to_string),
        content_type: doc.content_type().to_string(),
        status: doc.status(),
        text,
        pages,
        info: doc.info().clone(),
        stats,
    }
}

/// Join the text of Done pages in order. Pages that recognised nothing are
/// left out so they don't produce runs of separators.
pub fn join_pages(pages: &[PageResult], separator: &PageSeparator) -> String {
    let mut out = String::new();
    for page in pages {
        let Some(text) = page.text.as_deref().filter(|t| !t.is_empty()) else {
            continue;
        };
        if !out.is_empty() {
            out.push_str(&separator.render(page.page_num));
        }
        out.push_str(text);
    }
    out
}

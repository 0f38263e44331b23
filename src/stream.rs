//! Streaming extraction API: emit pages as soon as they can be emitted in order.
//!
//! ## Why stream?
//!
//! Large scans take minutes. A stream lets callers show partial text
//! immediately or write pages to disk incrementally instead of waiting for
//! the whole document.
//!
//! Pages finish in arbitrary order but [`extract_stream`] yields them in
//! page-index order: a finished page is held back until every page before
//! it is terminal. Dropping the stream cancels the job; pages still running
//! are stopped and their engine processes killed.

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::extract::OcrPipeline;
use crate::output::PageResult;
use crate::pipeline::{assemble, input};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::info;

/// A boxed stream of page results in page-index order.
pub type PageStream = Pin<Box<dyn Stream<Item = PageResult> + Send>>;

/// Extract text from a path or URL, streaming pages in order.
///
/// # Returns
/// - `Ok(PageStream)` — one `PageResult` per selected page, Done or Failed
/// - `Err(OcrError)` — fatal error (file not found, unsupported format, …)
///
/// # Example
/// ```rust,no_run
/// use ocr_pipeline::{extract_stream, OcrConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = OcrConfig::default();
/// let mut pages = extract_stream("scan.pdf", &config).await?;
/// while let Some(page) = pages.next().await {
///     match (&page.text, &page.error) {
///         (Some(text), _) => println!("Page {}: {} chars", page.page_num, text.len()),
///         (_, Some(e)) => eprintln!("{e}"),
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_stream(
    input_str: impl AsRef<str>,
    config: &OcrConfig,
) -> Result<PageStream, OcrError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming extraction: {}", input_str);

    let resolved = input::resolve_input(
        input_str,
        config.download_timeout_secs,
        config.max_input_bytes,
    )
    .await?;
    OcrPipeline::from_config(config.clone())
        .process_stream(resolved.bytes, resolved.filename, resolved.content_type.as_deref())
        .await
}

impl OcrPipeline {
    /// Load `bytes` and stream its pages in order as they finish.
    ///
    /// Loading happens before this returns, so format errors surface as
    /// `Err` rather than inside the stream.
    pub async fn process_stream(
        &self,
        bytes: Bytes,
        filename: Option<String>,
        content_type: Option<&str>,
    ) -> Result<PageStream, OcrError> {
        let mut doc = self.load(bytes, filename, content_type).await?;
        let orchestrator = self.orchestrator().clone();

        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut held: BTreeMap<usize, PageResult> = BTreeMap::new();
            let mut next = 0usize;
            orchestrator
                .run_observed(&mut doc, &cancel, |page| {
                    held.insert(page.index(), assemble::page_result(page));
                    while let Some(result) = held.remove(&next) {
                        let _ = tx.send(result);
                        next += 1;
                    }
                })
                .await;
        });

        Ok(Box::pin(OrderedPages {
            inner: UnboundedReceiverStream::new(rx),
            _cancel_on_drop: guard,
        }))
    }
}

/// Receiver side of a streamed job. Dropping it cancels the job.
struct OrderedPages {
    inner: UnboundedReceiverStream<PageResult>,
    _cancel_on_drop: DropGuard,
}

impl Stream for OrderedPages {
    type Item = PageResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

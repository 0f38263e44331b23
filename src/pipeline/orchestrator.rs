//! Job orchestration: drive every page of a [`Document`] to Done or Failed.
//!
//! ## Shape
//!
//! ```text
//!             ┌─ worker 1 ─┐
//!  work list ─┼─ worker 2 ─┼─▶ PageEvent channel ─▶ driver ─▶ Document pages
//!  (0..N-1)   └─ worker K ─┘                          ▲
//!                                job deadline ────────┤
//!                                cancellation ────────┘
//! ```
//!
//! K workers pull page indices in ascending order and run
//! render → recognise for one page at a time, optionally holding a global
//! [`PagePermits`] slot. Workers never touch the document: they send
//! [`PageEvent`]s and the driver, the only writer of page state, commits
//! them through the [`Page`] transition methods.
//!
//! Every engine call is raced against the page deadline and the job stop
//! token inside [`guarded`], which owns the engine future. By the time a
//! worker reports `Timeout`, `JobTimeout` or `Cancelled`, that future has
//! been dropped, which kills the child process and removes its temp files.
//!
//! When the job deadline passes or the caller cancels, the driver records
//! the reason, fires the stop token and keeps draining events until every
//! worker has exited. Pages that never started are then failed with the
//! same reason. Done pages are never touched again.

use crate::config::OcrConfig;
use crate::document::{Document, Page, PageState, PageStatus, RasterInfo, SourceDocument};
use crate::error::{PageError, Stage};
use crate::output::JobStats;
use crate::pipeline::postprocess;
use crate::pipeline::recognize::Recognizer;
use crate::pipeline::render::Rasterizer;
use crate::pool::PagePermits;
use crate::progress::ProgressCallback;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Schedules rendering and recognition across the pages of a document.
#[derive(Clone)]
pub struct Orchestrator {
    config: OcrConfig,
    rasterizer: Arc<dyn Rasterizer>,
    recognizer: Arc<dyn Recognizer>,
    permits: Option<PagePermits>,
}

impl Orchestrator {
    pub fn new(
        config: OcrConfig,
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn Recognizer>,
        permits: Option<PagePermits>,
    ) -> Self {
        Self {
            config,
            rasterizer,
            recognizer,
            permits,
        }
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Run the job to completion. Every page of `doc` is terminal on return.
    pub async fn run(&self, doc: &mut Document, cancel: &CancellationToken) -> JobStats {
        self.run_observed(doc, cancel, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `on_terminal` each time a page
    /// reaches Done or Failed, in commit order.
    pub async fn run_observed<F>(
        &self,
        doc: &mut Document,
        cancel: &CancellationToken,
        on_terminal: F,
    ) -> JobStats
    where
        F: FnMut(&Page),
    {
        let started = Instant::now();
        let total = doc.page_count();
        // A deadline too far out to represent is no deadline at all.
        let job_deadline = self.config.job_deadline.and_then(|d| started.checked_add(d));
        let progress = self.config.progress_callback.clone();

        info!(
            "Job {}: {} pages, {} workers, page timeout {:?}, deadline {:?}",
            doc.id(),
            total,
            self.config.concurrency.min(total),
            self.config.page_timeout,
            self.config.job_deadline
        );
        if let Some(cb) = &progress {
            cb.on_job_start(total);
        }

        let ctx = Arc::new(WorkerCtx {
            rasterizer: Arc::clone(&self.rasterizer),
            recognizer: Arc::clone(&self.recognizer),
            source: Arc::clone(doc.source()),
            languages: self.config.languages.clone(),
            dpi: self.config.dpi,
            page_timeout: self.config.page_timeout,
            clean_text: self.config.clean_text,
            permits: self.permits.clone(),
            work: doc
                .pages()
                .iter()
                .map(|p| Work {
                    index: p.index(),
                    source_page: p.source_page(),
                })
                .collect(),
            next: AtomicUsize::new(0),
            stop: CancellationToken::new(),
            reason: OnceLock::new(),
        });

        let mut stopping = false;
        if cancel.is_cancelled() {
            ctx.halt(StopReason::Cancelled);
            stopping = true;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();
        for _ in 0..self.config.concurrency.min(total) {
            workers.spawn(worker(Arc::clone(&ctx), tx.clone()));
        }
        drop(tx);

        let deadline_passed = async move {
            match job_deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_passed);

        let mut driver = Driver {
            doc,
            progress,
            total,
            in_flight: 0,
            peak_in_flight: 0,
            on_terminal,
        };

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => driver.apply(event),
                    None => break,
                },
                _ = &mut deadline_passed, if !stopping => {
                    warn!("Job deadline passed; stopping remaining pages");
                    ctx.halt(StopReason::JobTimeout);
                    stopping = true;
                }
                _ = cancel.cancelled(), if !stopping => {
                    info!("Job cancelled; stopping remaining pages");
                    ctx.halt(StopReason::Cancelled);
                    stopping = true;
                }
            }
        }

        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                warn!("Page worker aborted: {}", e);
            }
        }

        // Pages left non-terminal were never started (or lost their worker).
        let reason = ctx.reason.get().copied();
        let leftovers: Vec<(usize, usize, PageState)> = driver
            .doc
            .pages()
            .iter()
            .filter(|p| !p.status().is_terminal())
            .map(|p| (p.index(), p.page_num(), p.status().state()))
            .collect();
        for (index, page_num, state) in leftovers {
            let error = match (reason, state) {
                (Some(r), _) => r.error(page_num),
                (None, PageState::Recognizing) => PageError::RecognitionFailure {
                    page: page_num,
                    cause: "page worker aborted".into(),
                },
                (None, _) => PageError::RenderFailure {
                    page: page_num,
                    cause: "page worker aborted".into(),
                },
            };
            driver.apply(PageEvent::Failed { index, error });
        }

        let peak_in_flight = driver.peak_in_flight;
        let progress = driver.progress.take();
        let pages = doc_pages_summary(driver.doc.pages());
        let stats = JobStats {
            total_pages: total,
            done_pages: pages.done,
            failed_pages: pages.failed,
            peak_in_flight,
            total_duration_ms: started.elapsed().as_millis() as u64,
            render_duration_ms: pages.render_ms,
            recognize_duration_ms: pages.recognize_ms,
        };

        let status = driver.doc.status();
        info!(
            "Job {} {}: {}/{} pages done in {}ms (peak {} in flight)",
            driver.doc.id(),
            status,
            stats.done_pages,
            total,
            stats.total_duration_ms,
            peak_in_flight
        );
        if let Some(cb) = &progress {
            cb.on_job_complete(total, stats.done_pages, status);
        }

        stats
    }
}

// ── Driver ───────────────────────────────────────────────────────────────

/// Commits worker events to the document. Sole writer of page state.
struct Driver<'a, F> {
    doc: &'a mut Document,
    progress: Option<ProgressCallback>,
    total: usize,
    in_flight: usize,
    peak_in_flight: usize,
    on_terminal: F,
}

impl<F: FnMut(&Page)> Driver<'_, F> {
    fn apply(&mut self, event: PageEvent) {
        let index = event.index();
        let Some(page) = self.doc.page_mut(index) else {
            warn!("Event for unknown page index {}", index);
            return;
        };

        let was_in_flight = page.status().is_in_flight();
        let committed = match event {
            PageEvent::Rendering { .. } => page.begin_render(),
            PageEvent::Recognizing {
                raster, render_ms, ..
            } => page.begin_recognize(raster, render_ms),
            PageEvent::Done {
                text,
                confidence,
                recognize_ms,
                ..
            } => page.complete(text, confidence, recognize_ms),
            PageEvent::Failed { error, .. } => page.fail(error),
        };
        if let Err(e) = committed {
            warn!("Dropped page event: {}", e);
            return;
        }

        match (was_in_flight, page.status().is_in_flight()) {
            (false, true) => self.in_flight += 1,
            (true, false) => self.in_flight = self.in_flight.saturating_sub(1),
            _ => {}
        }
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);

        let page_num = page.page_num();
        match page.status() {
            PageStatus::Rendering => {
                if let Some(cb) = &self.progress {
                    cb.on_page_start(page_num, self.total);
                }
            }
            PageStatus::Done { text, confidence } => {
                debug!(
                    "Page {} done: {} chars, confidence {:.2}, render {:?}ms, recognize {:?}ms",
                    page_num,
                    text.len(),
                    confidence,
                    page.render_ms(),
                    page.recognize_ms()
                );
                if let Some(cb) = &self.progress {
                    cb.on_page_complete(page_num, self.total, text.len(), *confidence);
                }
            }
            PageStatus::Failed(error) => {
                warn!("{}", error);
                if let Some(cb) = &self.progress {
                    cb.on_page_error(page_num, self.total, &error.to_string());
                }
            }
            PageStatus::Pending | PageStatus::Recognizing => {}
        }

        if page.status().is_terminal() {
            (self.on_terminal)(&*page);
        }
    }
}

struct PagesSummary {
    done: usize,
    failed: usize,
    render_ms: u64,
    recognize_ms: u64,
}

fn doc_pages_summary(pages: &[Page]) -> PagesSummary {
    PagesSummary {
        done: pages
            .iter()
            .filter(|p| matches!(p.status(), PageStatus::Done { .. }))
            .count(),
        failed: pages
            .iter()
            .filter(|p| matches!(p.status(), PageStatus::Failed(_)))
            .count(),
        render_ms: pages.iter().filter_map(Page::render_ms).sum(),
        recognize_ms: pages.iter().filter_map(Page::recognize_ms).sum(),
    }
}

// ── Workers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    JobTimeout,
    Cancelled,
}

impl StopReason {
    fn error(self, page: usize) -> PageError {
        match self {
            StopReason::JobTimeout => PageError::JobTimeout { page },
            StopReason::Cancelled => PageError::Cancelled { page },
        }
    }
}

#[derive(Debug)]
enum PageEvent {
    Rendering {
        index: usize,
    },
    Recognizing {
        index: usize,
        raster: RasterInfo,
        render_ms: u64,
    },
    Done {
        index: usize,
        text: String,
        confidence: f32,
        recognize_ms: u64,
    },
    Failed {
        index: usize,
        error: PageError,
    },
}

impl PageEvent {
    fn index(&self) -> usize {
        match self {
            PageEvent::Rendering { index }
            | PageEvent::Recognizing { index, .. }
            | PageEvent::Done { index, .. }
            | PageEvent::Failed { index, .. } => *index,
        }
    }
}

struct Work {
    index: usize,
    source_page: usize,
}

struct WorkerCtx {
    rasterizer: Arc<dyn Rasterizer>,
    recognizer: Arc<dyn Recognizer>,
    source: Arc<SourceDocument>,
    languages: Vec<String>,
    dpi: u32,
    page_timeout: Duration,
    clean_text: bool,
    permits: Option<PagePermits>,
    work: Vec<Work>,
    next: AtomicUsize,
    stop: CancellationToken,
    reason: OnceLock<StopReason>,
}

impl WorkerCtx {
    /// Record why the job stopped, then fire the stop token. The reason is
    /// set before the token so workers always observe it.
    fn halt(&self, reason: StopReason) {
        let _ = self.reason.set(reason);
        self.stop.cancel();
    }

    fn stopped(&self, index: usize, page_num: usize) -> PageEvent {
        let reason = self.reason.get().copied().unwrap_or(StopReason::Cancelled);
        PageEvent::Failed {
            index,
            error: reason.error(page_num),
        }
    }

    fn timed_out(&self, index: usize, page_num: usize, stage: Stage) -> PageEvent {
        PageEvent::Failed {
            index,
            error: PageError::Timeout {
                page: page_num,
                stage,
                millis: self.page_timeout.as_millis() as u64,
            },
        }
    }

    async fn process_page(&self, work: &Work, tx: &mpsc::UnboundedSender<PageEvent>) -> PageEvent {
        let index = work.index;
        let page_num = work.source_page + 1;
        let deadline = Instant::now().checked_add(self.page_timeout);

        // Claimed after the job stopped: never reported as started.
        if self.stop.is_cancelled() {
            return self.stopped(index, page_num);
        }
        let _ = tx.send(PageEvent::Rendering { index });

        let render_started = Instant::now();
        let render = self.rasterizer.render(&self.source, work.source_page, self.dpi);
        let raster = match guarded(&self.stop, deadline, render).await {
            Guarded::Done(Ok(raster)) => raster,
            Guarded::Done(Err(e)) => return PageEvent::Failed { index, error: e },
            Guarded::TimedOut => return self.timed_out(index, page_num, Stage::Render),
            Guarded::Stopped => return self.stopped(index, page_num),
        };
        let render_ms = render_started.elapsed().as_millis() as u64;

        let _ = tx.send(PageEvent::Recognizing {
            index,
            raster: raster.info(),
            render_ms,
        });

        let recognize_started = Instant::now();
        let recognize = self.recognizer.recognize(&raster, &self.languages);
        let recognition = match guarded(&self.stop, deadline, recognize).await {
            Guarded::Done(Ok(r)) => r,
            Guarded::Done(Err(e)) => return PageEvent::Failed { index, error: e },
            Guarded::TimedOut => return self.timed_out(index, page_num, Stage::Recognize),
            Guarded::Stopped => return self.stopped(index, page_num),
        };
        let recognize_ms = recognize_started.elapsed().as_millis() as u64;

        let text = if self.clean_text {
            postprocess::clean_text(&recognition.text)
        } else {
            recognition.text
        };

        PageEvent::Done {
            index,
            text,
            confidence: recognition.confidence,
            recognize_ms,
        }
    }
}

async fn worker(ctx: Arc<WorkerCtx>, tx: mpsc::UnboundedSender<PageEvent>) {
    loop {
        if ctx.stop.is_cancelled() {
            break;
        }
        let Some(work) = ctx.work.get(ctx.next.fetch_add(1, Ordering::SeqCst)) else {
            break;
        };

        let _permit = match &ctx.permits {
            Some(permits) => tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => break,
                permit = permits.acquire() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        let _ = tx.send(PageEvent::Failed {
                            index: work.index,
                            error: PageError::RenderFailure {
                                page: work.source_page + 1,
                                cause: "page permit pool closed".into(),
                            },
                        });
                        continue;
                    }
                },
            },
            None => None,
        };

        let event = ctx.process_page(work, &tx).await;
        if tx.send(event).is_err() {
            break;
        }
    }
}

enum Guarded<T> {
    Done(T),
    TimedOut,
    Stopped,
}

/// Await `fut` unless the stop token fires or `deadline` passes first.
/// `None` means the page has no deadline.
///
/// `fut` is owned here, so it has been dropped by the time this returns.
async fn guarded<F: Future>(
    stop: &CancellationToken,
    deadline: Option<Instant>,
    fut: F,
) -> Guarded<F::Output> {
    let bounded = async move {
        match deadline {
            Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
            None => Some(fut.await),
        }
    };
    tokio::select! {
        biased;
        _ = stop.cancelled() => Guarded::Stopped,
        res = bounded => match res {
            Some(out) => Guarded::Done(out),
            None => Guarded::TimedOut,
        },
    }
}

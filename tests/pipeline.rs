//! Orchestration tests over scripted engines.
//!
//! The fakes below stand in for pdftoppm and tesseract so the scheduling
//! rules (ordering, isolation, timeouts, the job deadline, cancellation and
//! the concurrency bounds) can be checked without any external tool.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lopdf::{dictionary, Object, Stream};
use ocr_pipeline::{
    DocumentStatus, FailureKind, JobProgressCallback, OcrConfig, OcrError, OcrPipeline,
    PageError, PagePermits, PageSelection, PageState, RasterImage, Rasterizer, Recognition,
    Recognizer, Stage,
};
use ocr_pipeline::document::SourceDocument;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn pdf_with_pages(n: usize) -> Bytes {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..n {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => n as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    Bytes::from(buf)
}

fn png_bytes(w: u32, h: u32) -> Bytes {
    let img = image::RgbImage::from_pixel(w, h, image::Rgb([255, 255, 255]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

/// Tracks how many engine calls are running at once across all fakes that
/// share it.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(Arc::clone(self))
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct GaugeGuard(Arc<Gauge>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Increments a counter when dropped before completing.
struct AbandonFlag {
    counter: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for AbandonFlag {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone, Copy)]
enum Script {
    After(Duration),
    Fail,
    Hang,
}

/// Rasterizer whose behaviour is scripted per 0-based source page.
#[derive(Default)]
struct ScriptedRasterizer {
    scripts: HashMap<usize, Script>,
    gauge: Arc<Gauge>,
    abandoned: Arc<AtomicUsize>,
    calls: AtomicUsize,
}

impl ScriptedRasterizer {
    fn with(mut self, page: usize, script: Script) -> Self {
        self.scripts.insert(page, script);
        self
    }

    fn sharing(gauge: Arc<Gauge>) -> Self {
        Self {
            gauge,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Rasterizer for ScriptedRasterizer {
    async fn render(
        &self,
        _source: &SourceDocument,
        source_page: usize,
        dpi: u32,
    ) -> Result<RasterImage, PageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _busy = self.gauge.enter();
        let mut flag = AbandonFlag {
            counter: Arc::clone(&self.abandoned),
            armed: true,
        };

        match self.scripts.get(&source_page).copied() {
            Some(Script::After(d)) => tokio::time::sleep(d).await,
            Some(Script::Fail) => {
                flag.armed = false;
                return Err(PageError::RenderFailure {
                    page: source_page + 1,
                    cause: "scripted render failure".into(),
                });
            }
            Some(Script::Hang) => std::future::pending::<()>().await,
            None => tokio::task::yield_now().await,
        }

        flag.armed = false;
        Ok(RasterImage {
            source_page,
            width: 10,
            height: 10,
            dpi: Some(dpi),
            png: Bytes::from_static(b"raster"),
        })
    }
}

/// Recognizer that reads back "page N" for every raster.
#[derive(Default)]
struct EchoRecognizer {
    delay: Option<Duration>,
    gauge: Arc<Gauge>,
    abandoned: Arc<AtomicUsize>,
}

#[async_trait]
impl Recognizer for EchoRecognizer {
    async fn recognize(
        &self,
        raster: &RasterImage,
        languages: &[String],
    ) -> Result<Recognition, PageError> {
        let _busy = self.gauge.enter();
        if languages.iter().all(|l| l == "xxx") {
            return Err(PageError::UnsupportedLanguage {
                page: raster.source_page + 1,
                requested: languages.to_vec(),
                available: vec!["eng".into()],
            });
        }
        if let Some(d) = self.delay {
            let mut flag = AbandonFlag {
                counter: Arc::clone(&self.abandoned),
                armed: true,
            };
            tokio::time::sleep(d).await;
            flag.armed = false;
        }
        Ok(Recognition::new(
            format!("page {}  \n\n\n", raster.source_page + 1),
            0.9,
        ))
    }
}

fn config(concurrency: usize) -> OcrConfig {
    OcrConfig::builder()
        .languages(["eng"])
        .concurrency(concurrency)
        .page_timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

fn pipeline(
    config: OcrConfig,
    rasterizer: Arc<ScriptedRasterizer>,
    recognizer: Arc<EchoRecognizer>,
    permits: Option<PagePermits>,
) -> OcrPipeline {
    OcrPipeline::new(config, rasterizer, recognizer, permits)
}

async fn wait_for(counter: &AtomicUsize, at_least: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while counter.load(Ordering::SeqCst) < at_least {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("counter never reached target");
}

// ── Ordering and isolation ───────────────────────────────────────────────────

#[tokio::test]
async fn pages_come_back_in_page_order_whatever_order_they_finish() {
    let mut rasterizer = ScriptedRasterizer::default();
    for page in 0..8 {
        // earlier pages take longer, with some jitter
        let ms = (8 - page as u64) * 15 + (page as u64 * 7) % 11;
        rasterizer = rasterizer.with(page, Script::After(Duration::from_millis(ms)));
    }
    let p = pipeline(
        config(4),
        Arc::new(rasterizer),
        Arc::new(EchoRecognizer::default()),
        None,
    );

    let result = p
        .process(pdf_with_pages(8), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Completed);
    let indices: Vec<usize> = result.pages.iter().map(|p| p.index).collect();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());
    for page in &result.pages {
        assert_eq!(page.text.as_deref(), Some(format!("page {}", page.page_num).as_str()));
        assert_eq!(page.confidence, Some(0.9));
        assert!(page.render_ms.is_some());
    }
    let expected: Vec<String> = (1..=8).map(|n| format!("page {n}")).collect();
    assert_eq!(result.text, expected.join("\n\n"));
    assert_eq!(result.stats.done_pages, 8);
    assert_eq!(result.stats.failed_pages, 0);
}

#[tokio::test]
async fn broken_page_does_not_affect_its_siblings() {
    let rasterizer = ScriptedRasterizer::default().with(1, Script::Fail);
    let p = pipeline(
        config(3),
        Arc::new(rasterizer),
        Arc::new(EchoRecognizer::default()),
        None,
    );

    let result = p
        .process(pdf_with_pages(3), Some("scan.pdf".into()), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::PartiallyFailed);
    assert_eq!(result.filename.as_deref(), Some("scan.pdf"));
    assert_eq!(result.content_type, "application/pdf");
    assert_eq!(result.pages[0].status, PageState::Done);
    assert_eq!(result.pages[1].status, PageState::Failed);
    assert_eq!(result.pages[1].reason, Some(FailureKind::RenderFailure));
    assert!(result.pages[1].text.is_none());
    assert_eq!(result.pages[2].status, PageState::Done);
    assert_eq!(result.text, "page 1\n\npage 3");

    let err = result.into_result().unwrap_err();
    assert!(matches!(
        err,
        OcrError::PartialFailure {
            success: 2,
            failed: 1,
            total: 3
        }
    ));
}

#[tokio::test]
async fn every_page_failing_fails_the_document() {
    let rasterizer = (0..3).fold(ScriptedRasterizer::default(), |r, p| r.with(p, Script::Fail));
    let p = pipeline(
        config(2),
        Arc::new(rasterizer),
        Arc::new(EchoRecognizer::default()),
        None,
    );

    let result = p
        .process(pdf_with_pages(3), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Failed);
    assert_eq!(result.text, "");
    assert!(matches!(
        result.into_result(),
        Err(OcrError::AllPagesFailed { total: 3, .. })
    ));
}

#[tokio::test]
async fn unsupported_language_is_a_page_failure() {
    let config = OcrConfig::builder().languages(["xxx"]).build().unwrap();
    let p = pipeline(
        config,
        Arc::new(ScriptedRasterizer::default()),
        Arc::new(EchoRecognizer::default()),
        None,
    );

    let result = p
        .process(pdf_with_pages(2), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Failed);
    for page in &result.pages {
        assert_eq!(page.reason, Some(FailureKind::UnsupportedLanguage));
    }
}

#[tokio::test]
async fn page_selection_keeps_source_numbers() {
    let config = OcrConfig::builder()
        .languages(["eng"])
        .pages(PageSelection::Set(vec![2, 4]))
        .build()
        .unwrap();
    let p = pipeline(
        config,
        Arc::new(ScriptedRasterizer::default()),
        Arc::new(EchoRecognizer::default()),
        None,
    );

    let result = p
        .process(pdf_with_pages(5), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.pages.len(), 2);
    assert_eq!(result.pages[0].index, 0);
    assert_eq!(result.pages[0].page_num, 2);
    assert_eq!(result.pages[1].index, 1);
    assert_eq!(result.pages[1].page_num, 4);
    assert_eq!(result.text, "page 2\n\npage 4");
    assert_eq!(result.info.page_count, 5);
}

#[tokio::test]
async fn selection_outside_the_document_is_fatal() {
    let config = OcrConfig::builder()
        .languages(["eng"])
        .pages(PageSelection::Single(9))
        .build()
        .unwrap();
    let rasterizer = Arc::new(ScriptedRasterizer::default());
    let p = pipeline(config, Arc::clone(&rasterizer), Arc::new(EchoRecognizer::default()), None);

    let err = p
        .process(pdf_with_pages(3), None, None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OcrError::EmptySelection { total: 3 }));
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn single_image_is_a_one_page_document() {
    let p = pipeline(
        config(4),
        Arc::new(ScriptedRasterizer::default()),
        Arc::new(EchoRecognizer::default()),
        None,
    );

    let result = p
        .process(png_bytes(40, 20), Some("receipt.png".into()), Some("image/png"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Completed);
    assert_eq!(result.content_type, "image/png");
    assert_eq!(result.pages.len(), 1);
    assert_eq!(result.text, "page 1");
    assert_eq!(result.info.width, Some(40));
    assert_eq!(result.info.height, Some(20));
}

// ── Timeouts and cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn page_timeout_abandons_the_engine_call() {
    let rasterizer = Arc::new(ScriptedRasterizer::default().with(1, Script::Hang));
    let config = OcrConfig::builder()
        .languages(["eng"])
        .concurrency(3)
        .page_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let p = pipeline(config, Arc::clone(&rasterizer), Arc::new(EchoRecognizer::default()), None);

    let result = p
        .process(pdf_with_pages(3), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::PartiallyFailed);
    assert_eq!(
        result.pages[1].error,
        Some(PageError::Timeout {
            page: 2,
            stage: Stage::Render,
            millis: 200
        })
    );
    assert_eq!(result.pages[0].status, PageState::Done);
    assert_eq!(result.pages[2].status, PageState::Done);
    assert_eq!(rasterizer.abandoned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn page_timeout_spans_render_and_recognize() {
    // Each stage alone fits in the budget; together they do not.
    let rasterizer = Arc::new(
        ScriptedRasterizer::default().with(0, Script::After(Duration::from_millis(120))),
    );
    let recognizer = Arc::new(EchoRecognizer {
        delay: Some(Duration::from_millis(120)),
        ..EchoRecognizer::default()
    });
    let config = OcrConfig::builder()
        .languages(["eng"])
        .concurrency(1)
        .page_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let p = pipeline(config, Arc::clone(&rasterizer), Arc::clone(&recognizer), None);

    let result = p
        .process(pdf_with_pages(1), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Failed);
    assert_eq!(
        result.pages[0].error,
        Some(PageError::Timeout {
            page: 1,
            stage: Stage::Recognize,
            millis: 200
        })
    );
    assert_eq!(rasterizer.abandoned.load(Ordering::SeqCst), 0);
    assert_eq!(recognizer.abandoned.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unrepresentable_timeouts_mean_no_deadline() {
    let config = OcrConfig::builder()
        .languages(["eng"])
        .concurrency(2)
        .page_timeout(Duration::from_secs(u64::MAX))
        .job_deadline(Some(Duration::from_secs(u64::MAX)))
        .build()
        .unwrap();
    let p = pipeline(
        config,
        Arc::new(ScriptedRasterizer::default()),
        Arc::new(EchoRecognizer::default()),
        None,
    );

    let result = p
        .process(pdf_with_pages(2), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Completed);
    assert_eq!(result.text, "page 1\n\npage 2");
}

#[tokio::test]
async fn job_deadline_keeps_finished_pages() {
    let rasterizer = (0..5).fold(ScriptedRasterizer::default(), |r, p| {
        r.with(p, Script::After(Duration::from_millis(200)))
    });
    let rasterizer = Arc::new(rasterizer);
    let config = OcrConfig::builder()
        .languages(["eng"])
        .concurrency(1)
        .job_deadline(Some(Duration::from_millis(500)))
        .build()
        .unwrap();
    let p = pipeline(config, Arc::clone(&rasterizer), Arc::new(EchoRecognizer::default()), None);

    let result = p
        .process(pdf_with_pages(5), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::PartiallyFailed);
    assert_eq!(result.stats.done_pages, 2);
    assert_eq!(result.text, "page 1\n\npage 2");
    for page in &result.pages[2..] {
        assert_eq!(page.reason, Some(FailureKind::JobTimeout), "page {}", page.page_num);
    }
    // page 3 was mid-render when the deadline fired
    assert_eq!(rasterizer.abandoned.load(Ordering::SeqCst), 1);
    assert!(result.stats.total_duration_ms < 2_000);
}

#[tokio::test]
async fn cancellation_keeps_done_pages_and_stops_the_rest() {
    let rasterizer = (1..4).fold(ScriptedRasterizer::default(), |r, p| r.with(p, Script::Hang));
    let rasterizer = Arc::new(rasterizer);
    let p = pipeline(config(2), Arc::clone(&rasterizer), Arc::new(EchoRecognizer::default()), None);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let abandoned = Arc::clone(&rasterizer.abandoned);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let result = p
        .process(pdf_with_pages(4), None, None, &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::PartiallyFailed);
    assert_eq!(result.pages[0].status, PageState::Done);
    assert_eq!(result.text, "page 1");
    for page in &result.pages[1..] {
        assert_eq!(page.error, Some(PageError::Cancelled { page: page.page_num }));
    }
    // two workers: pages 2 and 3 were hanging in render
    assert_eq!(abandoned.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let rasterizer = Arc::new(ScriptedRasterizer::default());
    let p = pipeline(config(2), Arc::clone(&rasterizer), Arc::new(EchoRecognizer::default()), None);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = p
        .process(pdf_with_pages(3), None, None, &cancel)
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Failed);
    assert!(result
        .pages
        .iter()
        .all(|p| p.reason == Some(FailureKind::Cancelled)));
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
}

// ── Concurrency bounds ───────────────────────────────────────────────────────

#[tokio::test]
async fn never_more_than_k_pages_in_flight() {
    let gauge = Arc::new(Gauge::default());
    let rasterizer = (0..12).fold(ScriptedRasterizer::sharing(Arc::clone(&gauge)), |r, p| {
        r.with(p, Script::After(Duration::from_millis(20)))
    });
    let recognizer = EchoRecognizer {
        delay: Some(Duration::from_millis(10)),
        gauge: Arc::clone(&gauge),
        ..EchoRecognizer::default()
    };
    let p = pipeline(config(3), Arc::new(rasterizer), Arc::new(recognizer), None);

    let result = p
        .process(pdf_with_pages(12), None, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status, DocumentStatus::Completed);
    assert!(gauge.peak() <= 3, "peak engine calls {}", gauge.peak());
    assert!(result.stats.peak_in_flight <= 3);
    assert!(result.stats.peak_in_flight >= 1);
}

#[tokio::test]
async fn shared_permits_bound_pages_across_jobs() {
    let gauge = Arc::new(Gauge::default());
    let permits = PagePermits::new(2);

    let make = || {
        let rasterizer = (0..6).fold(ScriptedRasterizer::sharing(Arc::clone(&gauge)), |r, p| {
            r.with(p, Script::After(Duration::from_millis(20)))
        });
        let recognizer = EchoRecognizer {
            gauge: Arc::clone(&gauge),
            ..EchoRecognizer::default()
        };
        pipeline(config(4), Arc::new(rasterizer), Arc::new(recognizer), Some(permits.clone()))
    };
    let (a, b) = (make(), make());

    let cancel = CancellationToken::new();
    let (ra, rb) = tokio::join!(
        a.process(pdf_with_pages(6), None, None, &cancel),
        b.process(pdf_with_pages(6), None, None, &cancel),
    );

    assert_eq!(ra.unwrap().status, DocumentStatus::Completed);
    assert_eq!(rb.unwrap().status, DocumentStatus::Completed);
    assert!(gauge.peak() <= 2, "peak engine calls {}", gauge.peak());
    assert_eq!(permits.available(), 2);
}

// ── Streaming ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_yields_pages_in_order() {
    let rasterizer = (0..5).fold(ScriptedRasterizer::default(), |r, p| {
        r.with(p, Script::After(Duration::from_millis((5 - p as u64) * 20)))
    });
    let p = pipeline(config(5), Arc::new(rasterizer), Arc::new(EchoRecognizer::default()), None);

    let pages: Vec<_> = p
        .process_stream(pdf_with_pages(5), None, None)
        .await
        .unwrap()
        .collect()
        .await;

    let nums: Vec<usize> = pages.iter().map(|p| p.page_num).collect();
    assert_eq!(nums, vec![1, 2, 3, 4, 5]);
    assert!(pages.iter().all(|p| p.is_done()));
}

#[tokio::test]
async fn dropping_the_stream_cancels_the_job() {
    let rasterizer = (1..3).fold(ScriptedRasterizer::default(), |r, p| r.with(p, Script::Hang));
    let rasterizer = Arc::new(rasterizer);
    let p = pipeline(config(3), Arc::clone(&rasterizer), Arc::new(EchoRecognizer::default()), None);

    let mut stream = p
        .process_stream(pdf_with_pages(3), None, None)
        .await
        .unwrap();
    let first = stream.next().await.unwrap();
    assert_eq!(first.page_num, 1);
    assert!(first.is_done());

    drop(stream);
    wait_for(&rasterizer.abandoned, 2).await;
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl JobProgressCallback for Recorder {
    fn on_job_start(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("start {total_pages}"));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.events.lock().unwrap().push(format!("begin {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, _total: usize, text_len: usize, _confidence: f32) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {page_num} {text_len}"));
    }

    fn on_page_error(&self, page_num: usize, _total: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("error {page_num}"));
    }

    fn on_job_complete(&self, total: usize, success: usize, status: DocumentStatus) {
        self.events
            .lock()
            .unwrap()
            .push(format!("finish {total} {success} {status}"));
    }
}

#[tokio::test]
async fn progress_reports_every_page_once() {
    let recorder = Arc::new(Recorder::default());
    let config = OcrConfig::builder()
        .languages(["eng"])
        .concurrency(1)
        .progress_callback(Arc::clone(&recorder) as Arc<dyn JobProgressCallback>)
        .build()
        .unwrap();
    let rasterizer = ScriptedRasterizer::default().with(1, Script::Fail);
    let p = pipeline(config, Arc::new(rasterizer), Arc::new(EchoRecognizer::default()), None);

    p.process(pdf_with_pages(3), None, None, &CancellationToken::new())
        .await
        .unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "start 3",
            "begin 1",
            "done 1 6",
            "begin 2",
            "error 2",
            "begin 3",
            "done 3 6",
            "finish 3 2 partially_failed",
        ]
    );
}

//! CLI binary for ocr-pipeline.
//!
//! A thin shim over the library crate that maps CLI flags to `OcrConfig`,
//! wires Ctrl-C to job cancellation and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use ocr_pipeline::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use ocr_pipeline::extract::write_text_atomic;
use ocr_pipeline::{
    inspect, Chunker, DocumentResult, DocumentStatus, JobProgressCallback, OcrConfig, OcrPipeline,
    PagePermits, PageSelection, PageSeparator, ProgressCallback, TesseractOptions,
    TesseractRecognizer, TextChunk,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished page. Pages finish out
/// of order when concurrency > 1, so start times are keyed by page number.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Recognising");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Recognising {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, text_len: usize, confidence: f32) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {:<6}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{:>3.0}%", confidence * 100.0)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);

        let msg = match error.char_indices().nth(79) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_complete(&self, total_pages: usize, success_count: usize, status: DocumentStatus) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        match status {
            DocumentStatus::Completed => eprintln!(
                "{} {} pages recognised",
                green("✔"),
                bold(&success_count.to_string())
            ),
            DocumentStatus::Failed => eprintln!("{} all {} pages failed", red("✘"), total_pages),
            _ => eprintln!(
                "{} {}/{} pages recognised  ({} failed)",
                cyan("⚠"),
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            ),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic extraction (stdout)
  ocr-extract scan.pdf

  # Extract to file
  ocr-extract scan.pdf -o scan.txt

  # Portuguese + English, pages 1-5, 200 DPI
  ocr-extract --lang por,eng --pages 1-5 --dpi 200 scan.pdf

  # Images work too
  ocr-extract receipt.jpg

  # Extract from URL
  ocr-extract https://example.com/scan.pdf -o scan.txt

  # Bound the whole job to two minutes
  ocr-extract --deadline 120 big-scan.pdf

  # Chunks for indexing, one JSON object per line
  ocr-extract --chunks --chunk-size 1700 --chunk-overlap 80 scan.pdf

  # Inspect a document (no OCR tools needed)
  ocr-extract --inspect-only scan.pdf

  # Installed tesseract languages
  ocr-extract --list-langs

  # JSON output with per-page status and confidence
  ocr-extract --json scan.pdf > result.json

REQUIREMENTS:
  pdftoppm    poppler-utils   (PDF rendering)
  tesseract   tesseract-ocr   (+ one package per language, e.g. tesseract-ocr-por)

ENVIRONMENT VARIABLES:
  Every flag has an OCR_* equivalent (see --help), e.g. OCR_LANG, OCR_DPI.
  RUST_LOG          Override log filtering (e.g. RUST_LOG=ocr_pipeline=debug)
  TESSDATA_PREFIX   tesseract language data directory (or use --tessdata)

EXIT STATUS:
  0  all pages recognised (or some failed without --strict)
  1  fatal error, every page failed, or --strict with any page failed

Ctrl-C stops the job; pages already recognised are still printed.
"#;

/// Extract text from scanned PDFs and images with tesseract.
#[derive(Parser, Debug)]
#[command(
    name = "ocr-extract",
    version,
    about = "Extract text from scanned PDFs and images with tesseract",
    long_about = "Extract text from scanned PDF documents and images (local files or URLs). \
Each page is rendered with pdftoppm and recognised with tesseract, several pages at a time, \
with per-page timeouts and an optional deadline for the whole job.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/image path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "list_langs")]
    input: Option<String>,

    /// Write text (or JSON with --json) to this file instead of stdout.
    #[arg(short, long, env = "OCR_OUTPUT")]
    output: Option<PathBuf>,

    /// Recognition languages, comma or plus separated (e.g. por,eng).
    #[arg(long, env = "OCR_LANG", default_value = "por")]
    lang: String,

    /// Rendering DPI for PDF pages (72–600).
    #[arg(long, env = "OCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Pages recognised at the same time.
    #[arg(short, long, env = "OCR_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-page render + recognise timeout in seconds.
    #[arg(long, env = "OCR_PAGE_TIMEOUT", default_value_t = 120)]
    page_timeout: u64,

    /// Deadline for the whole job in seconds.
    #[arg(long, env = "OCR_DEADLINE")]
    deadline: Option<u64>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "OCR_PAGES", default_value = "all")]
    pages: String,

    /// Page separator: blank, formfeed, marker, or a custom string.
    #[arg(long, env = "OCR_SEPARATOR", default_value = "blank")]
    separator: String,

    /// Keep recognised text exactly as tesseract produced it.
    #[arg(long, env = "OCR_RAW_TEXT")]
    raw_text: bool,

    /// Output structured JSON (DocumentResult) instead of text.
    #[arg(long, env = "OCR_JSON")]
    json: bool,

    /// Output JSON Lines of overlapping text chunks instead of text.
    #[arg(long, env = "OCR_CHUNKS", conflicts_with = "json")]
    chunks: bool,

    /// Chunk size in characters (with --chunks).
    #[arg(long, env = "OCR_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters repeated between consecutive chunks (with --chunks).
    #[arg(long, env = "OCR_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Disable progress bar.
    #[arg(long, env = "OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Print document information only, no OCR.
    #[arg(long)]
    inspect_only: bool,

    /// List installed tesseract languages and exit.
    #[arg(long)]
    list_langs: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR_QUIET")]
    quiet: bool,

    /// Exit with an error if any page failed.
    #[arg(long, env = "OCR_STRICT")]
    strict: bool,

    /// tesseract executable.
    #[arg(long, env = "OCR_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// pdftoppm executable.
    #[arg(long, env = "OCR_PDFTOPPM", default_value = "pdftoppm")]
    pdftoppm: PathBuf,

    /// tesseract page segmentation mode.
    #[arg(long, env = "OCR_PSM", default_value_t = 3,
          value_parser = clap::value_parser!(u8).range(0..=13))]
    psm: u8,

    /// tesseract OCR engine mode.
    #[arg(long, env = "OCR_OEM", value_parser = clap::value_parser!(u8).range(0..=3))]
    oem: Option<u8>,

    /// tesseract language data directory.
    #[arg(long, env = "OCR_TESSDATA")]
    tessdata: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "OCR_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Largest accepted input in MiB.
    #[arg(long, env = "OCR_MAX_INPUT_MB", default_value_t = 100)]
    max_input_mb: usize,

    /// Process-wide cap on pages in flight (shared by all jobs).
    #[arg(long, env = "OCR_MAX_GLOBAL_PAGES")]
    max_global_pages: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the feedback that matters, so library INFO
    // logs are muted while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let tesseract = TesseractOptions {
        binary: cli.tesseract.clone(),
        psm: cli.psm,
        oem: cli.oem,
        tessdata_dir: cli.tessdata.clone(),
    };

    // ── List languages ───────────────────────────────────────────────────
    if cli.list_langs {
        let recognizer = TesseractRecognizer::new(tesseract);
        let langs = recognizer
            .installed_languages()
            .await
            .context("Failed to list tesseract languages")?;
        for lang in langs {
            println!("{lang}");
        }
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .context("An input path or URL is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, tesseract, None)?;
        let info = inspect(&input, &config)
            .await
            .context("Failed to inspect document")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize document info")?
            );
        } else {
            println!("File:         {}", input);
            println!("Type:         {} ({})", info.kind, info.content_type);
            println!("Pages:        {}", info.page_count);
            if let Some(ref v) = info.pdf_version {
                println!("PDF Version:  {}", v);
            }
            if let (Some(w), Some(h)) = (info.width, info.height) {
                println!("Size:         {}x{} px", w, h);
            }
            if let Some(ref t) = info.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = info.author {
                println!("Author:       {}", a);
            }
            if let Some(ref s) = info.subject {
                println!("Subject:      {}", s);
            }
            if let Some(ref p) = info.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = info.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // Reject bad chunk settings before any OCR work.
    let chunker = if cli.chunks {
        Some(Chunker::new(cli.chunk_size, cli.chunk_overlap).context("Invalid chunk options")?)
    } else {
        None
    };

    // ── Build pipeline ───────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn JobProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, tesseract, progress_cb)?;
    let permits = cli.max_global_pages.map(PagePermits::new);
    let pipeline = OcrPipeline::from_config_with_permits(config, permits);

    // Ctrl-C stops the job; recognised pages are still reported.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let result = pipeline
        .process_input(&input, &cancel)
        .await
        .context("Extraction failed")?;

    emit(&cli, &result, chunker.as_ref()).await?;

    if !cli.quiet && !show_progress {
        eprintln!(
            "{} {}/{} pages in {}ms",
            result.status, result.stats.done_pages, result.stats.total_pages, result.stats.total_duration_ms
        );
    }
    if cancel.is_cancelled() && !cli.quiet {
        eprintln!("{} interrupted; partial result written", cyan("⚠"));
    }

    let status = result.status;
    match status {
        DocumentStatus::PartiallyFailed if !cli.strict => Ok(()),
        _ => result
            .into_result()
            .map(|_| ())
            .context("Extraction incomplete"),
    }
}

/// Write the result as text, JSON or chunk lines to `--output` or stdout.
async fn emit(cli: &Cli, result: &DocumentResult, chunker: Option<&Chunker>) -> Result<()> {
    let body = if let Some(chunker) = chunker {
        chunk_lines(&result.chunks(chunker))?
    } else if cli.json {
        serde_json::to_string_pretty(result).context("Failed to serialise output")?
    } else {
        result.text.clone()
    };

    if let Some(ref output_path) = cli.output {
        write_text_atomic(output_path, &body)
            .await
            .context("Failed to write output")?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&output_path.display().to_string()));
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(body.as_bytes())
            .context("Failed to write to stdout")?;
        if !body.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }
    Ok(())
}

/// One JSON object per line.
fn chunk_lines(chunks: &[TextChunk]) -> Result<String> {
    let mut lines = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        lines.push(serde_json::to_string(chunk).context("Failed to serialise chunk")?);
    }
    Ok(lines.join("\n"))
}

/// Map CLI args to `OcrConfig`.
fn build_config(
    cli: &Cli,
    tesseract: TesseractOptions,
    progress: Option<ProgressCallback>,
) -> Result<OcrConfig> {
    let mut builder = OcrConfig::builder()
        .dpi(cli.dpi)
        .languages(parse_languages(&cli.lang))
        .concurrency(cli.concurrency)
        .page_timeout(Duration::from_secs(cli.page_timeout))
        .job_deadline(cli.deadline.map(Duration::from_secs))
        .pages(parse_pages(&cli.pages)?)
        .page_separator(parse_separator(&cli.separator))
        .clean_text(!cli.raw_text)
        .max_input_bytes(cli.max_input_mb.saturating_mul(1024 * 1024))
        .download_timeout_secs(cli.download_timeout)
        .tesseract(tesseract)
        .pdftoppm_binary(cli.pdftoppm.clone());

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Split `--lang` on commas and plus signs.
fn parse_languages(s: &str) -> Vec<String> {
    s.split([',', '+'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "blank" | "" => PageSeparator::BlankLine,
        "formfeed" | "ff" => PageSeparator::FormFeed,
        "marker" => PageSeparator::Marker,
        _ => PageSeparator::Custom(s.to_string()),
    }
}

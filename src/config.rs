//! Configuration types for OCR extraction.
//!
//! All pipeline behaviour is controlled through [`OcrConfig`], built via its
//! [`OcrConfigBuilder`]. One struct carries every knob the orchestrator and
//! the engine adapters read, so it can be shared across jobs and logged.

use crate::error::OcrError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for an OCR extraction job.
///
/// Built via [`OcrConfig::builder()`] or using [`OcrConfig::default()`].
///
/// # Example
/// ```rust
/// use ocr_pipeline::OcrConfig;
/// use std::time::Duration;
///
/// let config = OcrConfig::builder()
///     .dpi(300)
///     .concurrency(4)
///     .languages(["por", "eng"])
///     .page_timeout(Duration::from_secs(60))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct OcrConfig {
    /// Rendering DPI for PDF pages. Range: 72–600. Default: 300.
    ///
    /// Tesseract is trained on text around 300 DPI; lower values lose small
    /// glyphs, higher values mostly cost memory and time.
    pub dpi: u32,

    /// Recognition languages as tesseract codes. Default: `["por"]`.
    pub languages: Vec<String>,

    /// Maximum pages in flight (rendering or recognizing) per job. Default: 4.
    pub concurrency: usize,

    /// Budget for one page's render + recognize sequence. Default: 120 s.
    pub page_timeout: Duration,

    /// Optional deadline for the whole job, measured from job start.
    pub job_deadline: Option<Duration>,

    /// Page selection. Default: All pages.
    pub pages: PageSelection,

    /// Separator between pages in the joined text. Default: blank line.
    pub page_separator: PageSeparator,

    /// Apply whitespace/invisible-character cleanup to recognized text. Default: true.
    pub clean_text: bool,

    /// Largest accepted input in bytes. Default: 100 MiB.
    pub max_input_bytes: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Tesseract invocation options.
    pub tesseract: TesseractOptions,

    /// `pdftoppm` executable. Default: `pdftoppm` on `PATH`.
    pub pdftoppm_binary: PathBuf,

    /// Optional progress callback invoked as pages change state.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            languages: vec!["por".to_string()],
            concurrency: 4,
            page_timeout: Duration::from_secs(120),
            job_deadline: None,
            pages: PageSelection::default(),
            page_separator: PageSeparator::default(),
            clean_text: true,
            max_input_bytes: 100 * 1024 * 1024,
            download_timeout_secs: 120,
            tesseract: TesseractOptions::default(),
            pdftoppm_binary: PathBuf::from("pdftoppm"),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("dpi", &self.dpi)
            .field("languages", &self.languages)
            .field("concurrency", &self.concurrency)
            .field("page_timeout", &self.page_timeout)
            .field("job_deadline", &self.job_deadline)
            .field("pages", &self.pages)
            .field("page_separator", &self.page_separator)
            .field("clean_text", &self.clean_text)
            .field("max_input_bytes", &self.max_input_bytes)
            .field("tesseract", &self.tesseract)
            .field("pdftoppm_binary", &self.pdftoppm_binary)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressCallback>"),
            )
            .finish()
    }
}

impl OcrConfig {
    /// Create a new builder for `OcrConfig`.
    pub fn builder() -> OcrConfigBuilder {
        OcrConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`OcrConfig`].
#[derive(Debug)]
pub struct OcrConfigBuilder {
    config: OcrConfig,
}

impl OcrConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.languages = languages
            .into_iter()
            .map(Into::into)
            .map(|l: String| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn page_timeout(mut self, timeout: Duration) -> Self {
        self.config.page_timeout = timeout;
        self
    }

    pub fn job_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.config.job_deadline = deadline;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn clean_text(mut self, v: bool) -> Self {
        self.config.clean_text = v;
        self
    }

    pub fn max_input_bytes(mut self, n: usize) -> Self {
        self.config.max_input_bytes = n;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn tesseract(mut self, opts: TesseractOptions) -> Self {
        self.config.tesseract = opts;
        self
    }

    pub fn pdftoppm_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdftoppm_binary = path.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OcrConfig, OcrError> {
        let c = &self.config;
        if !(72..=600).contains(&c.dpi) {
            return Err(OcrError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.concurrency == 0 {
            return Err(OcrError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.languages.is_empty() {
            return Err(OcrError::InvalidConfig(
                "At least one recognition language is required".into(),
            ));
        }
        if let Some(bad) = c
            .languages
            .iter()
            .find(|l| !l.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_'))
        {
            return Err(OcrError::InvalidConfig(format!(
                "Invalid language code '{bad}'"
            )));
        }
        if c.page_timeout.is_zero() {
            return Err(OcrError::InvalidConfig("Page timeout must be > 0".into()));
        }
        if c.job_deadline.is_some_and(|d| d.is_zero()) {
            return Err(OcrError::InvalidConfig("Job deadline must be > 0".into()));
        }
        if c.max_input_bytes == 0 {
            return Err(OcrError::InvalidConfig(
                "Input size limit must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Options passed to the tesseract CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesseractOptions {
    /// Executable. Default: `tesseract` on `PATH`.
    pub binary: PathBuf,
    /// Page segmentation mode (`--psm`). Default: 3 (fully automatic).
    pub psm: u8,
    /// OCR engine mode (`--oem`). `None` leaves tesseract's default.
    pub oem: Option<u8>,
    /// Overrides `TESSDATA_PREFIX` for the child process.
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for TesseractOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            psm: 3,
            oem: None,
            tessdata_dir: None,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which pages of the document to process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process a single page (1-indexed).
    Single(usize),
    /// Process a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Process specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// How to separate pages in the joined text output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blank line between pages. (default)
    #[default]
    BlankLine,
    /// Form feed character, as `pdftotext` emits.
    FormFeed,
    /// Marker line with the page number: "--- page N ---"
    Marker,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator string placed before the given page (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::BlankLine => "\n\n".to_string(),
            PageSeparator::FormFeed => "\n\u{000C}".to_string(),
            PageSeparator::Marker => format!("\n\n--- page {} ---\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

//! Text recognition: one raster → text plus a confidence score.
//!
//! [`TesseractRecognizer`] pipes the PNG into `tesseract stdin stdout ... tsv`
//! and rebuilds the text from the word rows of the TSV report. Plain-text
//! output would be simpler but carries no confidences.
//!
//! TSV columns:
//! `level page_num block_num par_num line_num word_num left top width height conf text`

use crate::config::TesseractOptions;
use crate::document::clamp_confidence;
use crate::error::PageError;
use crate::pipeline::process;
use crate::pipeline::render::RasterImage;
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Recognised text of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Always within `[0, 1]`.
    pub confidence: f32,
}

impl Recognition {
    /// Build a recognition, clamping `confidence` into `[0, 1]` (NaN → 0).
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: clamp_confidence(confidence),
        }
    }
}

/// Runs text recognition over one raster image.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognise `raster` using `languages` (non-empty, tesseract codes).
    ///
    /// Fails with [`PageError::UnsupportedLanguage`] when none of the
    /// languages is available and [`PageError::RecognitionFailure`] on
    /// engine errors.
    async fn recognize(&self, raster: &RasterImage, languages: &[String]) -> Result<Recognition, PageError>;
}

/// The `tesseract` command-line engine.
#[derive(Debug)]
pub struct TesseractRecognizer {
    opts: TesseractOptions,
    installed: OnceCell<Vec<String>>,
}

impl TesseractRecognizer {
    pub fn new(opts: TesseractOptions) -> Self {
        Self {
            opts,
            installed: OnceCell::new(),
        }
    }

    fn base_command(&self) -> Command {
        let mut cmd = process::command(&self.opts.binary);
        if let Some(dir) = &self.opts.tessdata_dir {
            cmd.env("TESSDATA_PREFIX", dir);
        }
        cmd
    }

    /// Languages reported by `tesseract --list-langs`, fetched once.
    pub async fn installed_languages(&self) -> Result<&[String], process::ToolError> {
        let langs = self
            .installed
            .get_or_try_init(|| async {
                let mut cmd = self.base_command();
                cmd.arg("--list-langs");
                let out = process::run(cmd, None).await?;
                // tesseract 3 prints the list on stderr, later versions on stdout
                let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
                combined.push('\n');
                combined.push_str(&String::from_utf8_lossy(&out.stderr));
                let langs = parse_list_langs(&combined);
                debug!("tesseract languages installed: {:?}", langs);
                Ok::<_, process::ToolError>(langs)
            })
            .await?;
        Ok(langs)
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new(TesseractOptions::default())
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    async fn recognize(&self, raster: &RasterImage, languages: &[String]) -> Result<Recognition, PageError> {
        let page = raster.source_page + 1;
        let fail = |cause: String| PageError::RecognitionFailure { page, cause };

        let installed = self
            .installed_languages()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let langs = select_languages(languages, installed).ok_or_else(|| {
            PageError::UnsupportedLanguage {
                page,
                requested: languages.to_vec(),
                available: installed.to_vec(),
            }
        })?;

        let mut cmd = self.base_command();
        cmd.args(["stdin", "stdout", "-l", &langs.join("+")])
            .args(["--psm", &self.opts.psm.to_string()]);
        if let Some(oem) = self.opts.oem {
            cmd.args(["--oem", &oem.to_string()]);
        }
        cmd.arg("tsv");

        let out = process::run(cmd, Some(raster.png.clone()))
            .await
            .map_err(|e| fail(e.to_string()))?;

        let tsv = String::from_utf8_lossy(&out.stdout);
        let recognition = parse_tsv(&tsv);
        debug!(
            "Page {}: {} chars, confidence {:.2}",
            page,
            recognition.text.len(),
            recognition.confidence
        );
        Ok(recognition)
    }
}

/// Keep the requested languages that are installed, in request order.
/// `None` when none of them is.
fn select_languages(requested: &[String], installed: &[String]) -> Option<Vec<String>> {
    let (keep, missing): (Vec<_>, Vec<_>) = requested
        .iter()
        .cloned()
        .partition(|l| installed.contains(l));
    if keep.is_empty() {
        return None;
    }
    if !missing.is_empty() {
        warn!("Dropping languages not installed in tesseract: {:?}", missing);
    }
    Some(keep)
}

/// Parse `tesseract --list-langs` output, skipping the header line.
fn parse_list_langs(output: &str) -> Vec<String> {
    let mut langs: Vec<String> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains(' ') && !l.contains(':'))
        .map(str::to_string)
        .collect();
    langs.sort();
    langs.dedup();
    langs
}

/// Rebuild text and mean confidence from a TSV report.
///
/// Words on one line are joined by a space, lines by a newline, and
/// paragraph or block changes by a blank line. A page with no words yields
/// empty text and confidence 0.
fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut conf_sum = 0.0f64;
    let mut words = 0usize;
    let mut last: Option<(u32, u32, u32)> = None;

    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(-1);
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let word = cols[11].trim();
        if level != 5 || word.is_empty() || conf < 0.0 {
            continue;
        }
        let key = (
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );

        match last {
            None => {}
            Some((block, par, _)) if block != key.0 || par != key.1 => text.push_str("\n\n"),
            Some(prev) if prev != key => text.push('\n'),
            Some(_) => text.push(' '),
        }
        text.push_str(word);
        last = Some(key);

        conf_sum += f64::from(conf);
        words += 1;
    }

    if words == 0 {
        return Recognition::new(String::new(), 0.0);
    }
    let mean = conf_sum / words as f64 / 100.0;
    Recognition::new(text, mean as f32)
}

//! Page rasterisation: one source page → one PNG.
//!
//! [`Rasterizer`] is the seam the orchestrator calls through; tests swap in
//! fakes. [`SystemRasterizer`] renders PDF pages with poppler's `pdftoppm`
//! and passes image sources (already PNG, see the loader) straight through.
//!
//! ## Why a child process per page?
//!
//! Rendering a hostile or huge PDF can hang or blow up memory. Running each
//! page in its own `pdftoppm` child keeps that outside our address space
//! and makes the work killable: dropping the render future kills the child
//! and the scoped `TempDir` removes whatever it had written.

use crate::document::{RasterInfo, SourceDocument, SourceKind};
use crate::error::PageError;
use crate::pipeline::{encode, process};
use async_trait::async_trait;
use bytes::Bytes;
use image::ImageFormat;
use std::io::Cursor;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::debug;

/// A rendered page.
#[derive(Debug, Clone)]
pub struct RasterImage {
    /// 0-based source page this raster came from.
    pub source_page: usize,
    pub width: u32,
    pub height: u32,
    /// Render resolution; `None` for image sources.
    pub dpi: Option<u32>,
    pub png: Bytes,
}

impl RasterImage {
    pub fn info(&self) -> RasterInfo {
        RasterInfo {
            width: self.width,
            height: self.height,
            dpi: self.dpi,
        }
    }
}

/// Converts one source page into a raster image.
///
/// Implementations must be deterministic for identical inputs and must
/// release any external resource when the returned future is dropped.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render the 0-based `source_page` of `source` at `dpi`.
    ///
    /// Failures are reported as [`PageError::RenderFailure`].
    async fn render(
        &self,
        source: &SourceDocument,
        source_page: usize,
        dpi: u32,
    ) -> Result<RasterImage, PageError>;
}

/// `pdftoppm` for PDFs, in-process PNG normalisation for images.
#[derive(Debug, Clone)]
pub struct SystemRasterizer {
    pdftoppm: PathBuf,
}

impl SystemRasterizer {
    pub fn new(pdftoppm: impl Into<PathBuf>) -> Self {
        Self {
            pdftoppm: pdftoppm.into(),
        }
    }

    async fn render_pdf_page(
        &self,
        source: &SourceDocument,
        source_page: usize,
        dpi: u32,
    ) -> Result<RasterImage, PageError> {
        let page_num = source_page + 1;
        let fail = |cause: String| PageError::RenderFailure {
            page: page_num,
            cause,
        };

        let pdf_path = source
            .materialize()
            .await
            .map_err(|e| fail(format!("spilling source to disk: {}", e)))?;
        let out_dir = TempDir::new().map_err(|e| fail(format!("temp dir: {}", e)))?;
        let prefix = out_dir.path().join("page");

        let page_arg = page_num.to_string();
        let dpi_arg = dpi.to_string();
        let mut cmd = process::command(&self.pdftoppm);
        cmd.args(["-png", "-r", &dpi_arg, "-f", &page_arg, "-l", &page_arg, "-singlefile"])
            .arg(pdf_path)
            .arg(&prefix);

        process::run(cmd, None)
            .await
            .map_err(|e| fail(e.to_string()))?;

        // -singlefile writes exactly `<prefix>.png`
        let png = tokio::fs::read(prefix.with_extension("png"))
            .await
            .map_err(|e| fail(format!("pdftoppm produced no image: {}", e)))?;

        let (width, height) =
            image::ImageReader::with_format(Cursor::new(&png), ImageFormat::Png)
                .into_dimensions()
                .map_err(|e| fail(format!("pdftoppm output is not a PNG: {}", e)))?;

        debug!("Rendered page {} at {} DPI → {}x{} px", page_num, dpi, width, height);

        Ok(RasterImage {
            source_page,
            width,
            height,
            dpi: Some(dpi),
            png: Bytes::from(png),
        })
        // `out_dir` is removed here and on every early return above.
    }
}

impl Default for SystemRasterizer {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

#[async_trait]
impl Rasterizer for SystemRasterizer {
    async fn render(
        &self,
        source: &SourceDocument,
        source_page: usize,
        dpi: u32,
    ) -> Result<RasterImage, PageError> {
        match source.kind() {
            SourceKind::Pdf => self.render_pdf_page(source, source_page, dpi).await,
            SourceKind::Image(format) => {
                if source_page != 0 {
                    return Err(PageError::RenderFailure {
                        page: source_page + 1,
                        cause: "image sources have a single page".into(),
                    });
                }
                if format != ImageFormat::Png {
                    return Err(PageError::RenderFailure {
                        page: 1,
                        cause: format!("{:?} source was not normalised to PNG at load", format),
                    });
                }
                // Header read only; the loader already decoded under limits.
                let (width, height) =
                    encode::png_dimensions(source.bytes()).map_err(|e| PageError::RenderFailure {
                        page: 1,
                        cause: e.to_string(),
                    })?;
                Ok(RasterImage {
                    source_page: 0,
                    width,
                    height,
                    dpi: None,
                    png: source.bytes().clone(),
                })
            }
        }
    }
}

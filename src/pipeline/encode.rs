//! Image normalisation: any supported input image → PNG bytes.
//!
//! tesseract reads PNG from stdin reliably across builds, while TIFF, WebP
//! and GIF support depends on how leptonica was compiled. Image sources are
//! therefore decoded once and re-encoded as PNG before recognition. PNG
//! input is passed through untouched. PNG is lossless, so nothing is lost
//! for OCR compared with the original pixels.
//!
//! Normalisation happens once, in the loader, before any page work starts:
//! a decode running on a blocking thread cannot be cancelled, so it must
//! never sit under a page timeout.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use std::io::Cursor;
use tracing::debug;

/// A PNG ready for the recogniser.
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub png: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Longest accepted image side in pixels.
pub const MAX_IMAGE_SIDE: u32 = 20_000;

/// Largest buffer a single decode may allocate.
pub const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// Decoder limits applied to every image source.
pub fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    limits
}

/// Normalise `bytes` of the given format to PNG.
///
/// CPU-bound; callers run it inside `spawn_blocking`. Images beyond
/// [`decode_limits`] fail with `ImageError::Limits` before any pixel buffer
/// is allocated.
pub fn normalize_to_png(
    bytes: &Bytes,
    format: ImageFormat,
) -> Result<EncodedPage, image::ImageError> {
    if format == ImageFormat::Png {
        let (width, height) = png_dimensions(bytes)?;
        decode_limits().check_dimensions(width, height)?;
        return Ok(EncodedPage {
            png: bytes.clone(),
            width,
            height,
        });
    }

    let mut reader = ImageReader::with_format(Cursor::new(bytes.as_ref()), format);
    reader.limits(decode_limits());
    let img = reader.decode()?;
    encode_png(&img)
}

/// Width and height from a PNG header. Reads the header only.
pub fn png_dimensions(bytes: &[u8]) -> Result<(u32, u32), image::ImageError> {
    ImageReader::with_format(Cursor::new(bytes), ImageFormat::Png).into_dimensions()
}

/// Encode a decoded image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<EncodedPage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );

    Ok(EncodedPage {
        png: Bytes::from(buf),
        width: img.width(),
        height: img.height(),
    })
}

//! Document loading: sniff the input bytes, count pages, build a [`Document`].
//!
//! The bytes decide the format. A declared content type is only consulted
//! to pick the error when nothing matches: a claimed PDF that does not
//! parse is corrupt, anything else is unsupported.
//!
//! PDF parsing runs in `spawn_blocking` because lopdf builds the whole
//! object table in memory before it can count pages. Image sources are
//! normalised to PNG here, once, so that no page ever waits on an
//! uncancellable decode.

use crate::config::PageSelection;
use crate::document::{Document, DocumentInfo, SourceDocument, SourceKind};
use crate::error::OcrError;
use crate::pipeline::encode;
use bytes::Bytes;
use image::ImageFormat;
use lopdf::Object;
use std::io::Cursor;
use tracing::{debug, info};

/// How far into the input a `%PDF-` header may start.
const PDF_HEADER_WINDOW: usize = 1024;

/// Image formats the recogniser accepts after PNG normalisation.
const SUPPORTED_IMAGES: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Pnm,
];

/// Validate `bytes` and build a [`Document`] holding one pending page per
/// selected source page.
///
/// # Errors
/// `InputTooLarge`, `UnsupportedFormat`, `CorruptDocument`, or
/// `EmptySelection` when `selection` matches none of the source pages.
pub async fn load(
    bytes: Bytes,
    filename: Option<String>,
    declared_content_type: Option<&str>,
    selection: &PageSelection,
    max_bytes: usize,
) -> Result<Document, OcrError> {
    let (kind, info) = describe(bytes.clone(), declared_content_type, max_bytes).await?;

    let indices = selection.to_indices(info.page_count);
    if indices.is_empty() {
        return Err(OcrError::EmptySelection {
            total: info.page_count,
        });
    }

    let (kind, bytes) = normalize_source(kind, bytes).await?;

    info!(
        "Loaded {} ({}): {} of {} pages selected",
        filename.as_deref().unwrap_or("<bytes>"),
        info.content_type,
        indices.len(),
        info.page_count
    );

    Ok(Document::new(
        filename,
        SourceDocument::new(kind, bytes),
        info,
        &indices,
    ))
}

/// Re-encode non-PNG image sources as PNG. PDFs and PNGs pass through.
async fn normalize_source(
    kind: SourceKind,
    bytes: Bytes,
) -> Result<(SourceKind, Bytes), OcrError> {
    let format = match kind {
        SourceKind::Image(format) if format != ImageFormat::Png => format,
        other => return Ok((other, bytes)),
    };

    let page = tokio::task::spawn_blocking(move || encode::normalize_to_png(&bytes, format))
        .await
        .map_err(|e| OcrError::Internal(format!("Normalise task panicked: {}", e)))?
        .map_err(|e| OcrError::CorruptDocument {
            detail: format!("{:?} image does not decode: {}", format, e),
        })?;
    debug!(
        "Normalised {:?} source to {} bytes of PNG",
        format,
        page.png.len()
    );
    Ok((SourceKind::Image(ImageFormat::Png), page.png))
}

/// Describe `bytes` without creating a document.
pub async fn inspect_bytes(
    bytes: Bytes,
    declared_content_type: Option<&str>,
    max_bytes: usize,
) -> Result<DocumentInfo, OcrError> {
    describe(bytes, declared_content_type, max_bytes)
        .await
        .map(|(_, info)| info)
}

async fn describe(
    bytes: Bytes,
    declared_content_type: Option<&str>,
    max_bytes: usize,
) -> Result<(SourceKind, DocumentInfo), OcrError> {
    if bytes.len() > max_bytes {
        return Err(OcrError::InputTooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    let kind = sniff(&bytes, declared_content_type)?;
    debug!("Sniffed input as {}", kind);

    tokio::task::spawn_blocking(move || {
        let info = match kind {
            SourceKind::Pdf => pdf_info(&bytes)?,
            SourceKind::Image(format) => image_info(&bytes, format)?,
        };
        Ok((kind, info))
    })
    .await
    .map_err(|e| OcrError::Internal(format!("Load task panicked: {}", e)))?
}

/// Decide the document kind from magic bytes.
pub fn sniff(bytes: &[u8], declared_content_type: Option<&str>) -> Result<SourceKind, OcrError> {
    let unsupported = || OcrError::UnsupportedFormat {
        declared: declared_content_type.map(str::to_string),
        magic: bytes.iter().take(8).copied().collect(),
    };

    if bytes.is_empty() {
        return Err(unsupported());
    }

    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        return Ok(SourceKind::Pdf);
    }

    match image::guess_format(bytes) {
        Ok(format) if SUPPORTED_IMAGES.contains(&format) => Ok(SourceKind::Image(format)),
        _ if declared_is_pdf(declared_content_type) => Err(OcrError::CorruptDocument {
            detail: "declared as PDF but no %PDF- header found".into(),
        }),
        _ => Err(unsupported()),
    }
}

fn declared_is_pdf(declared: Option<&str>) -> bool {
    declared
        .and_then(|d| d.split(';').next())
        .is_some_and(|d| d.trim().eq_ignore_ascii_case("application/pdf"))
}

fn pdf_info(bytes: &[u8]) -> Result<DocumentInfo, OcrError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| OcrError::CorruptDocument {
        detail: format!("PDF parse failed: {}", e),
    })?;

    let page_count = doc.get_pages().len();
    if page_count == 0 {
        return Err(OcrError::CorruptDocument {
            detail: "PDF has no pages".into(),
        });
    }

    let info_dict = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Ok(Object::Dictionary(d)) => Some(d),
        _ => None,
    };
    let field = |key: &[u8]| -> Option<String> {
        let value = info_dict?.get(key).ok()?;
        match value {
            Object::String(raw, _) => decode_pdf_string(raw),
            _ => None,
        }
    };

    Ok(DocumentInfo {
        kind: "pdf".into(),
        content_type: SourceKind::Pdf.content_type().into(),
        page_count,
        pdf_version: Some(doc.version.clone()),
        title: field(b"Title"),
        author: field(b"Author"),
        subject: field(b"Subject"),
        creator: field(b"Creator"),
        producer: field(b"Producer"),
        width: None,
        height: None,
    })
}

fn image_info(bytes: &[u8], format: ImageFormat) -> Result<DocumentInfo, OcrError> {
    let (width, height) = image::ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .map_err(|e| OcrError::CorruptDocument {
            detail: format!("{:?} header does not decode: {}", format, e),
        })?;
    encode::decode_limits()
        .check_dimensions(width, height)
        .map_err(|e| OcrError::CorruptDocument {
            detail: format!("{}x{} image rejected: {}", width, height, e),
        })?;

    Ok(DocumentInfo {
        kind: "image".into(),
        content_type: format.to_mime_type().into(),
        page_count: 1,
        width: Some(width),
        height: Some(height),
        ..Default::default()
    })
}

/// PDF text strings are UTF-16BE with a BOM or PDFDocEncoding (treated as
/// Latin-1 here). Blank values count as absent.
fn decode_pdf_string(raw: &[u8]) -> Option<String> {
    let s = if let Some(body) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        raw.iter().map(|&b| b as char).collect()
    };
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn pdf_with_pages(n: usize) -> Vec<u8> {
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
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Quarterly scan"),
            "Producer" => Object::string_literal("scanner"),
        });
        doc.trailer.set("Info", info_id);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(w, h, image::Rgb([255, 255, 255]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn sniff_finds_pdf_header_after_junk() {
        let mut bytes = vec![b' '; 100];
        bytes.extend_from_slice(b"%PDF-1.7\n");
        assert_eq!(sniff(&bytes, None).unwrap(), SourceKind::Pdf);
    }

    #[test]
    fn sniff_ignores_declared_type_when_bytes_are_an_image() {
        let png = png_bytes(2, 2);
        assert_eq!(
            sniff(&png, Some("application/pdf")).unwrap(),
            SourceKind::Image(ImageFormat::Png)
        );
    }

    #[test]
    fn sniff_claimed_pdf_without_header_is_corrupt() {
        let err = sniff(b"not a pdf at all", Some("application/pdf; charset=binary")).unwrap_err();
        assert!(matches!(err, OcrError::CorruptDocument { .. }));
    }

    #[test]
    fn sniff_unknown_bytes_are_unsupported() {
        let err = sniff(b"hello world", Some("text/plain")).unwrap_err();
        match err {
            OcrError::UnsupportedFormat { declared, magic } => {
                assert_eq!(declared.as_deref(), Some("text/plain"));
                assert_eq!(magic, b"hello wo");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sniff_empty_input_is_unsupported() {
        assert!(matches!(
            sniff(b"", None),
            Err(OcrError::UnsupportedFormat { .. })
        ));
    }

    #[tokio::test]
    async fn loads_multi_page_pdf_with_info() {
        let bytes = Bytes::from(pdf_with_pages(3));
        let doc = load(bytes, Some("a.pdf".into()), None, &PageSelection::All, usize::MAX)
            .await
            .unwrap();
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.kind(), SourceKind::Pdf);
        assert_eq!(doc.content_type(), "application/pdf");
        assert_eq!(doc.info().title.as_deref(), Some("Quarterly scan"));
        assert_eq!(doc.info().pdf_version.as_deref(), Some("1.5"));
    }

    #[tokio::test]
    async fn page_selection_keeps_source_numbers() {
        let bytes = Bytes::from(pdf_with_pages(5));
        let doc = load(bytes, None, None, &PageSelection::Set(vec![2, 5]), usize::MAX)
            .await
            .unwrap();
        let sources: Vec<_> = doc.pages().iter().map(|p| p.source_page()).collect();
        assert_eq!(sources, vec![1, 4]);
        assert_eq!(doc.info().page_count, 5);
    }

    #[tokio::test]
    async fn selection_outside_document_is_empty() {
        let bytes = Bytes::from(pdf_with_pages(2));
        let err = load(bytes, None, None, &PageSelection::Single(9), usize::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::EmptySelection { total: 2 }));
    }

    #[tokio::test]
    async fn truncated_pdf_is_corrupt() {
        let bytes = Bytes::from_static(b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog");
        let err = load(bytes, None, None, &PageSelection::All, usize::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::CorruptDocument { .. }));
    }

    #[tokio::test]
    async fn image_is_a_single_page() {
        let bytes = Bytes::from(png_bytes(40, 30));
        let doc = load(bytes, Some("scan.png".into()), Some("image/png"), &PageSelection::All, usize::MAX)
            .await
            .unwrap();
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.kind(), SourceKind::Image(ImageFormat::Png));
        assert_eq!(doc.info().width, Some(40));
        assert_eq!(doc.info().height, Some(30));
    }

    #[tokio::test]
    async fn non_png_image_is_normalised_once_at_load() {
        let img = image::RgbImage::from_pixel(24, 12, image::Rgb([0, 0, 0]));
        let mut bmp = Vec::new();
        img.write_to(&mut Cursor::new(&mut bmp), ImageFormat::Bmp)
            .unwrap();

        let doc = load(Bytes::from(bmp), None, None, &PageSelection::All, usize::MAX)
            .await
            .unwrap();
        assert_eq!(doc.content_type(), "image/bmp");
        assert_eq!(doc.kind(), SourceKind::Image(ImageFormat::Png));
        assert_eq!(
            image::guess_format(doc.source().bytes()).unwrap(),
            ImageFormat::Png
        );
    }

    #[tokio::test]
    async fn image_beyond_side_limit_is_rejected() {
        let png = png_bytes(encode::MAX_IMAGE_SIDE + 1, 1);
        let err = load(Bytes::from(png), None, None, &PageSelection::All, usize::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::CorruptDocument { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn truncated_image_header_is_corrupt() {
        let png = png_bytes(4, 4);
        let bytes = Bytes::copy_from_slice(&png[..12]);
        let err = load(bytes, None, None, &PageSelection::All, usize::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::CorruptDocument { .. }));
    }

    #[tokio::test]
    async fn oversized_bytes_are_rejected() {
        let bytes = Bytes::from(png_bytes(4, 4));
        let err = load(bytes, None, None, &PageSelection::All, 8)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::InputTooLarge { limit: 8, .. }));
    }

    #[test]
    fn decodes_utf16_pdf_strings() {
        let raw = [0xFE, 0xFF, 0x00, b'H', 0x00, b'i'];
        assert_eq!(decode_pdf_string(&raw).as_deref(), Some("Hi"));
        assert_eq!(decode_pdf_string(b"  "), None);
    }
}

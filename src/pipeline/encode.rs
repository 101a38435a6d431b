//! Image encoding: `DynamicImage` → JPEG bytes, plus capture sniffing.
//!
//! Every stored asset is a JPEG at one fixed quality. JPEG is lossy but
//! faces and signatures are photographic content, and a 92 quality factor
//! keeps both legible at a fraction of PNG's size. A document capture that
//! already arrives as JPEG is stored byte-for-byte; anything else is
//! re-encoded.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

/// Recognised capture formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Jpeg,
    Png,
}

impl CaptureFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            CaptureFormat::Jpeg => "image/jpeg",
            CaptureFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            CaptureFormat::Jpeg => "jpg",
            CaptureFormat::Png => "png",
        }
    }
}

/// Identify the capture format from its leading bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<CaptureFormat> {
    if bytes.starts_with(JPEG_MAGIC) {
        Some(CaptureFormat::Jpeg)
    } else if bytes.starts_with(PNG_MAGIC) {
        Some(CaptureFormat::Png)
    } else {
        None
    }
}

/// Encode an image as JPEG at `quality` (1–100).
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
    debug!(
        "Encoded {}x{} image → {} bytes JPEG (q={})",
        rgb.width(),
        rgb.height(),
        buf.len(),
        quality
    );
    Ok(buf)
}

/// Bytes to store for the document scan.
///
/// JPEG captures pass through untouched. Other formats are re-encoded from
/// the decoded image when one is available; without it the original bytes
/// are stored as-is.
pub fn document_scan_bytes(
    original: &[u8],
    decoded: Option<&DynamicImage>,
    quality: u8,
) -> Vec<u8> {
    if sniff_format(original) == Some(CaptureFormat::Jpeg) {
        return original.to_vec();
    }
    match decoded.map(|img| encode_jpeg(img, quality)) {
        Some(Ok(jpeg)) => jpeg,
        _ => original.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let data = encode_jpeg(&red(10, 10), 92).expect("encode should succeed");
        assert_eq!(sniff_format(&data), Some(CaptureFormat::Jpeg));
        let decoded = image::load_from_memory(&data).expect("valid jpeg");
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
    }

    #[test]
    fn sniffing() {
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(CaptureFormat::Jpeg));
        assert_eq!(sniff_format(b"\x89PNG\r\n\x1a\n"), Some(CaptureFormat::Png));
        assert_eq!(sniff_format(b"%PDF-1.7"), None);
        assert_eq!(sniff_format(&[]), None);
    }

    #[test]
    fn jpeg_document_passes_through() {
        let jpeg = encode_jpeg(&red(4, 4), 80).unwrap();
        assert_eq!(document_scan_bytes(&jpeg, None, 92), jpeg);
    }

    #[test]
    fn png_document_is_reencoded() {
        let img = red(6, 6);
        let mut png = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let out = document_scan_bytes(&png, Some(&img), 92);
        assert_eq!(sniff_format(&out), Some(CaptureFormat::Jpeg));
        assert_eq!(document_scan_bytes(&png, None, 92), png);
    }
}

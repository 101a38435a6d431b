//! Raster cropping: cut the face and signature out of the document scan.
//!
//! ## Why spawn_blocking?
//!
//! Decoding a multi-megapixel capture and JPEG-encoding the crops is CPU
//! work measured in tens of milliseconds. [`crop_regions`] runs it on the
//! blocking pool so the Tokio workers stay free for network I/O.
//!
//! ## Padding
//!
//! The box from [`compute_bounding_box`] is grown by `padding` pixels on
//! every side and clamped to the image. Near an edge the padding is simply
//! truncated: a box at `x = 0` keeps `x = 0` and gains padding only on the
//! right. A flat polygon inside the image (all points on one line) still
//! gains padding and becomes a thin strip; only a polygon lying beyond an
//! image edge is rejected as empty.

use crate::error::{CropError, IngestError};
use crate::pipeline::encode::encode_jpeg;
use crate::pipeline::geometry::{
    compute_bounding_box, lies_outside_image, BoundingBox, GeometricRegion, RegionKind,
};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Integer pixel rectangle, always inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Grow `bbox` by `padding` on each side and clamp it to the image.
///
/// Fractional edges are widened outward (floor on the near edge, ceil on the
/// far edge) so no polygon pixel is lost to rounding.
pub fn pad_and_clamp(bbox: &BoundingBox, padding: u32, image_width: u32, image_height: u32) -> PixelRect {
    let pad = f64::from(padding);
    let (w, h) = (f64::from(image_width), f64::from(image_height));

    let x0 = (bbox.x - pad).max(0.0).floor().min(w);
    let y0 = (bbox.y - pad).max(0.0).floor().min(h);
    let x1 = (bbox.x + bbox.width + pad).min(w).ceil().min(w).max(x0);
    let y1 = (bbox.y + bbox.height + pad).min(h).ceil().min(h).max(y0);

    PixelRect {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    }
}

/// Crop one region from a decoded image and encode it as JPEG.
pub fn crop(
    source: &DynamicImage,
    region: &GeometricRegion,
    padding: u32,
    quality: u8,
) -> Result<Vec<u8>, CropError> {
    let (w, h) = (source.width(), source.height());
    let bbox = compute_bounding_box(&region.polygon, w, h)?;
    // Padding must not turn an off-image polygon into a strip along the edge.
    if lies_outside_image(&region.polygon) {
        return Err(CropError::EmptyRegion {
            width: bbox.width as u32,
            height: bbox.height as u32,
        });
    }
    let rect = pad_and_clamp(&bbox, padding, w, h);
    if rect.width == 0 || rect.height == 0 {
        return Err(CropError::EmptyRegion {
            width: rect.width,
            height: rect.height,
        });
    }

    let cropped = source.crop_imm(rect.x, rect.y, rect.width, rect.height);
    debug!(
        "Cropped {} region {}x{} at ({}, {}) from {}x{}",
        region.kind, rect.width, rect.height, rect.x, rect.y, w, h
    );
    encode_jpeg(&cropped, quality).map_err(|e| CropError::Encode(e.to_string()))
}

/// Decode encoded image bytes.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, CropError> {
    image::load_from_memory(bytes).map_err(|e| CropError::Decode(e.to_string()))
}

/// Decode `bytes` and crop it, in one call.
pub fn crop_bytes(
    bytes: &[u8],
    region: &GeometricRegion,
    padding: u32,
    quality: u8,
) -> Result<Vec<u8>, CropError> {
    crop(&decode(bytes)?, region, padding, quality)
}

/// One crop request for [`crop_regions`].
#[derive(Debug, Clone)]
pub struct CropJob {
    pub kind: RegionKind,
    /// `None` when the prediction held no polygon for this kind.
    pub region: Option<GeometricRegion>,
    pub padding: u32,
}

/// Everything the cropping stage produced.
pub struct CropOutcome {
    /// The decoded source, reused to re-encode non-JPEG document scans.
    pub decoded: Option<DynamicImage>,
    pub results: Vec<(RegionKind, Result<Vec<u8>, CropError>)>,
}

/// Decode the document once and run every crop job, off the async workers.
///
/// A decode failure fails every job with the same [`CropError::Decode`];
/// it is never fatal to the run.
pub async fn crop_regions(
    document: &[u8],
    jobs: Vec<CropJob>,
    quality: u8,
) -> Result<CropOutcome, IngestError> {
    let bytes = document.to_vec();
    tokio::task::spawn_blocking(move || {
        let decoded = decode(&bytes);
        let results = jobs
            .into_iter()
            .map(|job| {
                let result = match (&decoded, job.region) {
                    (Err(e), _) => Err(CropError::Decode(decode_detail(e))),
                    (Ok(_), None) => Err(CropError::RegionMissing(job.kind)),
                    (Ok(img), Some(region)) => crop(img, &region, job.padding, quality),
                };
                (job.kind, result)
            })
            .collect();
        CropOutcome {
            decoded: decoded.ok(),
            results,
        }
    })
    .await
    .map_err(|e| IngestError::Internal(format!("Crop task panicked: {}", e)))
}

fn decode_detail(e: &CropError) -> String {
    match e {
        CropError::Decode(detail) => detail.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::geometry::NormalizedPoint;
    use image::{GenericImageView, Rgb, RgbImage};

    fn bbox(x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox { x, y, width, height }
    }

    #[test]
    fn padding_inside_image() {
        let r = pad_and_clamp(&bbox(50.0, 50.0, 100.0, 100.0), 10, 1000, 1000);
        assert_eq!(
            r,
            PixelRect {
                x: 40,
                y: 40,
                width: 120,
                height: 120
            }
        );
    }

    #[test]
    fn padding_truncated_at_left_edge() {
        let r = pad_and_clamp(&bbox(0.0, 50.0, 100.0, 100.0), 10, 1000, 1000);
        assert_eq!(r.x, 0);
        assert_eq!(r.width, 110);
        assert_eq!(r.y, 40);
        assert_eq!(r.height, 120);
    }

    #[test]
    fn padding_truncated_at_far_edges() {
        let r = pad_and_clamp(&bbox(900.0, 700.0, 100.0, 100.0), 10, 1000, 800);
        assert_eq!(r, PixelRect { x: 890, y: 690, width: 110, height: 110 });
    }

    #[test]
    fn fractional_box_widens_outward() {
        let r = pad_and_clamp(&bbox(10.4, 10.6, 5.2, 5.2), 0, 100, 100);
        assert_eq!(r, PixelRect { x: 10, y: 10, width: 6, height: 6 });
    }

    #[test]
    fn rect_never_leaves_image() {
        for x in [0.0, 1.0, 499.0, 999.0, 1000.0] {
            for pad in [0, 5, 10, 2000] {
                let r = pad_and_clamp(&bbox(x, x / 2.0, 30.0, 30.0), pad, 1000, 600);
                assert!(r.x + r.width <= 1000);
                assert!(r.y + r.height <= 600);
            }
        }
    }

    fn quadrants() -> DynamicImage {
        // Left half red, right half blue.
        let img = RgbImage::from_fn(200, 100, |x, _| {
            if x < 100 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        DynamicImage::ImageRgb8(img)
    }

    fn region(kind: RegionKind, x0: f64, y0: f64, x1: f64, y1: f64) -> GeometricRegion {
        GeometricRegion {
            kind,
            polygon: vec![
                NormalizedPoint::new(x0, y0),
                NormalizedPoint::new(x1, y0),
                NormalizedPoint::new(x1, y1),
                NormalizedPoint::new(x0, y1),
            ],
        }
    }

    #[test]
    fn crop_produces_padded_jpeg() {
        let face = region(RegionKind::Face, 0.1, 0.2, 0.3, 0.6);
        let jpeg = crop(&quadrants(), &face, 10, 92).unwrap();
        let out = image::load_from_memory(&jpeg).unwrap();
        // box 20..60 x 20..60 grown by 10 → 10..70 x 10..70
        assert_eq!(out.dimensions(), (60, 60));
        let px = out.to_rgb8().get_pixel(30, 30).0;
        assert!(px[0] > 200 && px[2] < 60, "expected red, got {px:?}");
    }

    #[test]
    fn zero_area_region_fails() {
        let outside = region(RegionKind::Signature, 1.2, 1.2, 1.4, 1.4);
        for padding in [0, 5, 10] {
            assert!(matches!(
                crop(&quadrants(), &outside, padding, 92),
                Err(CropError::EmptyRegion { .. })
            ));
        }
    }

    #[test]
    fn flat_polygon_inside_image_is_padded() {
        let line = GeometricRegion {
            kind: RegionKind::Signature,
            polygon: vec![
                NormalizedPoint::new(0.5, 0.2),
                NormalizedPoint::new(0.5, 0.4),
                NormalizedPoint::new(0.5, 0.6),
            ],
        };
        let jpeg = crop(&quadrants(), &line, 5, 92).unwrap();
        let out = image::load_from_memory(&jpeg).unwrap();
        // x 100 grown by 5 → 95..105, y 20..60 grown by 5 → 15..65
        assert_eq!(out.dimensions(), (10, 50));
    }

    #[test]
    fn flat_polygon_without_padding_is_empty() {
        let line = region(RegionKind::Signature, 0.5, 0.2, 0.5, 0.6);
        assert!(matches!(
            crop(&quadrants(), &line, 0, 92),
            Err(CropError::EmptyRegion { width: 0, .. })
        ));
    }

    #[test]
    fn undecodable_bytes_fail() {
        let face = region(RegionKind::Face, 0.1, 0.1, 0.2, 0.2);
        assert!(matches!(
            crop_bytes(b"not an image", &face, 10, 92),
            Err(CropError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn crop_regions_reports_each_job() {
        let jpeg = encode_jpeg(&quadrants(), 95).unwrap();
        let jobs = vec![
            CropJob {
                kind: RegionKind::Face,
                region: Some(region(RegionKind::Face, 0.6, 0.1, 0.9, 0.9)),
                padding: 10,
            },
            CropJob {
                kind: RegionKind::Signature,
                region: None,
                padding: 5,
            },
        ];
        let outcome = crop_regions(&jpeg, jobs, 92).await.unwrap();
        assert!(outcome.decoded.is_some());
        assert!(outcome.results[0].1.is_ok());
        assert!(matches!(
            outcome.results[1].1,
            Err(CropError::RegionMissing(RegionKind::Signature))
        ));
    }

    #[tokio::test]
    async fn crop_regions_decode_failure_is_per_job() {
        let jobs = vec![CropJob {
            kind: RegionKind::Face,
            region: Some(region(RegionKind::Face, 0.1, 0.1, 0.2, 0.2)),
            padding: 10,
        }];
        let outcome = crop_regions(b"\xFF\xD8\xFFgarbage", jobs, 92).await.unwrap();
        assert!(outcome.decoded.is_none());
        assert!(matches!(outcome.results[0].1, Err(CropError::Decode(_))));
    }
}

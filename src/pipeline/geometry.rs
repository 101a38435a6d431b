//! Polygon geometry: normalised provider polygons → pixel bounding boxes.
//!
//! Providers report detected regions as polygons whose coordinates are
//! fractions (0–1) of the document image's width and height. Everything in
//! this module is pure arithmetic over those points; no pixel data is touched,
//! so every clamping edge case is testable without an image.

use crate::error::GeometryError;
use crate::pipeline::extract::ProviderPrediction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field names a provider may use for the holder's portrait, in lookup order.
pub const FACE_ALIASES: &[&str] = &[
    "picture_of_a_person",
    "face",
    "photo",
    "portrait",
    "holder_photo",
];

/// Substrings that mark any other key as a portrait field.
const FACE_KEY_HINTS: &[&str] = &["photo", "face", "picture"];

/// Field names a provider may use for the holder's signature, in lookup order.
pub const SIGNATURE_ALIASES: &[&str] = &["signature", "holder_signature", "sig"];

/// Minimum number of points for a polygon to describe a region.
pub const MIN_REGION_POINTS: usize = 3;

/// What a region outlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    Face,
    Signature,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Face => f.write_str("face"),
            RegionKind::Signature => f.write_str("signature"),
        }
    }
}

/// A polygon vertex in normalised document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Accepts `{"x": .., "y": ..}` objects and `[x, y]` pairs.
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::new(map.get("x")?.as_f64()?, map.get("y")?.as_f64()?)),
            Value::Array(pair) if pair.len() == 2 => {
                Some(Self::new(pair[0].as_f64()?, pair[1].as_f64()?))
            }
            _ => None,
        }
    }
}

/// A detected region of the document image.
///
/// Points are relative to the image sent for extraction, never to a crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometricRegion {
    pub kind: RegionKind,
    pub polygon: Vec<NormalizedPoint>,
}

/// Axis-aligned box in pixel units. Components are fractional until rasterised.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Compute the pixel bounding box of a normalised polygon, clamped to the image.
///
/// Each point is scaled by the image dimensions; the box spans the min/max of
/// the scaled points with both edges held inside `[0, width] × [0, height]`.
/// A polygon lying wholly outside the image collapses to a zero-area box on
/// the nearest edge.
pub fn compute_bounding_box(
    polygon: &[NormalizedPoint],
    image_width: u32,
    image_height: u32,
) -> Result<BoundingBox, GeometryError> {
    if polygon.is_empty() {
        return Err(GeometryError::InvalidGeometry("polygon has no points".into()));
    }
    if polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(GeometryError::InvalidGeometry(
            "polygon has a non-finite coordinate".into(),
        ));
    }

    let w = f64::from(image_width);
    let h = f64::from(image_height);

    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in polygon {
        let (x, y) = (p.x * w, p.y * h);
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    let min_x = min_x.clamp(0.0, w);
    let max_x = max_x.clamp(0.0, w);
    let min_y = min_y.clamp(0.0, h);
    let max_y = max_y.clamp(0.0, h);

    Ok(BoundingBox {
        x: min_x,
        y: min_y,
        width: (max_x - min_x).max(0.0),
        height: (max_y - min_y).max(0.0),
    })
}

/// True when every point sits beyond the same image edge, so clamping
/// collapses the polygon onto that edge.
pub fn lies_outside_image(polygon: &[NormalizedPoint]) -> bool {
    !polygon.is_empty()
        && (polygon.iter().all(|p| p.x < 0.0)
            || polygon.iter().all(|p| p.x > 1.0)
            || polygon.iter().all(|p| p.y < 0.0)
            || polygon.iter().all(|p| p.y > 1.0))
}

/// Locate the polygon for `kind` in a provider prediction.
///
/// Known aliases are tried first, in order. For faces, any other key whose
/// name mentions a photo, face or picture is then considered, in key order.
/// A candidate needs at least [`MIN_REGION_POINTS`] parseable points.
pub fn find_region(prediction: &ProviderPrediction, kind: RegionKind) -> Option<GeometricRegion> {
    let aliases = match kind {
        RegionKind::Face => FACE_ALIASES,
        RegionKind::Signature => SIGNATURE_ALIASES,
    };

    let by_alias = aliases
        .iter()
        .find_map(|name| prediction.get(name).and_then(polygon_of));

    let polygon = match (by_alias, kind) {
        (Some(p), _) => Some(p),
        (None, RegionKind::Face) => prediction.iter().find_map(|(key, value)| {
            let key = key.to_lowercase();
            if FACE_KEY_HINTS.iter().any(|hint| key.contains(hint)) {
                polygon_of(value)
            } else {
                None
            }
        }),
        (None, RegionKind::Signature) => None,
    }?;

    Some(GeometricRegion { kind, polygon })
}

fn polygon_of(field: &Value) -> Option<Vec<NormalizedPoint>> {
    let points = field.get("polygon")?.as_array()?;
    let polygon: Option<Vec<_>> = points.iter().map(NormalizedPoint::from_json).collect();
    polygon.filter(|p| p.len() >= MIN_REGION_POINTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<NormalizedPoint> {
        vec![
            NormalizedPoint::new(x0, y0),
            NormalizedPoint::new(x1, y0),
            NormalizedPoint::new(x1, y1),
            NormalizedPoint::new(x0, y1),
        ]
    }

    #[test]
    fn unit_square_covers_whole_image() {
        let bbox = compute_bounding_box(&square(0.0, 0.0, 1.0, 1.0), 1000, 800).unwrap();
        assert_eq!(
            bbox,
            BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 1000.0,
                height: 800.0
            }
        );
    }

    #[test]
    fn scales_normalised_points() {
        let bbox = compute_bounding_box(&square(0.1, 0.25, 0.3, 0.5), 1000, 800).unwrap();
        assert!((bbox.x - 100.0).abs() < 1e-9);
        assert!((bbox.y - 200.0).abs() < 1e-9);
        assert!((bbox.width - 200.0).abs() < 1e-9);
        assert!((bbox.height - 200.0).abs() < 1e-9);
    }

    #[test]
    fn empty_polygon_is_invalid() {
        assert!(matches!(
            compute_bounding_box(&[], 100, 100),
            Err(GeometryError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn non_finite_point_is_invalid() {
        let poly = vec![NormalizedPoint::new(f64::NAN, 0.2)];
        assert!(compute_bounding_box(&poly, 100, 100).is_err());
    }

    #[test]
    fn single_point_is_degenerate_box() {
        let bbox = compute_bounding_box(&[NormalizedPoint::new(0.5, 0.5)], 200, 100).unwrap();
        assert_eq!(bbox.x, 100.0);
        assert_eq!(bbox.y, 50.0);
        assert_eq!(bbox.width, 0.0);
        assert_eq!(bbox.height, 0.0);
    }

    #[test]
    fn polygon_exceeding_bounds_is_clamped() {
        let bbox = compute_bounding_box(&square(-0.2, -0.1, 1.3, 1.5), 640, 480).unwrap();
        assert_eq!(bbox.x, 0.0);
        assert_eq!(bbox.y, 0.0);
        assert_eq!(bbox.width, 640.0);
        assert_eq!(bbox.height, 480.0);
    }

    #[test]
    fn polygon_outside_bounds_is_zero_area() {
        let bbox = compute_bounding_box(&square(1.2, 1.1, 1.5, 1.4), 640, 480).unwrap();
        assert_eq!(bbox.width, 0.0);
        assert_eq!(bbox.height, 0.0);
        assert!(bbox.x + bbox.width <= 640.0);
        assert!(bbox.y + bbox.height <= 480.0);
    }

    #[test]
    fn outside_detection_needs_every_point_past_one_edge() {
        assert!(lies_outside_image(&square(1.2, 0.1, 1.5, 0.4)));
        assert!(lies_outside_image(&square(0.1, -0.4, 0.3, -0.1)));
        assert!(!lies_outside_image(&square(0.8, 0.1, 1.5, 0.4)));
        assert!(!lies_outside_image(&[
            NormalizedPoint::new(0.5, 0.2),
            NormalizedPoint::new(0.5, 0.6),
        ]));
        assert!(!lies_outside_image(&[]));
    }

    #[test]
    fn box_always_inside_image_for_unit_coordinates() {
        let steps = [0.0, 0.13, 0.5, 0.77, 1.0];
        for &x0 in &steps {
            for &y0 in &steps {
                for &x1 in &steps {
                    for &y1 in &steps {
                        let poly = vec![
                            NormalizedPoint::new(x0, y0),
                            NormalizedPoint::new(x1, y1),
                            NormalizedPoint::new(x1, y0),
                        ];
                        let b = compute_bounding_box(&poly, 1280, 720).unwrap();
                        assert!(b.x >= 0.0 && b.y >= 0.0);
                        assert!(b.x + b.width <= 1280.0 + 1e-9);
                        assert!(b.y + b.height <= 720.0 + 1e-9);
                    }
                }
            }
        }
    }

    fn prediction(value: serde_json::Value) -> ProviderPrediction {
        ProviderPrediction::from_value(value).expect("object prediction")
    }

    #[test]
    fn finds_face_by_alias_in_order() {
        let p = prediction(json!({
            "photo": { "polygon": [[0.5, 0.5], [0.6, 0.5], [0.6, 0.6]] },
            "picture_of_a_person": { "polygon": [
                {"x": 0.1, "y": 0.2}, {"x": 0.3, "y": 0.2}, {"x": 0.3, "y": 0.5}
            ]}
        }));
        let region = find_region(&p, RegionKind::Face).unwrap();
        assert_eq!(region.kind, RegionKind::Face);
        assert_eq!(region.polygon[0], NormalizedPoint::new(0.1, 0.2));
    }

    #[test]
    fn face_falls_back_to_hinted_key() {
        let p = prediction(json!({
            "holder_face_image": { "polygon": [[0.1, 0.1], [0.2, 0.1], [0.2, 0.2]] }
        }));
        assert!(find_region(&p, RegionKind::Face).is_some());
    }

    #[test]
    fn signature_has_no_hint_fallback() {
        let p = prediction(json!({
            "signature_block": { "polygon": [[0.1, 0.1], [0.2, 0.1], [0.2, 0.2]] }
        }));
        assert!(find_region(&p, RegionKind::Signature).is_none());
    }

    #[test]
    fn short_polygon_is_skipped() {
        let p = prediction(json!({
            "face": { "polygon": [[0.1, 0.1], [0.2, 0.2]] },
            "portrait": { "polygon": [[0.1, 0.1], [0.2, 0.1], [0.2, 0.2]] }
        }));
        let region = find_region(&p, RegionKind::Face).unwrap();
        assert_eq!(region.polygon.len(), 3);
    }

    #[test]
    fn missing_polygon_yields_none() {
        let p = prediction(json!({ "signature": { "value": null, "polygon": [] } }));
        assert!(find_region(&p, RegionKind::Signature).is_none());
    }
}

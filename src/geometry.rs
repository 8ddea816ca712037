//! Bounding-box normalization and rectangle intersection.
//!
//! All functions here are pure. Boxes arrive from detectors in centre/width/height
//! form, either in absolute pixels or normalized to the frame; `normalize` turns
//! them into absolute corner rectangles that the grid classifier can intersect.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Coordinate space a detector reports boxes in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
    #[default]
    AbsolutePixels,
    Normalized,
}

/// Axis-aligned rectangle in absolute pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Area, or zero for an empty or inverted rectangle.
    pub fn area(&self) -> f64 {
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return 0.0;
        }
        self.width() * self.height()
    }
}

/// Detector output box: centre point plus extent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CenterBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub space: CoordinateSpace,
}

impl CenterBox {
    pub fn normalized(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            space: CoordinateSpace::Normalized,
        }
    }

    pub fn pixels(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            space: CoordinateSpace::AbsolutePixels,
        }
    }

    /// Re-express this box relative to the frame (`[0, 1]` on both axes).
    pub fn to_normalized(&self, frame_width: u32, frame_height: u32) -> CenterBox {
        match self.space {
            CoordinateSpace::Normalized => *self,
            CoordinateSpace::AbsolutePixels => {
                let w = f64::from(frame_width.max(1));
                let h = f64::from(frame_height.max(1));
                CenterBox::normalized(self.x / w, self.y / h, self.width / w, self.height / h)
            }
        }
    }
}

/// Corner-form box. After `normalize` the space is always `AbsolutePixels`
/// and `x1 < x2`, `y1 < y2` hold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub space: CoordinateSpace,
}

impl BoundingBox {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x1, self.y1, self.x2, self.y2)
    }
}

/// Convert a centre/width/height box to absolute corner coordinates.
///
/// Fails with `InvalidBox` when the result is empty, inverted, or not finite.
/// Boxes that fall partly or wholly outside the frame are kept; clipping is
/// implicit in the intersection with grid cells.
pub fn normalize(bbox: &CenterBox, frame_width: u32, frame_height: u32) -> Result<BoundingBox> {
    let (scale_x, scale_y) = match bbox.space {
        CoordinateSpace::Normalized => (f64::from(frame_width), f64::from(frame_height)),
        CoordinateSpace::AbsolutePixels => (1.0, 1.0),
    };
    let x1 = (bbox.x - bbox.width / 2.0) * scale_x;
    let y1 = (bbox.y - bbox.height / 2.0) * scale_y;
    let x2 = (bbox.x + bbox.width / 2.0) * scale_x;
    let y2 = (bbox.y + bbox.height / 2.0) * scale_y;

    if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
        return Err(PipelineError::invalid_box(format!(
            "non-finite coordinates ({x1}, {y1}, {x2}, {y2})"
        )));
    }
    if x1 >= x2 || y1 >= y2 {
        return Err(PipelineError::invalid_box(format!(
            "degenerate box ({x1:.2}, {y1:.2}, {x2:.2}, {y2:.2})"
        )));
    }

    Ok(BoundingBox {
        x1,
        y1,
        x2,
        y2,
        space: CoordinateSpace::AbsolutePixels,
    })
}

/// Area of the overlap between two rectangles; zero when they only touch or are disjoint.
pub fn intersection_area(a: &Rect, b: &Rect) -> f64 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    if ix1 >= ix2 || iy1 >= iy2 {
        return 0.0;
    }
    (ix2 - ix1) * (iy2 - iy1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_scales_normalized_boxes() {
        let bbox = CenterBox::normalized(0.5, 0.5, 0.5, 0.5);
        let out = normalize(&bbox, 1920, 1080).unwrap();
        assert_eq!(out.x1, 480.0);
        assert_eq!(out.y1, 270.0);
        assert_eq!(out.x2, 1440.0);
        assert_eq!(out.y2, 810.0);
        assert_eq!(out.space, CoordinateSpace::AbsolutePixels);
    }

    #[test]
    fn normalize_keeps_pixel_boxes_unscaled() {
        let bbox = CenterBox::pixels(100.0, 50.0, 40.0, 20.0);
        let out = normalize(&bbox, 640, 480).unwrap();
        assert_eq!(out.rect(), Rect::new(80.0, 40.0, 120.0, 60.0));
    }

    #[test]
    fn normalize_rejects_degenerate_boxes() {
        let zero_width = CenterBox::normalized(0.5, 0.5, 0.0, 0.2);
        assert!(matches!(
            normalize(&zero_width, 640, 480),
            Err(PipelineError::InvalidBox(_))
        ));

        let negative = CenterBox::pixels(10.0, 10.0, 5.0, -3.0);
        assert!(normalize(&negative, 640, 480).is_err());

        let nan = CenterBox::pixels(f64::NAN, 10.0, 5.0, 5.0);
        assert!(normalize(&nan, 640, 480).is_err());
    }

    #[test]
    fn self_intersection_is_full_area() {
        let r = Rect::new(10.0, 20.0, 110.0, 70.0);
        assert_eq!(intersection_area(&r, &r), r.area());
        assert_eq!(r.area(), 5000.0);
    }

    #[test]
    fn disjoint_and_touching_rects_do_not_intersect() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let far = Rect::new(50.0, 50.0, 60.0, 60.0);
        let touching = Rect::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(intersection_area(&a, &far), 0.0);
        assert_eq!(intersection_area(&a, &touching), 0.0);
    }

    #[test]
    fn partial_overlap_is_symmetric() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 6.0, 15.0, 20.0);
        assert_eq!(intersection_area(&a, &b), 20.0);
        assert_eq!(intersection_area(&b, &a), 20.0);
    }

    #[test]
    fn to_normalized_round_trips_pixel_boxes() {
        let bbox = CenterBox::pixels(320.0, 240.0, 64.0, 48.0);
        let n = bbox.to_normalized(640, 480);
        assert_eq!(n, CenterBox::normalized(0.5, 0.5, 0.1, 0.1));
    }
}

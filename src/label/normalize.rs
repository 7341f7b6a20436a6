//! Pixel boxes to normalized center/size boxes.

use crate::detect::{PixelBox, RawDetection};

/// Slack allowed on the `cx ± w/2` edge check.
pub const EDGE_EPSILON: f32 = 1e-4;

/// A detection in normalized `cx cy w h` form, all in `(0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizedDetection {
    pub class_id: u32,
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl NormalizedDetection {
    /// `0 < cx, cy, w, h <= 1` and the box stays inside the unit square up to
    /// [`EDGE_EPSILON`].
    pub fn is_within_bounds(&self) -> bool {
        let unit = |v: f32| v > 0.0 && v <= 1.0;
        unit(self.cx)
            && unit(self.cy)
            && unit(self.w)
            && unit(self.h)
            && self.cx - self.w / 2.0 >= -EDGE_EPSILON
            && self.cx + self.w / 2.0 <= 1.0 + EDGE_EPSILON
            && self.cy - self.h / 2.0 >= -EDGE_EPSILON
            && self.cy + self.h / 2.0 <= 1.0 + EDGE_EPSILON
    }
}

/// Normalize a pixel-space detection against a `width` x `height` frame.
///
/// The box is first clipped to the frame, which absorbs detector boxes that
/// spill past the edges. Returns `None` when nothing of the box is left
/// inside the frame.
pub fn normalize(det: &RawDetection, width: u32, height: u32) -> Option<NormalizedDetection> {
    if width == 0 || height == 0 {
        return None;
    }
    let (fw, fh) = (width as f32, height as f32);
    let clipped = PixelBox::new(
        det.bbox.x_min.clamp(0.0, fw),
        det.bbox.y_min.clamp(0.0, fh),
        det.bbox.x_max.clamp(0.0, fw),
        det.bbox.y_max.clamp(0.0, fh),
    );

    let w = (clipped.width() / fw).clamp(0.0, 1.0);
    let h = (clipped.height() / fh).clamp(0.0, 1.0);
    if w <= f32::EPSILON || h <= f32::EPSILON {
        return None;
    }
    let cx = ((clipped.x_min + clipped.x_max) / 2.0 / fw).clamp(0.0, 1.0);
    let cy = ((clipped.y_min + clipped.y_max) / 2.0 / fh).clamp(0.0, 1.0);

    Some(NormalizedDetection {
        class_id: det.class_id,
        cx,
        cy,
        w,
        h,
    })
}

/// Apply the confidence threshold and normalize what is left, keeping the
/// detector's order.
pub fn normalize_all(
    detections: &[RawDetection],
    width: u32,
    height: u32,
    threshold: f32,
) -> Vec<NormalizedDetection> {
    detections
        .iter()
        .filter(|det| det.confidence >= threshold)
        .filter_map(|det| {
            let normalized = normalize(det, width, height);
            if normalized.is_none() {
                log::debug!(
                    "dropping class {} box outside {}x{} frame",
                    det.class_id,
                    width,
                    height
                );
            }
            normalized
        })
        .collect()
}

use crate::error::AdapterError;

/// Axis-aligned box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl PixelBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union. Zero for disjoint boxes.
    pub fn iou(&self, other: &PixelBox) -> f32 {
        let x1 = self.x_min.max(other.x_min);
        let y1 = self.y_min.max(other.y_min);
        let x2 = self.x_max.min(other.x_max);
        let y2 = self.y_max.min(other.y_max);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One detection as reported by a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub bbox: PixelBox,
}

impl RawDetection {
    pub fn new(class_id: u32, confidence: f32, bbox: PixelBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }

    /// Check the backend contract: confidence in `[0, 1]`, finite
    /// coordinates, positive extent on both axes.
    pub fn validate(&self) -> Result<(), AdapterError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AdapterError::InvalidOutput(format!(
                "class {} confidence {} outside [0, 1]",
                self.class_id, self.confidence
            )));
        }
        let b = &self.bbox;
        if ![b.x_min, b.y_min, b.x_max, b.y_max]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(AdapterError::InvalidOutput(format!(
                "class {} box has non-finite coordinates",
                self.class_id
            )));
        }
        if b.x_max <= b.x_min || b.y_max <= b.y_min {
            return Err(AdapterError::InvalidOutput(format!(
                "class {} box ({}, {}, {}, {}) has no extent",
                self.class_id, b.x_min, b.y_min, b.x_max, b.y_max
            )));
        }
        Ok(())
    }
}

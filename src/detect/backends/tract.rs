#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{PixelBox, RawDetection};
use crate::error::AdapterError;
use crate::frame::PixelBuffer;

/// Network input edge used by the darknet YOLO configs this tool was first
/// pointed at.
pub const DEFAULT_INPUT_SIZE: u32 = 416;
const NMS_IOU: f32 = 0.45;
// Floor applied before NMS; the pipeline's confidence threshold comes after.
const MIN_SCORE: f32 = 0.05;

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// Accepts either output layout:
/// - `[1, N, 5 + classes]` rows of `cx, cy, w, h, objectness, scores..`
/// - `[1, 4 + classes, N]` columns of `cx, cy, w, h, scores..` (no objectness)
///
/// Box coordinates are expected in model-input pixels and are scaled back
/// to the source frame. Class-aware NMS is applied before returning.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, frame: &PixelBuffer) -> Tensor {
        let resized = imageops::resize(frame.image(), self.width, self.height, FilterType::Triangle);
        let width = self.width as usize;
        let pixels = resized.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &PixelBuffer) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected output shape {:?}", shape));
        }

        let rows_major = shape[1] > shape[2];
        let (count, attrs) = if rows_major {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        let class_offset = if rows_major { 5 } else { 4 };
        if attrs <= class_offset {
            return Err(anyhow!("output shape {:?} carries no class scores", shape));
        }
        let at = |det: usize, attr: usize| -> f32 {
            if rows_major {
                view[&[0, det, attr][..]]
            } else {
                view[&[0, attr, det][..]]
            }
        };

        let sx = frame.width() as f32 / self.width as f32;
        let sy = frame.height() as f32 / self.height as f32;
        let mut candidates = Vec::new();
        for det in 0..count {
            let objectness = if rows_major { at(det, 4) } else { 1.0 };
            let (class_id, class_score) = (class_offset..attrs)
                .map(|attr| (attr - class_offset, at(det, attr)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            let score = (objectness * class_score).clamp(0.0, 1.0);
            if !score.is_finite() || score < MIN_SCORE {
                continue;
            }
            let (cx, cy, w, h) = (at(det, 0), at(det, 1), at(det, 2), at(det, 3));
            if w <= 0.0 || h <= 0.0 {
                continue;
            }
            let bbox = PixelBox::new(
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            );
            candidates.push(RawDetection::new(class_id as u32, score, bbox));
        }

        Ok(class_nms(candidates, NMS_IOU))
    }
}

/// Class-aware non-maximum suppression. Output is ordered by descending
/// confidence, ties by class id.
fn class_nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.class_id.cmp(&b.class_id))
    });
    let mut keep: Vec<RawDetection> = Vec::new();
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) > iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, image: &PixelBuffer) -> Result<Vec<RawDetection>, AdapterError> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(self.decode(outputs, image)?)
    }
}

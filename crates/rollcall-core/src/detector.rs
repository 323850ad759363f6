//! Low-resolution face gate via ONNX Runtime.
//!
//! Runs a BlazeFace-family model on a downscaled frame to answer one
//! question cheaply: is there a plausibly-sized face in front of the
//! kiosk? The expensive recognizer only runs when the gate passes.

use crate::types::FaceBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const GATE_INPUT_SIZE: usize = 128;
const GATE_SCALE: f32 = 127.5;
const GATE_CONFIDENCE_THRESHOLD: f32 = 0.6;
const GATE_NMS_THRESHOLD: f32 = 0.3;
const GATE_STRIDES: [usize; 2] = [8, 16];
const GATE_ANCHORS_PER_CELL: [usize; 2] = [2, 6];
/// Faces smaller than this fraction of the frame's shorter side are
/// treated as background passers-by, not kiosk users.
const GATE_MIN_FACE_FRACTION: f32 = 0.10;
/// Raw classifier logits are clipped before sigmoid, as the reference
/// BlazeFace post-processing does.
const GATE_SCORE_CLIP: f32 = 100.0;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anchor center and size in normalized [0, 1] coordinates.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

/// BlazeFace-style face gate.
pub struct FaceGate {
    session: Session,
    input_size: usize,
    anchors: Vec<Anchor>,
}

impl FaceGate {
    /// Load the gate ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, GateError> {
        if !Path::new(model_path).exists() {
            return Err(GateError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face gate model"
        );

        let anchors = generate_anchors(GATE_INPUT_SIZE);

        Ok(Self {
            session,
            input_size: GATE_INPUT_SIZE,
            anchors,
        })
    }

    /// Run the gate on an RGB frame. Returns the best face box in
    /// original frame coordinates, or `None` if nothing passes the
    /// confidence and minimum-size checks.
    pub fn check(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceBox>, GateError> {
        let input = self.preprocess(rgb, width as usize, height as usize);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_boxes) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| GateError::InferenceFailed(format!("box regression: {e}")))?;
        let (_, raw_scores) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| GateError::InferenceFailed(format!("classifier: {e}")))?;

        let detections = decode_boxes(
            &self.anchors,
            raw_boxes,
            raw_scores,
            width as f32,
            height as f32,
            GATE_CONFIDENCE_THRESHOLD,
        );

        let kept = nms(detections, GATE_NMS_THRESHOLD);

        let min_side = width.min(height) as f32 * GATE_MIN_FACE_FRACTION;
        let best = kept
            .into_iter()
            .filter(|b| b.min_side() >= min_side)
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        Ok(best)
    }

    /// Resize RGB to the square model input with bilinear interpolation
    /// and normalize to [-1, 1] NCHW.
    fn preprocess(&self, rgb: &[u8], width: usize, height: usize) -> Array4<f32> {
        let size = self.input_size;
        let x_ratio = width as f32 / size as f32;
        let y_ratio = height as f32 / size as f32;

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            let src_y = (y as f32 + 0.5) * y_ratio - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
            let y1 = (y0 + 1).min(height - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

            for x in 0..size {
                let src_x = (x as f32 + 0.5) * x_ratio - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
                let x1 = (x0 + 1).min(width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                for c in 0..3 {
                    let tl = rgb[(y0 * width + x0) * 3 + c] as f32;
                    let tr = rgb[(y0 * width + x1) * 3 + c] as f32;
                    let bl = rgb[(y1 * width + x0) * 3 + c] as f32;
                    let br = rgb[(y1 * width + x1) * 3 + c] as f32;

                    let val = tl * (1.0 - fx) * (1.0 - fy)
                        + tr * fx * (1.0 - fy)
                        + bl * (1.0 - fx) * fy
                        + br * fx * fy;

                    tensor[[0, c, y, x]] = val / GATE_SCALE - 1.0;
                }
            }
        }

        tensor
    }
}

/// Generate the fixed BlazeFace front-camera anchor grid.
///
/// Strides 8 and 16 over a 128-square input, with 2 and 6 anchors per
/// cell respectively: 896 anchors total.
fn generate_anchors(input_size: usize) -> Vec<Anchor> {
    let mut anchors = Vec::new();

    for (stride, per_cell) in GATE_STRIDES.iter().zip(GATE_ANCHORS_PER_CELL.iter()) {
        let grid = input_size / stride;
        let scale = *stride as f32 / input_size as f32;

        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) * scale;
                let cy = (y as f32 + 0.5) * scale;
                for _ in 0..*per_cell {
                    anchors.push(Anchor { cx, cy, w: scale, h: scale });
                }
            }
        }
    }

    anchors
}

/// Decode raw regression output against the anchor grid into frame-space
/// boxes, keeping only those above `threshold`.
fn decode_boxes(
    anchors: &[Anchor],
    raw_boxes: &[f32],
    raw_scores: &[f32],
    frame_w: f32,
    frame_h: f32,
    threshold: f32,
) -> Vec<FaceBox> {
    let mut detections = Vec::new();

    for (i, anchor) in anchors.iter().enumerate() {
        let Some(&logit) = raw_scores.get(i) else { break };
        let score = sigmoid(logit.clamp(-GATE_SCORE_CLIP, GATE_SCORE_CLIP));
        if score < threshold {
            continue;
        }

        let off = i * 4;
        if off + 3 >= raw_boxes.len() {
            break;
        }
        let (dx, dy, dw, dh) = (
            raw_boxes[off],
            raw_boxes[off + 1],
            raw_boxes[off + 2],
            raw_boxes[off + 3],
        );

        let cx = anchor.cx + dx * anchor.w;
        let cy = anchor.cy + dy * anchor.h;
        let w = anchor.w * dw.exp();
        let h = anchor.h * dh.exp();

        let x = (cx - w / 2.0).max(0.0);
        let y = (cy - h / 2.0).max(0.0);

        detections.push(FaceBox {
            x: x * frame_w,
            y: y * frame_h,
            width: (w.min(1.0 - x)) * frame_w,
            height: (h.min(1.0 - y)) * frame_h,
            confidence: score,
        });
    }

    detections
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two face boxes.
fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_w = (x2 - x1).max(0.0);
    let inter_h = (y2 - y1).max(0.0);
    let inter_area = inter_w * inter_h;

    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

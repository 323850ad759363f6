//! ArcFace face recognizer via ONNX Runtime.
//!
//! The full-resolution stage of the perception pipeline: locates the
//! primary face, crops it with margin, and extracts a 512-dimensional
//! L2-normalized embedding for gallery matching.

use crate::detector::{FaceGate, GateError};
use crate::types::{Embedding, FaceBox};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from the gate!) ---
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";
/// Fraction of the box size added on every side before cropping, so the
/// embedding sees hairline and jaw context.
const CROP_MARGIN: f32 = 0.3;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face localization failed: {0}")]
    Localization(#[from] GateError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One face observed at full resolution: where it is, how confident the
/// localizer was, and its embedding.
pub struct FaceReading {
    pub embedding: Embedding,
    pub bbox: FaceBox,
    pub det_score: f32,
}

/// Two-session recognizer: a localizer run on the full-resolution frame
/// plus the ArcFace embedding model.
pub struct FaceRecognizer {
    localizer: FaceGate,
    session: Session,
}

impl FaceRecognizer {
    /// Load the localization and embedding ONNX models.
    pub fn load(det_model_path: &str, embed_model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(embed_model_path).exists() {
            return Err(RecognizerError::ModelNotFound(embed_model_path.to_string()));
        }

        let localizer = FaceGate::load(det_model_path)?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(embed_model_path)?;

        tracing::info!(
            path = embed_model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { localizer, session })
    }

    /// Locate the primary face in an RGB frame and extract its
    /// embedding. Returns `Ok(None)` when no face is found at full
    /// resolution, which the caller treats as a transient miss.
    pub fn read_face(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<FaceReading>, RecognizerError> {
        let Some(bbox) = self.localizer.check(rgb, width, height)? else {
            return Ok(None);
        };

        let input = preprocess_crop(rgb, width as usize, height as usize, &bbox);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        let mut embedding = Embedding {
            values: raw,
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        };
        embedding.l2_normalize();

        let det_score = bbox.confidence;
        Ok(Some(FaceReading {
            embedding,
            bbox,
            det_score,
        }))
    }
}

/// Expand a face box by [`CROP_MARGIN`] on every side, clamped to the
/// frame. Returns `(x0, y0, crop_w, crop_h)` in pixels.
fn crop_region(bbox: &FaceBox, width: usize, height: usize) -> (f32, f32, f32, f32) {
    let margin_x = bbox.width * CROP_MARGIN;
    let margin_y = bbox.height * CROP_MARGIN;

    let x0 = (bbox.x - margin_x).max(0.0);
    let y0 = (bbox.y - margin_y).max(0.0);
    let x1 = (bbox.x + bbox.width + margin_x).min(width as f32);
    let y1 = (bbox.y + bbox.height + margin_y).min(height as f32);

    (x0, y0, (x1 - x0).max(1.0), (y1 - y0).max(1.0))
}

/// Crop the face with margin and bilinearly resample it into the
/// normalized 112x112 NCHW ArcFace input tensor.
fn preprocess_crop(rgb: &[u8], width: usize, height: usize, bbox: &FaceBox) -> Array4<f32> {
    let (x0, y0, crop_w, crop_h) = crop_region(bbox, width, height);

    let size = ARCFACE_INPUT_SIZE;
    let x_ratio = crop_w / size as f32;
    let y_ratio = crop_h / size as f32;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for oy in 0..size {
        let src_y = y0 + (oy as f32 + 0.5) * y_ratio - 0.5;
        let iy0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let iy1 = (iy0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for ox in 0..size {
            let src_x = x0 + (ox as f32 + 0.5) * x_ratio - 0.5;
            let ix0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let ix1 = (ix0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = rgb[(iy0 * width + ix0) * 3 + c] as f32;
                let tr = rgb[(iy0 * width + ix1) * 3 + c] as f32;
                let bl = rgb[(iy1 * width + ix0) * 3 + c] as f32;
                let br = rgb[(iy1 * width + ix1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                tensor[[0, c, oy, ox]] = (val - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
    }

    tensor
}

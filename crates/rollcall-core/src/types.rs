use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in source-frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Shorter side in pixels; the gate compares this against the
    /// minimum-face-size threshold.
    pub fn min_side(&self) -> f32 {
        self.width.min(self.height)
    }
}

/// Face embedding vector (512-dimensional, L2-normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    /// A mismatch against the enrollment gallery silently degrades
    /// match quality, so it is surfaced as a warning at load time.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// L2-normalize in place. A zero vector is left untouched.
    pub fn l2_normalize(&mut self) {
        let norm: f32 = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut self.values {
                *v /= norm;
            }
        }
    }

    /// Cosine similarity against another embedding.
    ///
    /// Both vectors are expected to be unit-normalized, so this is a
    /// plain dot product. Returns a value in [-1, 1].
    pub fn similarity(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

//! rollcall-core — Perception primitives for the attendance kiosk.
//!
//! Face gating (cheap first-stage localization), face recognition
//! (512-d ArcFace-style embeddings via ONNX Runtime), hand-gesture
//! classification from landmarks, and the enrolled-embedding gallery
//! with batched cosine matching.

pub mod detector;
pub mod gallery;
pub mod gesture;
pub mod recognizer;
pub mod types;

pub use detector::FaceGate;
pub use gallery::{EmbeddingGallery, EnrolledIdentity};
pub use gesture::{Gesture, GestureReading, GestureSmoother, HandLandmarker};
pub use recognizer::{FaceReading, FaceRecognizer};
pub use types::{Embedding, FaceBox};

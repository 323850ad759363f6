//! Hand gesture classification via ONNX Runtime.
//!
//! A hand landmark model produces 21 keypoints; a geometric classifier
//! turns finger states into one of the kiosk's three action gestures.
//! Finger state is judged by distance ratios from the wrist, so the
//! classification holds regardless of hand rotation in the image plane.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const LANDMARK_INPUT_SIZE: usize = 224;
const LANDMARK_COUNT: usize = 21;
const HAND_PRESENCE_THRESHOLD: f32 = 0.5;
/// Tip must be this factor farther from the wrist than the PIP joint
/// before a finger counts as extended.
const EXTENSION_RATIO: f32 = 1.05;
/// Thumb counterpart: tip distance from the index MCP versus the thumb
/// MCP distance from the same reference point.
const THUMB_EXTENSION_RATIO: f32 = 1.1;

// MediaPipe hand landmark indices.
const WRIST: usize = 0;
const THUMB_MCP: usize = 2;
const THUMB_TIP: usize = 4;
const INDEX_MCP: usize = 5;
const INDEX_PIP: usize = 6;
const INDEX_TIP: usize = 8;
const MIDDLE_PIP: usize = 10;
const MIDDLE_TIP: usize = 12;
const RING_PIP: usize = 14;
const RING_TIP: usize = 16;
const PINKY_PIP: usize = 18;
const PINKY_TIP: usize = 20;

#[derive(Error, Debug)]
pub enum GestureError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// The gestures the kiosk acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    None,
    PeaceSign,
    ThumbsUp,
    OpenPalm,
}

impl Gesture {
    pub fn label(&self) -> &'static str {
        match self {
            Gesture::None => "NONE",
            Gesture::PeaceSign => "PEACE",
            Gesture::ThumbsUp => "THUMBS_UP",
            Gesture::OpenPalm => "OPEN_PALM",
        }
    }
}

/// One hand keypoint in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl HandLandmark {
    fn distance(&self, other: &HandLandmark) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One classified hand observation: the discrete gesture, its
/// confidence, and the raw keypoints for display overlays.
#[derive(Debug, Clone)]
pub struct GestureReading {
    pub gesture: Gesture,
    pub confidence: f32,
    pub landmarks: Vec<HandLandmark>,
}

/// Which digits are extended, derived from landmark geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerStates {
    pub thumb: bool,
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
}

/// ONNX hand landmark model wrapper.
pub struct HandLandmarker {
    session: Session,
}

impl HandLandmarker {
    /// Load the hand landmark ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, GestureError> {
        if !Path::new(model_path).exists() {
            return Err(GestureError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded hand landmark model"
        );

        Ok(Self { session })
    }

    /// Detect a hand in an RGB frame and classify its gesture.
    /// `Gesture::None` means no hand was present or the pose matched
    /// no known gesture; in the no-hand case the landmarks are empty.
    pub fn classify(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<GestureReading, GestureError> {
        let input = preprocess(rgb, width as usize, height as usize);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_landmarks) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| GestureError::InferenceFailed(format!("landmarks: {e}")))?;
        let (_, presence) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| GestureError::InferenceFailed(format!("hand presence: {e}")))?;

        let presence = presence.first().copied().unwrap_or(0.0);
        if presence < HAND_PRESENCE_THRESHOLD {
            return Ok(GestureReading {
                gesture: Gesture::None,
                confidence: 0.0,
                landmarks: Vec::new(),
            });
        }

        if raw_landmarks.len() < LANDMARK_COUNT * 3 {
            return Err(GestureError::InferenceFailed(format!(
                "expected {} landmark values, got {}",
                LANDMARK_COUNT * 3,
                raw_landmarks.len()
            )));
        }

        let landmarks: Vec<HandLandmark> = (0..LANDMARK_COUNT)
            .map(|i| HandLandmark {
                x: raw_landmarks[i * 3] / LANDMARK_INPUT_SIZE as f32,
                y: raw_landmarks[i * 3 + 1] / LANDMARK_INPUT_SIZE as f32,
                z: raw_landmarks[i * 3 + 2] / LANDMARK_INPUT_SIZE as f32,
            })
            .collect();

        Ok(reading(landmarks, presence))
    }
}

/// Assemble the observation, keeping the keypoints with the label.
fn reading(landmarks: Vec<HandLandmark>, presence: f32) -> GestureReading {
    let (gesture, confidence) = classify_landmarks(&landmarks);
    GestureReading {
        gesture,
        confidence: confidence * presence,
        landmarks,
    }
}

/// Resize RGB to the model input and normalize to [0, 1] NCHW.
fn preprocess(rgb: &[u8], width: usize, height: usize) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE;
    let x_ratio = width as f32 / size as f32;
    let y_ratio = height as f32 / size as f32;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        let src_y = ((y as f32 * y_ratio) as usize).min(height - 1);
        for x in 0..size {
            let src_x = ((x as f32 * x_ratio) as usize).min(width - 1);
            let idx = (src_y * width + src_x) * 3;
            tensor[[0, 0, y, x]] = rgb[idx] as f32 / 255.0;
            tensor[[0, 1, y, x]] = rgb[idx + 1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = rgb[idx + 2] as f32 / 255.0;
        }
    }

    tensor
}

/// Derive per-finger extension from wrist-relative distances.
///
/// A finger is extended when its tip sits farther from the wrist than
/// its PIP joint by [`EXTENSION_RATIO`]. This holds under any in-plane
/// rotation of the hand, unlike axis-aligned tip-above-joint checks.
pub fn finger_states(landmarks: &[HandLandmark]) -> FingerStates {
    let wrist = &landmarks[WRIST];

    let extended = |tip: usize, pip: usize| {
        landmarks[tip].distance(wrist) > landmarks[pip].distance(wrist) * EXTENSION_RATIO
    };

    // The thumb folds across the palm rather than toward the wrist, so
    // measure it against the index MCP instead.
    let index_mcp = &landmarks[INDEX_MCP];
    let thumb = landmarks[THUMB_TIP].distance(index_mcp)
        > landmarks[THUMB_MCP].distance(index_mcp) * THUMB_EXTENSION_RATIO;

    FingerStates {
        thumb,
        index: extended(INDEX_TIP, INDEX_PIP),
        middle: extended(MIDDLE_TIP, MIDDLE_PIP),
        ring: extended(RING_TIP, RING_PIP),
        pinky: extended(PINKY_TIP, PINKY_PIP),
    }
}

/// Map finger states to a gesture with a geometric confidence score.
pub fn classify_landmarks(landmarks: &[HandLandmark]) -> (Gesture, f32) {
    if landmarks.len() < LANDMARK_COUNT {
        return (Gesture::None, 0.0);
    }

    let states = finger_states(landmarks);
    let confidence = extension_margin(landmarks);

    let gesture = match states {
        FingerStates { index: true, middle: true, ring: false, pinky: false, .. } => {
            Gesture::PeaceSign
        }
        FingerStates { thumb: true, index: false, middle: false, ring: false, pinky: false } => {
            Gesture::ThumbsUp
        }
        FingerStates { thumb: true, index: true, middle: true, ring: true, pinky: true } => {
            Gesture::OpenPalm
        }
        _ => Gesture::None,
    };

    if gesture == Gesture::None {
        (gesture, 0.0)
    } else {
        (gesture, confidence)
    }
}

/// How decisively the fingers are bent or straight: the smallest
/// distance-ratio margin across the four fingers, mapped into [0, 1].
/// Ambiguous half-curled poses score low.
fn extension_margin(landmarks: &[HandLandmark]) -> f32 {
    let wrist = &landmarks[WRIST];

    let margin = |tip: usize, pip: usize| {
        let pip_d = landmarks[pip].distance(wrist).max(1e-6);
        let ratio = landmarks[tip].distance(wrist) / pip_d;
        // Distance from the decision boundary, either direction.
        (ratio - EXTENSION_RATIO).abs()
    };

    let min_margin = [
        margin(INDEX_TIP, INDEX_PIP),
        margin(MIDDLE_TIP, MIDDLE_PIP),
        margin(RING_TIP, RING_PIP),
        margin(PINKY_TIP, PINKY_PIP),
    ]
    .into_iter()
    .fold(f32::INFINITY, f32::min);

    (min_margin / 0.3).clamp(0.0, 1.0)
}

/// Temporal smoother: a bounded window of the last N per-frame
/// classifications, confirming a gesture only when the whole window
/// agrees. Rejects single-frame flicker.
pub struct GestureSmoother {
    window: VecDeque<Gesture>,
    capacity: usize,
}

impl GestureSmoother {
    pub fn new(required_frames: usize) -> Self {
        let capacity = required_frames.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Feed one per-frame observation, dropping the oldest once the
    /// window is full. Returns the confirmed gesture, if any.
    pub fn observe(&mut self, gesture: Gesture) -> Option<Gesture> {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(gesture);
        smoothed(self.window.make_contiguous(), self.capacity)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

/// The smoothed result for a classification window: a gesture is
/// confirmed only when the window is full and unanimous on a single
/// non-None gesture.
pub fn smoothed(window: &[Gesture], required: usize) -> Option<Gesture> {
    if window.len() < required {
        return None;
    }
    let first = window[0];
    if first != Gesture::None && window.iter().all(|&g| g == first) {
        Some(first)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm(x: f32, y: f32) -> HandLandmark {
        HandLandmark { x, y, z: 0.0 }
    }

    /// Upright hand: wrist at the bottom, selected finger tips pushed
    /// far from the wrist, curled tips pulled back near their PIPs.
    fn hand(thumb: bool, index: bool, middle: bool, ring: bool, pinky: bool) -> Vec<HandLandmark> {
        let mut lms = vec![lm(0.5, 0.9); LANDMARK_COUNT];
        lms[WRIST] = lm(0.5, 0.9);

        // Finger columns fan out slightly; PIPs midway up the palm.
        let fingers = [
            (INDEX_PIP, INDEX_TIP, 0.40, index),
            (MIDDLE_PIP, MIDDLE_TIP, 0.48, middle),
            (RING_PIP, RING_TIP, 0.56, ring),
            (PINKY_PIP, PINKY_TIP, 0.64, pinky),
        ];
        for (pip, tip, x, extended) in fingers {
            lms[pip] = lm(x, 0.55);
            lms[tip] = if extended { lm(x, 0.15) } else { lm(x, 0.60) };
        }

        lms[INDEX_MCP] = lm(0.40, 0.70);
        lms[THUMB_MCP] = lm(0.30, 0.75);
        lms[THUMB_TIP] = if thumb { lm(0.05, 0.55) } else { lm(0.38, 0.68) };

        lms
    }

    fn rotate_90(lms: &[HandLandmark]) -> Vec<HandLandmark> {
        // Rotate 90 degrees around the image center.
        lms.iter()
            .map(|p| HandLandmark {
                x: 0.5 + (p.y - 0.5),
                y: 0.5 - (p.x - 0.5),
                z: p.z,
            })
            .collect()
    }

    #[test]
    fn test_peace_sign() {
        let (g, conf) = classify_landmarks(&hand(false, true, true, false, false));
        assert_eq!(g, Gesture::PeaceSign);
        assert!(conf > 0.0);
    }

    #[test]
    fn test_thumbs_up() {
        let (g, _) = classify_landmarks(&hand(true, false, false, false, false));
        assert_eq!(g, Gesture::ThumbsUp);
    }

    #[test]
    fn test_open_palm() {
        let (g, _) = classify_landmarks(&hand(true, true, true, true, true));
        assert_eq!(g, Gesture::OpenPalm);
    }

    #[test]
    fn test_fist_is_none() {
        let (g, conf) = classify_landmarks(&hand(false, false, false, false, false));
        assert_eq!(g, Gesture::None);
        assert_eq!(conf, 0.0);
    }

    #[test]
    fn test_classification_survives_rotation() {
        // The same poses rotated 90 degrees must classify identically.
        for (t, i, m, r, p) in [
            (false, true, true, false, false),
            (true, false, false, false, false),
            (true, true, true, true, true),
        ] {
            let upright = hand(t, i, m, r, p);
            let rotated = rotate_90(&upright);
            assert_eq!(
                classify_landmarks(&upright).0,
                classify_landmarks(&rotated).0,
                "gesture changed under rotation for ({t},{i},{m},{r},{p})"
            );
        }
    }

    #[test]
    fn test_finger_states_peace() {
        let states = finger_states(&hand(false, true, true, false, false));
        assert!(states.index && states.middle);
        assert!(!states.ring && !states.pinky);
    }

    #[test]
    fn test_reading_carries_landmarks() {
        // Callers get the raw keypoints alongside the label, so a UI
        // can overlay the detected hand.
        let r = reading(hand(false, true, true, false, false), 1.0);
        assert_eq!(r.gesture, Gesture::PeaceSign);
        assert_eq!(r.landmarks.len(), LANDMARK_COUNT);
        assert!(r.confidence > 0.0);
    }

    #[test]
    fn test_reading_scales_confidence_by_presence() {
        let full = reading(hand(true, true, true, true, true), 1.0);
        let half = reading(hand(true, true, true, true, true), 0.5);
        assert_eq!(full.gesture, half.gesture);
        assert!((half.confidence - full.confidence * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_smoothed_window_fn() {
        use Gesture::{None as N, PeaceSign as P, ThumbsUp as T};
        assert_eq!(smoothed(&[P, P, P], 3), Some(P));
        assert_eq!(smoothed(&[P, P], 3), None);
        assert_eq!(smoothed(&[P, T, P], 3), None);
        assert_eq!(smoothed(&[N, N, N], 3), None);
    }

    #[test]
    fn test_smoother_requires_streak() {
        let mut s = GestureSmoother::new(3);
        assert_eq!(s.observe(Gesture::PeaceSign), None);
        assert_eq!(s.observe(Gesture::PeaceSign), None);
        assert_eq!(s.observe(Gesture::PeaceSign), Some(Gesture::PeaceSign));
    }

    #[test]
    fn test_smoother_flicker_resets_streak() {
        let mut s = GestureSmoother::new(3);
        s.observe(Gesture::PeaceSign);
        s.observe(Gesture::PeaceSign);
        assert_eq!(s.observe(Gesture::None), None);
        assert_eq!(s.observe(Gesture::PeaceSign), None);
        assert_eq!(s.observe(Gesture::PeaceSign), None);
        assert_eq!(s.observe(Gesture::PeaceSign), Some(Gesture::PeaceSign));
    }

    #[test]
    fn test_smoother_none_never_confirms() {
        let mut s = GestureSmoother::new(2);
        for _ in 0..10 {
            assert_eq!(s.observe(Gesture::None), None);
        }
    }

    #[test]
    fn test_smoother_reset() {
        let mut s = GestureSmoother::new(2);
        s.observe(Gesture::OpenPalm);
        s.reset();
        assert_eq!(s.observe(Gesture::OpenPalm), None);
        assert_eq!(s.observe(Gesture::OpenPalm), Some(Gesture::OpenPalm));
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let rgb = vec![255u8; 64 * 64 * 3];
        let t = preprocess(&rgb, 64, 64);
        assert_eq!(t.shape(), &[1, 3, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE]);
        assert!(t.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}

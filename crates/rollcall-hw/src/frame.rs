//! Frame type and pixel format conversion.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct RgbFrame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl RgbFrame {
    /// Average luma brightness (0.0–255.0), BT.601 weights.
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0f32;
        for px in self.data.chunks_exact(3) {
            sum += 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
        }
        sum / (self.data.len() / 3) as f32
    }
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], with U and V
/// shared by the pixel pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0] as f32, quad[1] as f32, quad[2] as f32, quad[3] as f32);
        let cb = u - 128.0;
        let cr = v - 128.0;

        for y in [y0, y1] {
            let r = y + 1.402 * cr;
            let g = y - 0.344136 * cb - 0.714136 * cr;
            let b = y + 1.772 * cb;
            rgb.push(r.round().clamp(0.0, 255.0) as u8);
            rgb.push(g.round().clamp(0.0, 255.0) as u8);
            rgb.push(b.round().clamp(0.0, 255.0) as u8);
        }
    }

    Ok(rgb)
}

//! Frame sources: V4L2 cameras and image-directory playback.

use crate::frame::{self, RgbFrame};
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no usable images in {0}")]
    EmptyImageDir(String),
    #[error("image read failed: {0}")]
    ImageRead(String),
}

/// Anything that can hand the kiosk loop one RGB frame at a time.
///
/// Implemented by real V4L2 cameras and by directory playback for
/// bench runs without hardware.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<RgbFrame, CameraError>;
    fn describe(&self) -> String;
    /// Release the underlying device. Called once on shutdown.
    fn release(&mut self) {}
}

/// Open a frame source from a path: a directory of images becomes
/// playback, anything else is treated as a V4L2 device node.
pub fn open_source(source: &str) -> Result<Box<dyn FrameSource>, CameraError> {
    if Path::new(source).is_dir() {
        Ok(Box::new(FileCamera::open(source)?))
    } else {
        Ok(Box::new(V4l2Camera::open(source)?))
    }
}

/// V4L2 camera device handle.
pub struct V4l2Camera {
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
}

impl V4l2Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        if negotiated.fourcc != FourCC::new(b"YUYV") {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV)",
                negotiated.fourcc
            )));
        }

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<String> {
        let mut devices = Vec::new();
        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                devices.push(path);
            }
        }
        devices
    }
}

impl FrameSource for V4l2Camera {
    fn read_frame(&mut self) -> Result<RgbFrame, CameraError> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| CameraError::CaptureFailed("camera released".to_string()))?;

        let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let rgb = frame::yuyv_to_rgb(buf, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}")))?;

        Ok(RgbFrame {
            data: rgb,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    fn describe(&self) -> String {
        format!("v4l2:{} {}x{}", self.device_path, self.width, self.height)
    }

    fn release(&mut self) {
        self.device = None;
        tracing::info!(device = %self.device_path, "released camera");
    }
}

/// Plays back a directory of still images as frames, looping. Lets the
/// full pipeline run on a desk with no camera attached.
pub struct FileCamera {
    paths: Vec<PathBuf>,
    next: usize,
    sequence: u32,
    dir: String,
}

impl FileCamera {
    pub fn open(dir: &str) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::DeviceNotFound(format!("{dir}: {e}")))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("jpg" | "jpeg" | "png" | "bmp")
                )
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(CameraError::EmptyImageDir(dir.to_string()));
        }

        tracing::info!(dir, frames = paths.len(), "opened image-directory frame source");

        Ok(Self {
            paths,
            next: 0,
            sequence: 0,
            dir: dir.to_string(),
        })
    }
}

impl FrameSource for FileCamera {
    fn read_frame(&mut self) -> Result<RgbFrame, CameraError> {
        let path = &self.paths[self.next];
        self.next = (self.next + 1) % self.paths.len();

        let img = image::open(path)
            .map_err(|e| CameraError::ImageRead(format!("{}: {e}", path.display())))?
            .to_rgb8();

        let (width, height) = img.dimensions();
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(RgbFrame {
            data: img.into_raw(),
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    fn describe(&self) -> String {
        format!("dir:{} ({} frames)", self.dir, self.paths.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_source_missing_device() {
        assert!(open_source("/dev/video-does-not-exist").is_err());
    }

    #[test]
    fn test_file_camera_empty_dir() {
        let dir = std::env::temp_dir().join("rollcall-empty-frames");
        std::fs::create_dir_all(&dir).unwrap();
        let result = FileCamera::open(dir.to_str().unwrap());
        assert!(matches!(result, Err(CameraError::EmptyImageDir(_))));
    }
}

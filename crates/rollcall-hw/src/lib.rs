//! Hardware abstraction for the kiosk: camera capture and frame
//! conversion, behind a [`FrameSource`] trait so the pipeline also runs
//! from recorded images.

pub mod camera;
pub mod frame;

pub use camera::{open_source, CameraError, FileCamera, FrameSource, V4l2Camera};
pub use frame::{yuyv_to_rgb, FrameError, RgbFrame};

//! rollcall-hw: Camera capture and frame encoding.
//!
//! Provides V4L2-based capture into RGB frames plus the pixel conversions
//! the live stream needs.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{encode_jpeg, Frame, FrameError};

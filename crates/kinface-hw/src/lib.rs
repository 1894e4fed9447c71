//! kinface-hw — V4L2 camera capture for live recognition.
//!
//! Frames come out as 8-bit grayscale regardless of the negotiated pixel
//! format, ready to hand to the recognition engine.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream};
pub use frame::{Frame, FrameError, PixelFormat};

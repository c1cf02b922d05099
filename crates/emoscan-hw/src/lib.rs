//! emoscan-hw: Camera acquisition and capture.
//!
//! [`CameraDevice`] and [`VideoStream`] are the capabilities the lifecycle
//! controller drives; [`V4l2Camera`] implements them on Linux video nodes.

pub mod camera;
pub mod v4l2;

pub use camera::{
    failure_channel, CameraDevice, CameraError, CaptureConstraints, FailureReporter, FailureSignal,
    VideoStream,
};
pub use v4l2::{DeviceInfo, V4l2Camera, V4l2Stream};

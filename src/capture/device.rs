//! Seam between the session and a concrete camera driver

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Where a full-resolution capture is stored by the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureTarget {
    Ram,
    MemoryCard,
}

/// How long the camera shows a capture on its own screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewTime {
    Off,
    Seconds(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSetting {
    CaptureTarget(CaptureTarget),
    ReviewTime(ReviewTime),
}

/// Opens handles to a camera.
pub trait CameraDriver: Send + Sync {
    /// Open and initialize the device. A failed open must not leak a partial handle.
    fn open(&self) -> Result<Box<dyn CameraHandle>, DeviceError>;
}

/// An open camera. All operations block their caller, and a handle never
/// services two operations at once.
pub trait CameraHandle: Send {
    fn configure(&mut self, setting: DeviceSetting) -> Result<(), DeviceError>;

    /// Fetch one low-resolution viewfinder image. The bytes stay valid until the
    /// next call on this handle.
    fn fetch_preview(&mut self) -> Result<&[u8], DeviceError>;

    /// Record one full-resolution image to the configured capture target.
    fn capture_full(&mut self) -> Result<(), DeviceError>;

    fn close(self: Box<Self>);
}

pub mod device;
pub mod frame;
pub mod mock;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use device::{CameraDriver, CameraHandle, CaptureTarget, DeviceSetting, ReviewTime};
pub use frame::Frame;
pub use mock::{MockDriver, MockProbe, Payload};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Driver;

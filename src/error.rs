use std::io;

use thiserror::Error;

/// Message the tethering driver reports once the camera has left the bus.
pub const DEVICE_NOT_FOUND_MESSAGE: &str = "Could not find the requested device on the USB port";

/// Errors reported by a camera driver
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device is gone; the handle can no longer be used
    #[error("camera is no longer reachable")]
    Disconnected,

    #[error("setting not supported by this driver: {0}")]
    Unsupported(&'static str),

    #[error("device I/O error: {0}")]
    Io(#[source] io::Error),

    #[error("driver error: {0}")]
    Driver(String),
}

impl DeviceError {
    /// Classify an opaque driver message, recognizing the disconnect report.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message == DEVICE_NOT_FOUND_MESSAGE {
            Self::Disconnected
        } else {
            Self::Driver(message)
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl From<io::Error> for DeviceError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENODEV) | Some(libc::ENXIO) => Self::Disconnected,
            _ => Self::Io(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to open camera: {0}")]
    Open(#[source] DeviceError),

    #[error("another connection attempt is in progress")]
    InProgress,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera is not connected")]
    NotConnected,

    #[error("capture failed: {0}")]
    Device(#[from] DeviceError),
}

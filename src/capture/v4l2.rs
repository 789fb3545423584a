//! V4L2 camera driver: MJPEG preview over mmap buffers

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::device::{CameraDriver, CameraHandle, CaptureTarget, DeviceSetting};
use crate::error::DeviceError;
use crate::DeviceConfig;

/// `IMG_<unix secs>_<nnnnn>.jpg`; the stamp keeps names unique across restarts.
fn capture_file_name(stamp: u64, index: u64) -> String {
    format!("IMG_{stamp}_{index:05}.jpg")
}

/// Opens V4L2 capture devices described by a [`DeviceConfig`]
pub struct V4l2Driver {
    config: DeviceConfig,
}

impl V4l2Driver {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }
}

impl CameraDriver for V4l2Driver {
    fn open(&self) -> Result<Box<dyn CameraHandle>, DeviceError> {
        Ok(Box::new(V4l2Handle::open(&self.config)?))
    }
}

/// An open V4L2 device streaming MJPEG
pub struct V4l2Handle {
    stream: MmapStream<'static>,
    _device: Device,
    buffer_count: u32,
    capture_dir: PathBuf,
    target: CaptureTarget,
    last_capture: Vec<u8>,
    captures: u64,
}

impl V4l2Handle {
    #[instrument(skip(config), fields(path = %config.path))]
    fn open(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let device = Device::with_path(&config.path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(DeviceError::Driver(format!(
                "{} does not support video capture",
                config.path
            )));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(b"MJPG");
        let fmt = device.set_format(&fmt)?;

        if fmt.fourcc != FourCC::new(b"MJPG") {
            return Err(DeviceError::Driver(format!(
                "{} refused MJPEG, offered {}",
                config.path, fmt.fourcc
            )));
        }

        if let Err(err) = device.set_params(&Parameters::with_fps(config.fps)) {
            debug!(%err, "frame interval not accepted, keeping driver default");
        }

        // Stream setup failing here drops the device, so nothing leaks on error
        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;

        info!(
            width = fmt.width,
            height = fmt.height,
            buffers = config.buffer_count,
            "V4L2 stream started"
        );

        Ok(Self {
            stream,
            _device: device,
            buffer_count: config.buffer_count,
            capture_dir: config.capture_dir.clone(),
            target: CaptureTarget::Ram,
            last_capture: Vec::new(),
            captures: 0,
        })
    }

    fn next_frame(&mut self) -> Result<&[u8], DeviceError> {
        let (buf, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        Ok(&buf[..used])
    }

    fn store(&mut self) -> Result<(), DeviceError> {
        match self.target {
            CaptureTarget::Ram => Ok(()),
            CaptureTarget::MemoryCard => {
                fs::create_dir_all(&self.capture_dir)?;
                let stamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                let path = self.capture_dir.join(capture_file_name(stamp, self.captures));
                fs::write(&path, &self.last_capture)?;
                info!(path = %path.display(), bytes = self.last_capture.len(), "capture stored");
                Ok(())
            }
        }
    }
}

impl CameraHandle for V4l2Handle {
    fn configure(&mut self, setting: DeviceSetting) -> Result<(), DeviceError> {
        match setting {
            DeviceSetting::CaptureTarget(target) => {
                self.target = target;
                Ok(())
            }
            DeviceSetting::ReviewTime(_) => Err(DeviceError::Unsupported("review time")),
        }
    }

    fn fetch_preview(&mut self) -> Result<&[u8], DeviceError> {
        self.next_frame()
    }

    #[instrument(skip(self))]
    fn capture_full(&mut self) -> Result<(), DeviceError> {
        // Queued buffers were exposed before the request; skip them
        for _ in 0..self.buffer_count {
            self.next_frame()?;
        }

        let (buf, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        self.last_capture.clear();
        self.last_capture.extend_from_slice(&buf[..used]);
        self.captures += 1;

        self.store()
    }

    fn close(self: Box<Self>) {
        debug!("closing V4L2 stream");
    }
}

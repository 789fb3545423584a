//! Scripted in-process camera used by tests and the demo mode

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};

use crate::capture::device::{CameraDriver, CameraHandle, DeviceSetting};
use crate::error::{DeviceError, DEVICE_NOT_FOUND_MESSAGE};
use crate::utils::lock;

/// What each preview fetch returns
#[derive(Debug, Clone)]
pub enum Payload {
    /// The same bytes every time
    Fixed(Vec<u8>),
    /// `len` bytes, every byte set to the low bits of the fetch counter
    Sized(usize),
    /// A JPEG gradient that scrolls one step per fetch
    TestPattern { width: u32, height: u32 },
}

/// Shared view into a mock camera, kept by tests to script and observe it
#[derive(Clone, Default)]
pub struct MockProbe {
    inner: Arc<ProbeState>,
}

#[derive(Default)]
struct ProbeState {
    unplugged: AtomicBool,
    failing_opens: AtomicUsize,
    failing_fetches: AtomicUsize,
    failing_captures: AtomicUsize,

    opens: AtomicUsize,
    closes: AtomicUsize,
    fetches: AtomicUsize,
    captures: AtomicUsize,
    in_flight: AtomicUsize,
    overlaps: AtomicUsize,
    settings: Mutex<Vec<DeviceSetting>>,
}

impl MockProbe {
    /// Make every subsequent device call report the camera as gone.
    pub fn unplug(&self) {
        self.inner.unplugged.store(true, Ordering::SeqCst);
    }

    pub fn replug(&self) {
        self.inner.unplugged.store(false, Ordering::SeqCst);
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.inner.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.inner.failing_fetches.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_captures(&self, count: usize) {
        self.inner.failing_captures.store(count, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.inner.captures.load(Ordering::SeqCst)
    }

    /// Number of device calls that started while another was still running
    pub fn overlaps(&self) -> usize {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> Vec<DeviceSetting> {
        lock(&self.inner.settings).clone()
    }

    fn enter(&self) -> CallGuard<'_> {
        if self.inner.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        CallGuard { probe: self }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct CallGuard<'a> {
    probe: &'a MockProbe,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.probe.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Driver handing out [`MockHandle`]s that share one [`MockProbe`]
pub struct MockDriver {
    probe: MockProbe,
    payload: Payload,
    fetch_delay: Duration,
    capture_delay: Duration,
}

impl MockDriver {
    pub fn new(payload: Payload) -> Self {
        Self {
            probe: MockProbe::default(),
            payload,
            fetch_delay: Duration::ZERO,
            capture_delay: Duration::ZERO,
        }
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }
}

impl CameraDriver for MockDriver {
    fn open(&self) -> Result<Box<dyn CameraHandle>, DeviceError> {
        if self.probe.inner.unplugged.load(Ordering::SeqCst) {
            return Err(DeviceError::from_message(DEVICE_NOT_FOUND_MESSAGE));
        }
        if MockProbe::take_failure(&self.probe.inner.failing_opens) {
            return Err(DeviceError::Driver("could not claim the USB device".into()));
        }

        self.probe.inner.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            probe: self.probe.clone(),
            payload: self.payload.clone(),
            fetch_delay: self.fetch_delay,
            capture_delay: self.capture_delay,
            counter: 0,
            frame: Vec::new(),
        }))
    }
}

pub struct MockHandle {
    probe: MockProbe,
    payload: Payload,
    fetch_delay: Duration,
    capture_delay: Duration,
    counter: u64,
    frame: Vec<u8>,
}

impl MockHandle {
    fn render(&mut self) -> Result<(), DeviceError> {
        self.frame.clear();
        match &self.payload {
            Payload::Fixed(bytes) => self.frame.extend_from_slice(bytes),
            Payload::Sized(len) => self.frame.resize(*len, self.counter as u8),
            Payload::TestPattern { width, height } => {
                let shift = self.counter as u32;
                let image = ImageBuffer::from_fn(*width, *height, |x, y| {
                    Rgb([
                        ((x + shift) % 256) as u8,
                        ((y + shift) % 256) as u8,
                        ((x + y) % 256) as u8,
                    ])
                });
                let mut out = Cursor::new(std::mem::take(&mut self.frame));
                JpegEncoder::new_with_quality(&mut out, 75)
                    .encode_image(&image)
                    .map_err(|err| DeviceError::Driver(err.to_string()))?;
                self.frame = out.into_inner();
            }
        }
        Ok(())
    }
}

impl CameraHandle for MockHandle {
    fn configure(&mut self, setting: DeviceSetting) -> Result<(), DeviceError> {
        lock(&self.probe.inner.settings).push(setting);
        Ok(())
    }

    fn fetch_preview(&mut self) -> Result<&[u8], DeviceError> {
        let probe = self.probe.clone();
        let _call = probe.enter();

        if probe.inner.unplugged.load(Ordering::SeqCst) {
            return Err(DeviceError::from_message(DEVICE_NOT_FOUND_MESSAGE));
        }
        if !self.fetch_delay.is_zero() {
            thread::sleep(self.fetch_delay);
        }
        if MockProbe::take_failure(&probe.inner.failing_fetches) {
            return Err(DeviceError::from_message("I/O in progress"));
        }

        self.counter += 1;
        self.render()?;
        probe.inner.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(&self.frame)
    }

    fn capture_full(&mut self) -> Result<(), DeviceError> {
        let probe = self.probe.clone();
        let _call = probe.enter();

        if probe.inner.unplugged.load(Ordering::SeqCst) {
            return Err(DeviceError::from_message(DEVICE_NOT_FOUND_MESSAGE));
        }
        if !self.capture_delay.is_zero() {
            thread::sleep(self.capture_delay);
        }
        if MockProbe::take_failure(&probe.inner.failing_captures) {
            return Err(DeviceError::from_message("Out of focus"));
        }

        probe.inner.captures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.probe.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

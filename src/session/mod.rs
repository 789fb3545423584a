//! Camera session: owns the device handle, the viewer set and the preview loop

mod arbiter;
mod capture_loop;
mod signal;
mod viewers;

pub use arbiter::{Attachment, PauseArbiter, PauseGuard};
pub use signal::DisconnectSignal;
pub use viewers::{Join, Leave, ViewerRegistry};

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{CameraDriver, CameraHandle, CaptureTarget, DeviceSetting, Frame, ReviewTime};
use crate::error::{CaptureError, ConnectError};
use crate::pipeline::{FramePool, PoolStats};
use crate::utils::lock;
use crate::SessionConfig;
use capture_loop::LoopHandle;
use signal::DisconnectNotifier;

const DISCONNECTED: u8 = 0;
const CONNECTING: u8 = 1;
const CONNECTED: u8 = 2;
/// Teardown in progress; connect attempts report `InProgress`
const DISCONNECTING: u8 = 3;

/// Settings applied right after the device opens; failures are ignored
const CONNECT_SETTINGS: [DeviceSetting; 2] = [
    DeviceSetting::CaptureTarget(CaptureTarget::MemoryCard),
    DeviceSetting::ReviewTime(ReviewTime::Off),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected { streaming: bool },
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Connected { streaming: true })
    }
}

/// State shared between the session and its preview loop
pub(crate) struct Shared {
    pub(crate) config: SessionConfig,
    phase: AtomicU8,
    pub(crate) device: Mutex<Option<Box<dyn CameraHandle>>>,
    pub(crate) latest: ArcSwapOption<Frame>,
    pub(crate) sequence: AtomicU64,
    pub(crate) pool: Arc<FramePool>,
    pub(crate) arbiter: PauseArbiter,
    viewers: ViewerRegistry,
    /// Present while a loop is supposed to be running
    streaming: Mutex<Option<LoopHandle>>,
    pub(crate) loop_thread: Mutex<Option<JoinHandle<()>>>,
    disconnect: Mutex<DisconnectNotifier>,
}

impl Shared {
    fn is_connected(&self) -> bool {
        self.phase.load(Ordering::Acquire) == CONNECTED
    }

    /// Tear down the current connection: stop the loop, forget viewers, release the
    /// handle, clear the slot and fire the disconnect signal. No-op unless connected.
    ///
    /// The handle is released outside the `streaming` lock; a capture may still hold it.
    pub(crate) fn handle_disconnect(&self) {
        let dropped = {
            let mut streaming = lock(&self.streaming);
            if self
                .phase
                .compare_exchange(CONNECTED, DISCONNECTING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            let dropped = self.viewers.clear();
            if let Some(handle) = streaming.take() {
                handle.stop();
            }
            dropped
        };

        if let Some(device) = lock(&self.device).take() {
            info!("Releasing camera...");
            device.close();
        }

        self.latest.store(None);
        self.phase.store(DISCONNECTED, Ordering::Release);
        lock(&self.disconnect).fire();

        warn!(viewers = dropped, "camera disconnected");
    }
}

/// Owner of the single camera connection
pub struct CameraSession {
    shared: Arc<Shared>,
    driver: Box<dyn CameraDriver>,
    capture_lock: Mutex<()>,
}

impl CameraSession {
    pub fn new(driver: Box<dyn CameraDriver>, config: SessionConfig) -> Self {
        let pool = FramePool::new(config.pool_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                phase: AtomicU8::new(DISCONNECTED),
                device: Mutex::new(None),
                latest: ArcSwapOption::empty(),
                sequence: AtomicU64::new(0),
                pool,
                arbiter: PauseArbiter::new(),
                viewers: ViewerRegistry::new(),
                streaming: Mutex::new(None),
                loop_thread: Mutex::new(None),
                disconnect: Mutex::new(DisconnectNotifier::new()),
            }),
            driver,
            capture_lock: Mutex::new(()),
        }
    }

    /// Open and configure the camera. Succeeds immediately when already connected.
    #[instrument(skip(self))]
    pub fn connect(&self) -> Result<(), ConnectError> {
        match self.shared.phase.compare_exchange(
            DISCONNECTED,
            CONNECTING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(CONNECTED) => return Ok(()),
            Err(_) => return Err(ConnectError::InProgress),
        }

        let mut handle = match self.driver.open() {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.phase.store(DISCONNECTED, Ordering::Release);
                return Err(ConnectError::Open(err));
            }
        };

        for setting in CONNECT_SETTINGS {
            if let Err(err) = handle.configure(setting) {
                debug!(?setting, %err, "ignoring setting the camera rejected");
            }
        }

        *lock(&self.shared.device) = Some(handle);
        lock(&self.shared.disconnect).rearm();
        self.shared.phase.store(CONNECTED, Ordering::Release);

        info!("Camera connected!");
        Ok(())
    }

    /// Register a viewer; the first one starts the preview loop.
    pub fn add_viewer(&self, id: &str) {
        let mut streaming = lock(&self.shared.streaming);
        if !self.shared.is_connected() {
            return;
        }

        match self.shared.viewers.insert(id) {
            Join::First => match capture_loop::spawn(&self.shared) {
                Ok(handle) => {
                    *streaming = Some(handle);
                    info!(viewer = id, "first viewer joined, preview started");
                }
                Err(err) => {
                    error!(%err, "failed to start preview loop");
                    self.shared.viewers.remove(id);
                }
            },
            Join::Joined => debug!(viewer = id, "viewer joined"),
            Join::AlreadyPresent => {}
        }
    }

    /// Forget a viewer; the last one leaving stops the preview loop.
    pub fn remove_viewer(&self, id: &str) {
        let mut streaming = lock(&self.shared.streaming);
        match self.shared.viewers.remove(id) {
            Leave::Last => {
                if let Some(handle) = streaming.take() {
                    handle.stop();
                }
                info!(viewer = id, "last viewer left, preview stopped");
            }
            Leave::Left => debug!(viewer = id, "viewer left"),
            Leave::Absent => {}
        }
    }

    /// Take a full-resolution picture, suspending the preview loop around it.
    ///
    /// Concurrent callers are served one after another.
    #[instrument(skip(self))]
    pub fn capture_image(&self) -> Result<(), CaptureError> {
        if !self.is_connected() {
            return Err(CaptureError::NotConnected);
        }

        let _serial = lock(&self.capture_lock);
        let _paused = self.shared.arbiter.pause();
        let mut device = lock(&self.shared.device);
        let handle = device.as_mut().ok_or(CaptureError::NotConnected)?;

        let started = Instant::now();
        let result = handle.capture_full();
        metrics::histogram!("tether_capture_us").record(started.elapsed().as_micros() as f64);

        match &result {
            Ok(()) => info!(elapsed_ms = started.elapsed().as_millis() as u64, "capture complete"),
            Err(err) => warn!(%err, "capture failed"),
        }
        result.map_err(CaptureError::from)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Newest published preview frame, if any
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.shared.latest.load_full()
    }

    /// Disconnect notification for the current connection lifetime
    pub fn disconnect_signal(&self) -> DisconnectSignal {
        lock(&self.shared.disconnect).subscribe()
    }

    pub fn state(&self) -> SessionState {
        match self.shared.phase.load(Ordering::Acquire) {
            CONNECTED => SessionState::Connected {
                streaming: self.is_streaming(),
            },
            CONNECTING => SessionState::Connecting,
            _ => SessionState::Disconnected,
        }
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.shared.streaming).is_some()
    }

    pub fn viewer_count(&self) -> usize {
        self.shared.viewers.len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Release the camera and wait for the preview loop to exit.
    pub fn shutdown(&self) {
        self.shared.handle_disconnect();
        if let Some(thread) = capture_loop::take_thread(&self.shared) {
            if thread.join().is_err() {
                error!("preview loop panicked");
            }
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

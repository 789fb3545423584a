//! Preview loop: pulls viewfinder frames and publishes the newest one

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::capture::Frame;
use crate::error::DeviceError;
use crate::pipeline::PooledBuffer;
use crate::session::Shared;
use crate::utils::lock;

/// Control side of a running loop. Stopping is cooperative: the loop exits at its
/// next iteration boundary.
pub(crate) struct LoopHandle {
    stop: Sender<()>,
}

impl LoopHandle {
    pub(crate) fn stop(self) {
        let _ = self.stop.try_send(());
    }
}

/// Start a preview loop on its own thread.
///
/// The new thread first waits for the previous loop thread to finish, so only one
/// loop ever writes the latest-frame slot.
pub(crate) fn spawn(shared: &Arc<Shared>) -> io::Result<LoopHandle> {
    let (stop_tx, stop_rx) = flume::bounded(1);
    let mut last_thread = lock(&shared.loop_thread);
    let previous = last_thread.take();

    let worker = PreviewLoop {
        shared: Arc::clone(shared),
        stop: stop_rx,
        meter: RateMeter::new(shared.config.throughput_window()),
    };

    let thread = thread::Builder::new()
        .name("preview-loop".into())
        .spawn(move || {
            if let Some(previous) = previous {
                let _ = previous.join();
            }
            worker.run();
        })?;

    *last_thread = Some(thread);
    Ok(LoopHandle { stop: stop_tx })
}

/// Take the current loop thread so the caller can join it.
pub(crate) fn take_thread(shared: &Shared) -> Option<JoinHandle<()>> {
    lock(&shared.loop_thread).take()
}

struct PreviewLoop {
    shared: Arc<Shared>,
    stop: Receiver<()>,
    meter: RateMeter,
}

impl PreviewLoop {
    fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let attached = shared.arbiter.attach();
        debug!("preview loop started");

        loop {
            if self.stop_requested() {
                break;
            }

            // Re-check the stop signal after sitting out a capture
            if shared.arbiter.checkpoint() {
                continue;
            }

            match self.fetch() {
                Ok(Some(data)) => self.publish(data),
                Ok(None) => {
                    debug!("device released, preview loop exiting");
                    break;
                }
                Err(err) if err.is_disconnect() => {
                    error!(%err, "camera lost during preview fetch");
                    drop(attached);
                    shared.handle_disconnect();
                    return;
                }
                Err(err) => {
                    warn!(%err, "preview fetch failed, retrying");
                    if self.sleep_or_stop(shared.config.retry_delay()) {
                        break;
                    }
                }
            }
        }

        debug!("preview loop stopped");
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }

    /// Wait out the retry delay. Returns true if a stop arrived meanwhile.
    fn sleep_or_stop(&self, delay: Duration) -> bool {
        !matches!(self.stop.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
    }

    fn fetch(&self) -> Result<Option<PooledBuffer>, DeviceError> {
        let mut device = lock(&self.shared.device);
        let Some(handle) = device.as_mut() else {
            return Ok(None);
        };

        let started = Instant::now();
        let bytes = handle.fetch_preview()?;
        let mut buffer = self.shared.pool.acquire();
        buffer.fill_from(bytes);
        metrics::histogram!("tether_preview_fetch_us").record(started.elapsed().as_micros() as f64);

        Ok(Some(buffer))
    }

    fn publish(&mut self, data: PooledBuffer) {
        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Arc::new(Frame::new(data, sequence));

        // The displaced frame's buffer goes back to the pool once its last reader drops it
        drop(self.shared.latest.swap(Some(frame)));

        metrics::counter!("tether_preview_frames_total").increment(1);
        if let Some(fps) = self.meter.tick() {
            info!("Average FPS: {:.2}", fps);
            metrics::gauge!("tether_preview_fps").set(fps);
        }
    }
}

/// Counts frames and reports the average rate once per window
pub(crate) struct RateMeter {
    window: Duration,
    start: Instant,
    frames: u64,
}

impl RateMeter {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            start: Instant::now(),
            frames: 0,
        }
    }

    /// Record one frame; returns frames per second when a window has elapsed.
    pub(crate) fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        let elapsed = self.start.elapsed();
        if elapsed < self.window {
            return None;
        }

        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.start = Instant::now();
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_is_silent_inside_window() {
        let mut meter = RateMeter::new(Duration::from_secs(3));
        for _ in 0..100 {
            assert!(meter.tick().is_none());
        }
    }

    #[test]
    fn meter_reports_and_resets_after_window() {
        let mut meter = RateMeter::new(Duration::from_millis(50));
        meter.tick();
        thread::sleep(Duration::from_millis(60));

        let fps = meter.tick().expect("window elapsed");
        assert!(fps > 0.0 && fps < 100.0, "fps={fps}");
        assert!(meter.tick().is_none());
    }
}

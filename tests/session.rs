//! Session behavior against the scripted mock camera
//!
//! Run: `cargo test --test session`

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tether::capture::{CaptureTarget, DeviceSetting, MockDriver, MockProbe, Payload, ReviewTime};
use tether::{CameraSession, CaptureError, ConnectError, Frame, SessionConfig, SessionState};

// ── Shared helpers ───────────────────────────────────────────────────

fn test_config() -> SessionConfig {
    SessionConfig {
        retry_delay_ms: 10,
        throughput_window_secs: 3,
        pool_capacity: 4,
        reconnect_backoff_secs: 0,
    }
}

fn session_with(driver: MockDriver) -> (CameraSession, MockProbe) {
    let probe = driver.probe();
    (CameraSession::new(Box::new(driver), test_config()), probe)
}

fn connected(driver: MockDriver) -> (CameraSession, MockProbe) {
    let (session, probe) = session_with(driver);
    session.connect().expect("mock camera connects");
    (session, probe)
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Assert the device sees no preview fetches over a short window.
fn assert_fetching_stopped(probe: &MockProbe) {
    thread::sleep(Duration::from_millis(50));
    let before = probe.fetches();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(probe.fetches(), before, "preview loop still fetching");
}

fn latest_sequence(session: &CameraSession) -> u64 {
    session.latest_frame().map(|f| f.sequence()).unwrap_or(0)
}

// ── Connection ───────────────────────────────────────────────────────

#[test]
fn connect_is_idempotent_and_configures_device() {
    let (session, probe) = session_with(MockDriver::new(Payload::Sized(16)));
    assert_eq!(session.state(), SessionState::Disconnected);

    session.connect().unwrap();
    session.connect().unwrap();

    assert_eq!(probe.opens(), 1);
    assert_eq!(session.state(), SessionState::Connected { streaming: false });
    assert_eq!(
        probe.settings(),
        vec![
            DeviceSetting::CaptureTarget(CaptureTarget::MemoryCard),
            DeviceSetting::ReviewTime(ReviewTime::Off),
        ]
    );
}

#[test]
fn failed_connect_leaves_session_disconnected() {
    let (session, probe) = session_with(MockDriver::new(Payload::Sized(16)));
    probe.fail_next_opens(1);

    assert!(matches!(session.connect(), Err(ConnectError::Open(_))));
    assert!(!session.is_connected());
    assert_eq!(session.state(), SessionState::Disconnected);

    session.connect().unwrap();
    assert!(session.is_connected());
}

#[test]
fn viewers_are_ignored_while_disconnected() {
    let (session, probe) = session_with(MockDriver::new(Payload::Sized(16)));

    session.add_viewer("10.0.0.2:5000");

    assert_eq!(session.viewer_count(), 0);
    assert!(!session.is_streaming());
    assert_eq!(probe.fetches(), 0);
}

// ── Viewer lifecycle ─────────────────────────────────────────────────

#[test]
fn loop_runs_only_while_viewers_are_present() {
    let (session, probe) = connected(
        MockDriver::new(Payload::Sized(64)).with_fetch_delay(Duration::from_millis(1)),
    );

    session.add_viewer("a");
    assert!(session.is_streaming());
    wait_until("first frames", || probe.fetches() >= 3);

    session.add_viewer("b");
    session.remove_viewer("a");
    assert!(session.is_streaming());
    let fetched = probe.fetches();
    wait_until("loop to keep running", || probe.fetches() > fetched + 3);

    session.remove_viewer("b");
    assert!(!session.is_streaming());
    assert_eq!(session.state(), SessionState::Connected { streaming: false });
    assert_fetching_stopped(&probe);

    session.add_viewer("c");
    let fetched = probe.fetches();
    wait_until("loop to restart", || probe.fetches() > fetched + 3);
}

#[test]
fn repeated_add_and_absent_remove_are_no_ops() {
    let (session, probe) = connected(
        MockDriver::new(Payload::Sized(64)).with_fetch_delay(Duration::from_millis(1)),
    );

    session.remove_viewer("nobody");
    assert!(!session.is_streaming());

    session.add_viewer("a");
    session.add_viewer("a");
    assert_eq!(session.viewer_count(), 1);

    session.remove_viewer("nobody");
    assert!(session.is_streaming());
    assert_eq!(session.viewer_count(), 1);

    session.remove_viewer("a");
    assert_eq!(session.viewer_count(), 0);
    assert!(!session.is_streaming());
    assert_fetching_stopped(&probe);
}

#[test]
fn frames_advance_and_survive_viewers_leaving() {
    let (session, probe) = connected(
        MockDriver::new(Payload::Sized(256)).with_fetch_delay(Duration::from_millis(2)),
    );
    assert!(session.latest_frame().is_none());

    session.add_viewer("a");

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.len() < 5 {
        assert!(Instant::now() < deadline, "timed out collecting frames");
        if let Some(frame) = session.latest_frame() {
            if seen.last().map_or(true, |prev: &Arc<Frame>| prev.sequence() != frame.sequence()) {
                seen.push(frame);
            }
        }
        thread::sleep(Duration::from_micros(200));
    }

    for pair in seen.windows(2) {
        assert!(pair[1].sequence() > pair[0].sequence());
        assert!(pair[1].timestamp() > pair[0].timestamp());
        assert_eq!(pair[1].len(), 256);
    }

    session.remove_viewer("a");
    assert_fetching_stopped(&probe);

    let last = session.latest_frame().expect("frame kept after viewers left");
    assert!(last.sequence() >= seen[4].sequence());
    assert_eq!(last.sequence(), latest_sequence(&session));
}

// ── Capture ──────────────────────────────────────────────────────────

#[test]
fn capture_never_overlaps_preview_fetch() {
    let (session, probe) = connected(
        MockDriver::new(Payload::Sized(1024))
            .with_fetch_delay(Duration::from_millis(1))
            .with_capture_delay(Duration::from_millis(3)),
    );
    let session = Arc::new(session);

    session.add_viewer("a");
    wait_until("preview running", || probe.fetches() >= 3);

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for _ in 0..5 {
                    session.capture_image().unwrap();
                    thread::sleep(Duration::from_millis(1));
                }
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }

    assert_eq!(probe.captures(), 20);
    assert_eq!(probe.overlaps(), 0);

    let fetched = probe.fetches();
    wait_until("preview to resume", || probe.fetches() > fetched + 3);
    assert_eq!(probe.overlaps(), 0);
}

#[test]
fn capture_works_without_viewers() {
    let (session, probe) = connected(MockDriver::new(Payload::Sized(16)));

    session.capture_image().unwrap();

    assert_eq!(probe.captures(), 1);
    assert_eq!(probe.fetches(), 0);
}

#[test]
fn capture_while_disconnected_fails() {
    let (session, probe) = session_with(MockDriver::new(Payload::Sized(16)));

    assert!(matches!(session.capture_image(), Err(CaptureError::NotConnected)));
    assert_eq!(probe.captures(), 0);
}

#[test]
fn failed_capture_still_resumes_preview() {
    let (session, probe) = connected(
        MockDriver::new(Payload::Sized(64)).with_fetch_delay(Duration::from_millis(1)),
    );
    session.add_viewer("a");
    wait_until("preview running", || probe.fetches() >= 3);

    probe.fail_next_captures(1);
    assert!(matches!(session.capture_image(), Err(CaptureError::Device(_))));
    assert!(session.is_connected());

    let fetched = probe.fetches();
    wait_until("preview to resume", || probe.fetches() > fetched + 3);
}

// ── Errors and disconnects ───────────────────────────────────────────

#[test]
fn transient_fetch_errors_are_retried() {
    let (session, probe) = connected(MockDriver::new(Payload::Sized(64)));
    probe.fail_next_fetches(3);

    session.add_viewer("a");
    wait_until("frames after retries", || latest_sequence(&session) >= 3);

    assert!(session.is_connected());
    assert!(session.is_streaming());
}

#[test]
fn device_loss_tears_down_the_session() {
    let (session, probe) = connected(
        MockDriver::new(Payload::Sized(64)).with_fetch_delay(Duration::from_millis(1)),
    );
    let signal = session.disconnect_signal();

    session.add_viewer("a");
    wait_until("first frame", || session.latest_frame().is_some());

    probe.unplug();
    wait_until("disconnect", || !session.is_connected());

    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.latest_frame().is_none());
    assert!(signal.is_fired());
    assert_eq!(session.viewer_count(), 0);
    assert!(!session.is_streaming());
    assert_eq!(probe.closes(), 1);

    // Further teardown paths must not release the handle again
    session.remove_viewer("a");
    session.shutdown();
    assert_eq!(probe.closes(), 1);
    assert!(matches!(session.capture_image(), Err(CaptureError::NotConnected)));
}

#[test]
fn teardown_does_not_block_viewers_behind_a_running_capture() {
    let (session, probe) = connected(
        MockDriver::new(Payload::Sized(64)).with_capture_delay(Duration::from_millis(500)),
    );
    let session = Arc::new(session);

    let capturing = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.capture_image())
    };
    thread::sleep(Duration::from_millis(50));

    let stopping = {
        let session = Arc::clone(&session);
        thread::spawn(move || session.shutdown())
    };
    thread::sleep(Duration::from_millis(50));

    // The capture still holds the device; viewer and status calls must not wait on it
    let started = Instant::now();
    session.add_viewer("late");
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_streaming());
    session.remove_viewer("late");
    assert!(started.elapsed() < Duration::from_millis(200));

    capturing.join().unwrap().unwrap();
    stopping.join().unwrap();
    assert_eq!(probe.captures(), 1);
    assert_eq!(probe.closes(), 1);
    assert!(matches!(session.connect(), Ok(())));
}

#[test]
fn reconnect_starts_a_fresh_lifecycle() {
    let (session, probe) = connected(
        MockDriver::new(Payload::Sized(64)).with_fetch_delay(Duration::from_millis(1)),
    );
    let first = session.disconnect_signal();

    session.add_viewer("a");
    probe.unplug();
    wait_until("disconnect", || first.is_fired());

    probe.replug();
    session.connect().unwrap();
    let second = session.disconnect_signal();

    assert!(first.is_fired());
    assert!(!second.is_fired());
    assert_eq!(probe.opens(), 2);

    session.add_viewer("a");
    wait_until("frames on new connection", || session.latest_frame().is_some());
}

// ── Buffer reuse ─────────────────────────────────────────────────────

#[test]
fn buffers_are_reused_across_many_frames() {
    let (session, _probe) = connected(MockDriver::new(Payload::Sized(4096)));

    session.add_viewer("a");
    wait_until("1000 frames", || latest_sequence(&session) >= 1000);
    session.remove_viewer("a");

    let stats = session.pool_stats();
    assert!(stats.allocated <= 4, "allocated {} buffers", stats.allocated);
    assert!(stats.reused >= 990);
}

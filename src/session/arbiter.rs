//! Rendezvous between a one-shot capture and the preview loop

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::utils::lock;

/// Lets a capture suspend preview loops at an iteration boundary.
///
/// A loop [`attach`](Self::attach)es for its lifetime and calls
/// [`checkpoint`](Self::checkpoint) before each device call. [`pause`](Self::pause)
/// returns once every attached loop is parked, and the loops stay parked until the
/// returned guard drops. Pausers queue behind each other.
#[derive(Default)]
pub struct PauseArbiter {
    state: Mutex<State>,
    changed: Condvar,
}

#[derive(Default)]
struct State {
    requested: bool,
    active: usize,
    parked: usize,
}

impl PauseArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause and wait until no attached loop can touch the device.
    pub fn pause(&self) -> PauseGuard<'_> {
        let mut state = lock(&self.state);
        while state.requested {
            state = self.wait(state);
        }

        state.requested = true;
        self.changed.notify_all();

        while state.parked < state.active {
            state = self.wait(state);
        }

        PauseGuard { arbiter: self }
    }

    /// Register a running loop. Dropping the attachment deregisters it.
    pub fn attach(&self) -> Attachment<'_> {
        lock(&self.state).active += 1;
        Attachment { arbiter: self }
    }

    /// Park while a pause is outstanding. Returns whether the caller was parked.
    pub fn checkpoint(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.requested {
            return false;
        }

        state.parked += 1;
        self.changed.notify_all();

        while state.requested {
            state = self.wait(state);
        }

        state.parked -= 1;
        true
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.state).requested
    }

    fn resume(&self) {
        lock(&self.state).requested = false;
        self.changed.notify_all();
    }

    fn detach(&self) {
        lock(&self.state).active -= 1;
        self.changed.notify_all();
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outstanding pause; resumes the loops when dropped
#[must_use = "the loop resumes as soon as the guard is dropped"]
pub struct PauseGuard<'a> {
    arbiter: &'a PauseArbiter,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.arbiter.resume();
    }
}

/// Registration of a running loop
pub struct Attachment<'a> {
    arbiter: &'a PauseArbiter,
}

impl Drop for Attachment<'_> {
    fn drop(&mut self) {
        self.arbiter.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pause_without_loop_returns_immediately() {
        let arbiter = PauseArbiter::new();
        let guard = arbiter.pause();
        assert!(arbiter.is_paused());
        drop(guard);
        assert!(!arbiter.is_paused());
    }

    #[test]
    fn checkpoint_without_pause_passes() {
        let arbiter = PauseArbiter::new();
        let _attached = arbiter.attach();
        assert!(!arbiter.checkpoint());
    }

    #[test]
    fn pause_waits_for_loop_to_park() {
        let arbiter = Arc::new(PauseArbiter::new());
        let stop = Arc::new(AtomicBool::new(false));
        let busy = Arc::new(AtomicBool::new(false));
        let parked_count = Arc::new(AtomicUsize::new(0));

        let worker = {
            let arbiter = Arc::clone(&arbiter);
            let stop = Arc::clone(&stop);
            let busy = Arc::clone(&busy);
            let parked_count = Arc::clone(&parked_count);
            thread::spawn(move || {
                let _attached = arbiter.attach();
                while !stop.load(Ordering::SeqCst) {
                    if arbiter.checkpoint() {
                        parked_count.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }
                    busy.store(true, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    busy.store(false, Ordering::SeqCst);
                }
            })
        };

        thread::sleep(Duration::from_millis(10));
        for _ in 0..5 {
            let guard = arbiter.pause();
            for _ in 0..5 {
                assert!(!busy.load(Ordering::SeqCst));
                thread::sleep(Duration::from_millis(1));
            }
            drop(guard);
            thread::sleep(Duration::from_millis(5));
        }

        stop.store(true, Ordering::SeqCst);
        worker.join().unwrap();
        assert!(parked_count.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn exiting_loop_releases_waiting_pauser() {
        let arbiter = Arc::new(PauseArbiter::new());
        let attached = arbiter.attach();

        let pauser = {
            let arbiter = Arc::clone(&arbiter);
            thread::spawn(move || {
                let _guard = arbiter.pause();
            })
        };

        thread::sleep(Duration::from_millis(20));
        drop(attached);
        pauser.join().unwrap();
        assert!(!arbiter.is_paused());
    }
}
